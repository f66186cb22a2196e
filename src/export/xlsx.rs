// src/export/xlsx.rs
//
// Minimal SpreadsheetML package: one worksheet per table, inline strings,
// default style only.

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::escape::escape;
use std::io::{Seek, Write};
use tracing::warn;
use zip::{result::ZipResult, write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::extract::{CellValue, ExtractedTable, TableCollection};

pub const CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Cell text limit, counted in UTF-16 code units as spreadsheet apps do.
pub const MAX_CELL_CHARS: usize = 32_767;

const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_PKG_REL: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// Sheet label for the table at 0-based `index`.
pub fn sheet_name(index: usize) -> String {
    format!("Table_{}", index + 1)
}

/// `0 → A`, `25 → Z`, `26 → AA`.
pub fn column_letters(mut index: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Write the whole workbook into `sink` and hand it back.
pub fn write_workbook<W: Write + Seek>(
    sink: W,
    tables: &TableCollection,
    created: DateTime<Utc>,
) -> ZipResult<W> {
    let mut zip = ZipWriter::new(sink);
    let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let count = tables.len();

    zip.start_file("[Content_Types].xml", opts)?;
    zip.write_all(content_types(count).as_bytes())?;

    zip.start_file("_rels/.rels", opts)?;
    zip.write_all(root_rels().as_bytes())?;

    zip.start_file("docProps/core.xml", opts)?;
    zip.write_all(core_props(created).as_bytes())?;

    zip.start_file("docProps/app.xml", opts)?;
    zip.write_all(app_props().as_bytes())?;

    zip.start_file("xl/workbook.xml", opts)?;
    zip.write_all(workbook(count).as_bytes())?;

    zip.start_file("xl/_rels/workbook.xml.rels", opts)?;
    zip.write_all(workbook_rels(count).as_bytes())?;

    zip.start_file("xl/styles.xml", opts)?;
    zip.write_all(styles().as_bytes())?;

    for (i, table) in tables.iter().enumerate() {
        zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), opts)?;
        write_sheet(&mut zip, table)?;
    }

    zip.finish()
}

fn write_sheet<W: Write>(out: &mut W, table: &ExtractedTable) -> std::io::Result<()> {
    let width = table.width();
    let height = table.rows.len() + 1;

    write!(out, "{XML_DECL}<worksheet xmlns=\"{NS_MAIN}\">")?;
    write!(
        out,
        "<dimension ref=\"A1:{}{}\"/><sheetData>",
        column_letters(width.saturating_sub(1)),
        height
    )?;

    write!(out, "<row r=\"1\">")?;
    for (col, name) in table.header.iter().enumerate() {
        write_text_cell(out, col, 1, name)?;
    }
    write!(out, "</row>")?;

    for (i, row) in table.rows.iter().enumerate() {
        let r = i + 2;
        write!(out, "<row r=\"{r}\">")?;
        for (col, cell) in row.iter().enumerate().filter(|(_, c)| !c.is_empty()) {
            match cell {
                CellValue::Text(s) => write_text_cell(out, col, r, s)?,
                number => write!(out, "<c r=\"{}{r}\"><v>{number}</v></c>", column_letters(col))?,
            }
        }
        write!(out, "</row>")?;
    }

    write!(out, "</sheetData></worksheet>")
}

fn write_text_cell<W: Write>(out: &mut W, col: usize, row: usize, text: &str) -> std::io::Result<()> {
    let kept = truncate_cell(text);
    if kept.len() < text.len() {
        warn!(
            cell = %format!("{}{row}", column_letters(col)),
            chars = text.chars().count(),
            "text cell truncated to {MAX_CELL_CHARS} UTF-16 units"
        );
    }
    let clean = xml_safe(kept);
    let space = if clean.trim() != clean {
        " xml:space=\"preserve\""
    } else {
        ""
    };
    write!(
        out,
        "<c r=\"{}{row}\" t=\"inlineStr\"><is><t{space}>{}</t></is></c>",
        column_letters(col),
        escape(clean.as_str())
    )
}

/// Longest prefix of `text` that fits a cell, cut on a char boundary.
fn truncate_cell(text: &str) -> &str {
    let mut units = 0;
    for (i, c) in text.char_indices() {
        units += c.len_utf16();
        if units > MAX_CELL_CHARS {
            return &text[..i];
        }
    }
    text
}

/// Drop characters XML 1.0 cannot carry.
fn xml_safe(text: &str) -> String {
    text.chars()
        .filter(|&c| matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\u{FFFE}' && c != '\u{FFFF}'))
        .collect()
}

fn content_types(sheets: usize) -> String {
    let mut s = format!(
        "{XML_DECL}<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
         <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
         <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
         <Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>\
         <Override PartName=\"/xl/styles.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml\"/>\
         <Override PartName=\"/docProps/core.xml\" ContentType=\"application/vnd.openxmlformats-package.core-properties+xml\"/>\
         <Override PartName=\"/docProps/app.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.extended-properties+xml\"/>"
    );
    for i in 1..=sheets {
        s.push_str(&format!(
            "<Override PartName=\"/xl/worksheets/sheet{i}.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>"
        ));
    }
    s.push_str("</Types>");
    s
}

fn root_rels() -> String {
    format!(
        "{XML_DECL}<Relationships xmlns=\"{NS_PKG_REL}\">\
         <Relationship Id=\"rId1\" Type=\"{NS_REL}/officeDocument\" Target=\"xl/workbook.xml\"/>\
         <Relationship Id=\"rId2\" Type=\"http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties\" Target=\"docProps/core.xml\"/>\
         <Relationship Id=\"rId3\" Type=\"{NS_REL}/extended-properties\" Target=\"docProps/app.xml\"/>\
         </Relationships>"
    )
}

fn core_props(created: DateTime<Utc>) -> String {
    let ts = created.to_rfc3339_opts(SecondsFormat::Secs, true);
    format!(
        "{XML_DECL}<cp:coreProperties \
         xmlns:cp=\"http://schemas.openxmlformats.org/package/2006/metadata/core-properties\" \
         xmlns:dc=\"http://purl.org/dc/elements/1.1/\" \
         xmlns:dcterms=\"http://purl.org/dc/terms/\" \
         xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\
         <dc:creator>tablescraper</dc:creator>\
         <dcterms:created xsi:type=\"dcterms:W3CDTF\">{ts}</dcterms:created>\
         <dcterms:modified xsi:type=\"dcterms:W3CDTF\">{ts}</dcterms:modified>\
         </cp:coreProperties>"
    )
}

fn app_props() -> String {
    format!(
        "{XML_DECL}<Properties xmlns=\"http://schemas.openxmlformats.org/officeDocument/2006/extended-properties\">\
         <Application>tablescraper</Application></Properties>"
    )
}

fn workbook(sheets: usize) -> String {
    let mut s = format!("{XML_DECL}<workbook xmlns=\"{NS_MAIN}\" xmlns:r=\"{NS_REL}\"><sheets>");
    for i in 0..sheets {
        s.push_str(&format!(
            "<sheet name=\"{}\" sheetId=\"{}\" r:id=\"rId{}\"/>",
            sheet_name(i),
            i + 1,
            i + 1
        ));
    }
    s.push_str("</sheets></workbook>");
    s
}

fn workbook_rels(sheets: usize) -> String {
    let mut s = format!("{XML_DECL}<Relationships xmlns=\"{NS_PKG_REL}\">");
    for i in 1..=sheets {
        s.push_str(&format!(
            "<Relationship Id=\"rId{i}\" Type=\"{NS_REL}/worksheet\" Target=\"worksheets/sheet{i}.xml\"/>"
        ));
    }
    s.push_str(&format!(
        "<Relationship Id=\"rId{}\" Type=\"{NS_REL}/styles\" Target=\"styles.xml\"/></Relationships>",
        sheets + 1
    ));
    s
}

fn styles() -> String {
    format!(
        "{XML_DECL}<styleSheet xmlns=\"{NS_MAIN}\">\
         <fonts count=\"1\"><font><sz val=\"11\"/><name val=\"Calibri\"/></font></fonts>\
         <fills count=\"2\"><fill><patternFill patternType=\"none\"/></fill><fill><patternFill patternType=\"gray125\"/></fill></fills>\
         <borders count=\"1\"><border><left/><right/><top/><bottom/><diagonal/></border></borders>\
         <cellStyleXfs count=\"1\"><xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\"/></cellStyleXfs>\
         <cellXfs count=\"1\"><xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\" xfId=\"0\"/></cellXfs>\
         <cellStyles count=\"1\"><cellStyle name=\"Normal\" xfId=\"0\" builtinId=\"0\"/></cellStyles>\
         </styleSheet>"
    )
}

/// Read a workbook back through calamine as `(sheet name, rows)`.
#[cfg(test)]
pub(crate) fn read_workbook(bytes: &[u8]) -> Vec<(String, Vec<Vec<calamine::Data>>)> {
    use calamine::{Reader, Xlsx};

    let mut book: Xlsx<_> = Xlsx::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
    book.sheet_names()
        .into_iter()
        .map(|name| {
            let range = book.worksheet_range(&name).unwrap();
            let rows = range.rows().map(|r| r.to_vec()).collect();
            (name, rows)
        })
        .collect()
}
