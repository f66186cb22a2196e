// src/extract/grid.rs

use scraper::ElementRef;

use super::cell::normalize_text;

const MAX_SPAN: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Section {
    Head,
    Body,
    Foot,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawCell {
    pub text: String,
    pub is_th: bool,
    pub colspan: usize,
    pub rowspan: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawRow {
    pub section: Section,
    pub cells: Vec<RawCell>,
}

impl RawRow {
    pub fn all_th(&self) -> bool {
        !self.cells.is_empty() && self.cells.iter().all(|c| c.is_th)
    }
}

/// A slot of the span-expanded grid.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GridCell {
    pub text: String,
    pub is_th: bool,
}

/// The `tr` elements owned by `table`, head rows first and foot rows last.
/// Rows of nested tables are not visited.
pub(crate) fn collect_rows(table: ElementRef<'_>) -> Vec<RawRow> {
    let mut head = Vec::new();
    let mut body = Vec::new();
    let mut foot = Vec::new();

    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => body.push(read_row(child, Section::Body)),
            "thead" => head.extend(section_rows(child, Section::Head)),
            "tbody" => body.extend(section_rows(child, Section::Body)),
            "tfoot" => foot.extend(section_rows(child, Section::Foot)),
            _ => {}
        }
    }

    head.extend(body);
    head.extend(foot);
    head
}

fn section_rows(section: ElementRef<'_>, kind: Section) -> impl Iterator<Item = RawRow> + '_ {
    section
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "tr")
        .map(move |tr| read_row(tr, kind))
}

fn read_row(tr: ElementRef<'_>, section: Section) -> RawRow {
    let cells = tr
        .children()
        .filter_map(ElementRef::wrap)
        .filter_map(|cell| {
            let is_th = match cell.value().name() {
                "th" => true,
                "td" => false,
                _ => return None,
            };
            Some(RawCell {
                text: normalize_text(cell.text()),
                is_th,
                colspan: span_attr(cell, "colspan"),
                rowspan: span_attr(cell, "rowspan"),
            })
        })
        .collect();
    RawRow { section, cells }
}

fn span_attr(cell: ElementRef<'_>, name: &str) -> usize {
    cell.value()
        .attr(name)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .clamp(1, MAX_SPAN)
}

/// Expand `colspan`/`rowspan` by repeating each cell into every slot it
/// covers. Rows keep whatever width they end up with; shape checks happen
/// in the caller.
pub(crate) fn expand_spans(rows: &[RawRow]) -> Vec<Vec<GridCell>> {
    // per column: the cell carried down from a rowspan above, and how many
    // more rows it still covers
    let mut carried: Vec<Option<(GridCell, usize)>> = Vec::new();
    let mut grid = Vec::with_capacity(rows.len());

    for row in rows {
        let mut out: Vec<GridCell> = Vec::new();
        let mut col = 0usize;

        for cell in &row.cells {
            while take_carried(&mut carried, &mut col, &mut out) {}
            let slot = GridCell {
                text: cell.text.clone(),
                is_th: cell.is_th,
            };
            for _ in 0..cell.colspan {
                if carried.len() <= col {
                    carried.resize(col + 1, None);
                }
                if cell.rowspan > 1 {
                    carried[col] = Some((slot.clone(), cell.rowspan - 1));
                }
                out.push(slot.clone());
                col += 1;
            }
        }
        // trailing cells still carried from rows above
        while take_carried(&mut carried, &mut col, &mut out) {}

        grid.push(out);
    }

    grid
}

fn take_carried(
    carried: &mut [Option<(GridCell, usize)>],
    col: &mut usize,
    out: &mut Vec<GridCell>,
) -> bool {
    let Some(slot) = carried.get_mut(*col) else {
        return false;
    };
    let Some((cell, left)) = slot.as_mut() else {
        return false;
    };
    out.push(cell.clone());
    *left -= 1;
    if *left == 0 {
        *slot = None;
    }
    *col += 1;
    true
}
