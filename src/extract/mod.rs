// src/extract/mod.rs

mod cell;
mod grid;

pub use cell::CellValue;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::fetch::SourceDocument;
use grid::{collect_rows, expand_spans, GridCell, Section};

/// Which rows of a table become its column header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderPolicy {
    /// `thead` rows, else leading all-`th` rows, else numbered columns.
    #[default]
    Infer,
    /// The first row, whatever its cells are.
    FirstRow,
    /// Numbered columns; every row is data.
    #[serde(alias = "none")]
    Numbered,
}

/// One table element converted to a rectangle of typed cells.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedTable {
    /// Index of the source `<table>` among all tables of the document.
    pub position: usize,
    pub header: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl ExtractedTable {
    pub fn width(&self) -> usize {
        self.header.len()
    }
}

/// Non-empty, document-ordered tables of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct TableCollection(Vec<ExtractedTable>);

impl TableCollection {
    /// `None` when `tables` is empty.
    pub fn new(tables: Vec<ExtractedTable>) -> Option<Self> {
        if tables.is_empty() {
            None
        } else {
            Some(Self(tables))
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ExtractedTable> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a TableCollection {
    type Item = &'a ExtractedTable;
    type IntoIter = std::slice::Iter<'a, ExtractedTable>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Why a single table was skipped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("table has no rows")]
    NoRows,
    #[error("table has no columns")]
    NoColumns,
    #[error("row {row} has {found} cells, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, Default)]
pub struct TableExtractor {
    policy: HeaderPolicy,
}

impl TableExtractor {
    pub fn new(policy: HeaderPolicy) -> Self {
        Self { policy }
    }


    /// Every convertible table of `doc`, in document order. `None` when the
    /// page has no table element or none of them converts.
    #[instrument(level = "debug", skip(self, doc), fields(url = %doc.url))]
    pub fn extract(&self, doc: &SourceDocument) -> Option<TableCollection> {
        let tables = self.extract_html(&doc.markup);
        debug!(count = tables.len(), "tables extracted");
        TableCollection::new(tables)
    }

    /// Convert every table in `markup`, skipping the ones that fail.
    pub fn extract_html(&self, markup: &str) -> Vec<ExtractedTable> {
        let document = Html::parse_document(markup);
        let selector = Selector::parse("table").expect("table selector should parse");

        document
            .select(&selector)
            .enumerate()
            .filter_map(|(position, table)| match self.convert(table, position) {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!(position, error = %e, "skipping table");
                    None
                }
            })
            .collect()
    }

    fn convert(&self, table: ElementRef<'_>, position: usize) -> Result<ExtractedTable, TableError> {
        let raw = collect_rows(table);
        // rows without cells of their own can still be filled by rowspans
        // from above, so empty rows are only dropped after expansion
        let grid = expand_spans(&raw);
        let has_thead = raw
            .iter()
            .any(|r| r.section == Section::Head && !r.cells.is_empty());

        let mut head: Vec<Vec<GridCell>> = Vec::new();
        let mut body: Vec<Vec<GridCell>> = Vec::new();
        let mut leading_th = true;
        for (row, cells) in raw.iter().zip(grid) {
            leading_th = leading_th && (row.cells.is_empty() || row.all_th());
            if cells.is_empty() {
                continue;
            }
            let is_head = match self.policy {
                HeaderPolicy::Infer if has_thead => row.section == Section::Head,
                HeaderPolicy::Infer => leading_th,
                HeaderPolicy::FirstRow => head.is_empty() && body.is_empty(),
                HeaderPolicy::Numbered => false,
            };
            if is_head {
                head.push(cells);
            } else {
                body.push(cells);
            }
        }

        let width = match head.first().or(body.first()) {
            None => return Err(TableError::NoRows),
            Some(first) => first.len(),
        };
        if width == 0 {
            return Err(TableError::NoColumns);
        }
        for (row, cells) in head.iter().chain(&body).enumerate() {
            if cells.len() != width {
                return Err(TableError::Ragged {
                    row,
                    expected: width,
                    found: cells.len(),
                });
            }
        }

        let header = merge_header(&head, width);
        let rows = body
            .iter()
            .map(|r| r.iter().map(|c| CellValue::infer(&c.text)).collect())
            .collect();

        Ok(ExtractedTable {
            position,
            header,
            rows,
        })
    }
}

/// Fold stacked header rows into one name per column. Blank names fall back
/// to the column number.
fn merge_header(head: &[Vec<GridCell>], width: usize) -> Vec<String> {
    (0..width)
        .map(|col| {
            let mut parts: Vec<&str> = Vec::new();
            for row in head {
                let text = row[col].text.as_str();
                if !text.is_empty() && !parts.contains(&text) {
                    parts.push(text);
                }
            }
            if parts.is_empty() {
                col.to_string()
            } else {
                parts.join(" ")
            }
        })
        .collect()
}
