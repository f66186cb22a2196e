// src/extract/cell.rs

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static INT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:\d+|\d{1,3}(?:,\d{3})+)$").expect("integer regex should compile")
});

static FLOAT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:\d+|\d{1,3}(?:,\d{3})+)?(?:\.\d+)?(?:[eE][+-]?\d+)?$")
        .expect("float regex should compile")
});

/// One typed cell of an extracted table.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    /// Infer a scalar from already-normalized cell text.
    pub fn infer(text: &str) -> Self {
        if text.is_empty() {
            return CellValue::Empty;
        }
        if INT_RE.is_match(text) {
            if let Ok(v) = text.replace(',', "").parse::<i64>() {
                return CellValue::Int(v);
            }
        }
        // the float regex also matches "" and "." on its own
        if text.bytes().any(|b| b.is_ascii_digit()) && FLOAT_RE.is_match(text) {
            if let Ok(v) = text.replace(',', "").parse::<f64>() {
                if v.is_finite() {
                    return CellValue::Float(v);
                }
            }
        }
        CellValue::Text(text.to_string())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Int(v) => write!(f, "{v}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

/// Collapse runs of whitespace (including nbsp) into single spaces and trim.
pub fn normalize_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for word in parts.flat_map(|p| p.split(|c: char| c.is_whitespace() || c == '\u{a0}')) {
        if word.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}
