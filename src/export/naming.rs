// src/export/naming.rs

use chrono::{DateTime, Utc};

/// Second precision, zero padded, always UTC: names sort by creation time
/// and never repeat when local clocks go back.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";
pub const EXTENSION: &str = ".xlsx";
const MAX_PREFIX_LEN: usize = 64;

/// `<prefix>-<timestamp>.xlsx`
pub fn artifact_name(prefix: &str, at: &DateTime<Utc>) -> String {
    format!("{}-{}{}", prefix, at.format(TIMESTAMP_FORMAT), EXTENSION)
}

/// Prefixes must be safe as a bare file name on every platform.
pub fn is_valid_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix.len() <= MAX_PREFIX_LEN
        && prefix
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
