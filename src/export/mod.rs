// src/export/mod.rs

pub mod naming;
pub mod xlsx;

use chrono::{DateTime, Utc};
use std::{
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{info, instrument, warn};
use zip::result::ZipError;

use crate::extract::TableCollection;

pub use naming::{artifact_name, is_valid_prefix};
pub use xlsx::CONTENT_TYPE;

/// Worksheet limits, header row included.
pub const MAX_ROWS: usize = 1_048_576;
pub const MAX_COLUMNS: usize = 16_384;

/// A workbook that has been fully written under the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
    pub tables: usize,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writing workbook {}: {source}", path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
    #[error("table {table} has {rows} rows and {columns} columns, more than a worksheet holds")]
    SheetTooLarge {
        table: usize,
        rows: usize,
        columns: usize,
    },
    #[error("invalid artifact prefix `{0}`")]
    InvalidPrefix(String),
}

/// Writes table collections as `.xlsx` workbooks into one directory.
#[derive(Debug, Clone)]
pub struct SpreadsheetExporter {
    root: PathBuf,
    prefix: String,
}

impl SpreadsheetExporter {
    /// Creates `root` if it does not exist yet.
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self, ExportError> {
        let root = root.into();
        let prefix = prefix.into();
        if !is_valid_prefix(&prefix) {
            return Err(ExportError::InvalidPrefix(prefix));
        }
        fs::create_dir_all(&root).map_err(|source| ExportError::Io {
            action: "creating storage root",
            path: root.clone(),
            source,
        })?;
        Ok(Self { root, prefix })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `tables` to a fresh artifact named after the current UTC time.
    /// A valid `name_hint` replaces the configured prefix for this one
    /// artifact.
    pub fn export(
        &self,
        tables: &TableCollection,
        name_hint: Option<&str>,
    ) -> Result<Artifact, ExportError> {
        self.export_at(tables, name_hint, Utc::now())
    }

    #[instrument(level = "info", skip(self, tables), fields(tables = tables.len()))]
    pub fn export_at(
        &self,
        tables: &TableCollection,
        name_hint: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Artifact, ExportError> {
        check_limits(tables)?;

        let prefix = match name_hint {
            Some(hint) if is_valid_prefix(hint) => hint,
            Some(hint) => {
                warn!(hint, "ignoring unusable name hint");
                &self.prefix
            }
            None => &self.prefix,
        };
        let name = artifact_name(prefix, &at);
        let path = self.root.join(&name);

        self.write_atomically(&path, &name, tables, at)?;

        info!(artifact = %name, "workbook written");
        Ok(Artifact {
            name,
            path,
            tables: tables.len(),
        })
    }

    /// Write into a hidden temp file beside `path`, then rename over it, so
    /// readers only ever see complete workbooks. The temp file is removed
    /// if anything fails before the rename.
    fn write_atomically(
        &self,
        path: &Path,
        name: &str,
        tables: &TableCollection,
        created: DateTime<Utc>,
    ) -> Result<(), ExportError> {
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".tmp")
            .tempfile_in(&self.root)
            .map_err(io_error("creating temp file in", &self.root))?;
        let tmp_path = tmp.path().to_path_buf();

        let sink = BufWriter::new(tmp.as_file_mut());
        let mut sink = xlsx::write_workbook(sink, tables, created).map_err(|source| {
            ExportError::Zip {
                path: path.to_path_buf(),
                source,
            }
        })?;
        sink.flush().map_err(io_error("flushing", &tmp_path))?;
        drop(sink);
        tmp.as_file()
            .sync_all()
            .map_err(io_error("syncing", &tmp_path))?;

        tmp.persist(path).map_err(|e| ExportError::Io {
            action: "renaming temp file to",
            path: path.to_path_buf(),
            source: e.error,
        })?;
        Ok(())
    }
}

fn io_error(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> ExportError {
    let path = path.to_path_buf();
    move |source| ExportError::Io {
        action,
        path,
        source,
    }
}

fn check_limits(tables: &TableCollection) -> Result<(), ExportError> {
    for (i, t) in tables.iter().enumerate() {
        let rows = t.rows.len() + 1;
        let columns = t.width();
        if rows > MAX_ROWS || columns > MAX_COLUMNS {
            return Err(ExportError::SheetTooLarge {
                table: i + 1,
                rows,
                columns,
            });
        }
    }
    Ok(())
}
