// src/artifact.rs

use std::{io, path::PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use crate::export::CONTENT_TYPE;

/// Bytes of a stored artifact, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("artifact `{0}` not found")]
    NotFound(String),
    #[error("reading artifact `{name}`: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Looks artifacts up by bare file name under the storage root. Anything
/// that could name a file outside the root, or a temp file, is treated as
/// not found.
#[derive(Debug, Clone)]
pub struct ArtifactResolver {
    root: PathBuf,
}

impl ArtifactResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn resolve(&self, name: &str) -> Result<ResolvedArtifact, ResolveError> {
        if !is_plain_name(name) {
            warn!(name, "rejected artifact name");
            return Err(ResolveError::NotFound(name.to_string()));
        }

        let path = self.root.join(name);
        let (root, real) = match (fs::canonicalize(&self.root).await, fs::canonicalize(&path).await) {
            (Ok(root), Ok(real)) => (root, real),
            (_, Err(e)) | (Err(e), _) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ResolveError::NotFound(name.to_string()))
            }
            (_, Err(source)) | (Err(source), _) => {
                return Err(ResolveError::Io {
                    name: name.to_string(),
                    source,
                })
            }
        };
        if real.parent() != Some(root.as_path()) {
            warn!(name, path = %real.display(), "artifact resolves outside storage root");
            return Err(ResolveError::NotFound(name.to_string()));
        }

        match fs::metadata(&real).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(ResolveError::NotFound(name.to_string())),
            Err(source) => {
                return Err(ResolveError::Io {
                    name: name.to_string(),
                    source,
                })
            }
        }

        let bytes = fs::read(&real).await.map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ResolveError::NotFound(name.to_string()),
            _ => ResolveError::Io {
                name: name.to_string(),
                source,
            },
        })?;
        debug!(name, size = bytes.len(), "artifact resolved");

        Ok(ResolvedArtifact {
            name: name.to_string(),
            bytes,
            content_type: CONTENT_TYPE,
        })
    }
}

/// A single path component that is not hidden and carries no separators.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && !name.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::SpreadsheetExporter;
    use crate::extract::{CellValue, ExtractedTable, TableCollection};
    use tempfile::tempdir;

    #[test]
    fn plain_names() {
        assert!(is_plain_name("donnees-2024-01-01-00-00-00.xlsx"));
        for bad in ["", "../secret", "a/b", "a\\b", ".hidden", "x..y", "nul\0"] {
            assert!(!is_plain_name(bad), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn resolves_exported_artifact() {
        let tmp = tempdir().unwrap();
        let exporter = SpreadsheetExporter::new(tmp.path(), "donnees").unwrap();
        let tables = TableCollection::new(vec![ExtractedTable {
            position: 0,
            header: vec!["a".into()],
            rows: vec![vec![CellValue::Int(1)]],
        }])
        .unwrap();
        let artifact = exporter.export(&tables, None).unwrap();

        let resolver = ArtifactResolver::new(tmp.path());
        let got = resolver.resolve(&artifact.name).await.unwrap();
        assert_eq!(got.name, artifact.name);
        assert_eq!(got.content_type, CONTENT_TYPE);
        assert_eq!(got.bytes, std::fs::read(&artifact.path).unwrap());
    }

    #[tokio::test]
    async fn resolved_workbook_opens_in_a_spreadsheet_reader() {
        use calamine::{open_workbook, Data, Reader, Xlsx};

        let tmp = tempdir().unwrap();
        let exporter = SpreadsheetExporter::new(tmp.path(), "donnees").unwrap();
        let tables = TableCollection::new(vec![ExtractedTable {
            position: 0,
            header: vec!["a".into(), "b".into()],
            rows: vec![vec![CellValue::infer("1"), CellValue::infer("2")]],
        }])
        .unwrap();
        let artifact = exporter.export(&tables, None).unwrap();
        let resolved = ArtifactResolver::new(tmp.path())
            .resolve(&artifact.name)
            .await
            .unwrap();

        let copy = tmp.path().join("downloaded.xlsx");
        std::fs::write(&copy, &resolved.bytes).unwrap();
        let mut book: Xlsx<_> = open_workbook(&copy).unwrap();
        assert_eq!(book.sheet_names(), vec!["Table_1".to_string()]);
        let range = book.worksheet_range("Table_1").unwrap();
        let rows: Vec<Vec<Data>> = range.rows().map(|r| r.to_vec()).collect();
        assert_eq!(
            rows,
            vec![
                vec![Data::String("a".into()), Data::String("b".into())],
                vec![Data::Float(1.0), Data::Float(2.0)],
            ]
        );
    }

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let tmp = tempdir().unwrap();
        let resolver = ArtifactResolver::new(tmp.path());
        let err = resolver.resolve("donnees-1999-01-01-00-00-00.xlsx").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_root_is_not_found() {
        let tmp = tempdir().unwrap();
        let resolver = ArtifactResolver::new(tmp.path().join("never-created"));
        let err = resolver.resolve("x.xlsx").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn traversal_is_not_found() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("store");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(tmp.path().join("secret"), b"nope").unwrap();

        let resolver = ArtifactResolver::new(&root);
        for name in ["../secret", "..", "/etc/passwd", ".tmp"] {
            let err = resolver.resolve(name).await.unwrap_err();
            assert!(matches!(err, ResolveError::NotFound(_)), "{name}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_out_of_root_is_not_found() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("store");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(tmp.path().join("secret.xlsx"), b"nope").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("secret.xlsx"), root.join("link.xlsx")).unwrap();

        let resolver = ArtifactResolver::new(&root);
        let err = resolver.resolve("link.xlsx").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn directory_is_not_found() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("sub.xlsx")).unwrap();
        let resolver = ArtifactResolver::new(tmp.path());
        let err = resolver.resolve("sub.xlsx").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }
}
