// src/pipeline.rs

use anyhow::{Context, Result};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};
use url::Url;

use crate::config::Config;
use crate::export::{Artifact, ExportError, SpreadsheetExporter};
use crate::extract::TableExtractor;
use crate::fetch::{self, FetchError, PageFetcher};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid url `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no tables found at {0}")]
    NoTables(Url),
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
}

impl PipelineError {
    /// HTTP status the shell answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::InvalidUrl { .. } => 400,
            PipelineError::NoTables(_) => 404,
            PipelineError::Fetch(_) | PipelineError::Export(_) => 500,
        }
    }
}

/// fetch → extract → export, for one URL at a time.
#[derive(Clone)]
pub struct Pipeline {
    fetcher: Arc<dyn PageFetcher>,
    extractor: TableExtractor,
    exporter: Arc<SpreadsheetExporter>,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        extractor: TableExtractor,
        exporter: SpreadsheetExporter,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            exporter: Arc::new(exporter),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let fetcher = fetch::build_fetcher(&cfg.fetch).context("building page fetcher")?;
        let exporter = SpreadsheetExporter::new(&cfg.storage_root, cfg.export.prefix.clone())
            .context("preparing storage root")?;
        Ok(Self::new(
            fetcher,
            TableExtractor::new(cfg.extract.header),
            exporter,
        ))
    }

    pub fn exporter(&self) -> &SpreadsheetExporter {
        &self.exporter
    }

    /// Absolute `http`/`https` URLs only.
    pub fn parse_url(input: &str) -> Result<Url, PipelineError> {
        let invalid = |reason: String| PipelineError::InvalidUrl {
            input: input.to_string(),
            reason,
        };
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("url is empty".into()));
        }
        let url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" if url.host().is_some() => Ok(url),
            "http" | "https" => Err(invalid("missing host".into())),
            other => Err(invalid(format!("unsupported scheme `{other}`"))),
        }
    }

    #[instrument(level = "info", skip(self, url), fields(url = %url))]
    pub async fn run(&self, url: &Url, name_hint: Option<&str>) -> Result<Artifact, PipelineError> {
        let doc = self.fetcher.fetch(url).await.map_err(|e| {
            error!(error = %e, "fetch failed");
            e
        })?;

        let extractor = self.extractor.clone();
        let exporter = Arc::clone(&self.exporter);
        let hint = name_hint.map(str::to_owned);
        let outcome = tokio::task::spawn_blocking(move || {
            extractor
                .extract(&doc)
                .map(|tables| exporter.export(&tables, hint.as_deref()))
        })
        .await
        .map_err(|e| {
            PipelineError::Export(ExportError::Io {
                action: "running export task for",
                path: self.exporter.root().to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })
        })?;

        match outcome {
            None => {
                info!("no tables found");
                Err(PipelineError::NoTables(url.clone()))
            }
            Some(Err(e)) => {
                error!(error = %e, "export failed");
                Err(e.into())
            }
            Some(Ok(artifact)) => {
                info!(artifact = %artifact.name, tables = artifact.tables, "pipeline finished");
                Ok(artifact)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactResolver, ResolveError};
    use crate::export::xlsx;
    use crate::extract::HeaderPolicy;
    use crate::fetch::{HttpFetcher, SourceDocument};
    use async_trait::async_trait;
    use calamine::Data;
    use std::path::Path;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FailingFetcher;

    #[async_trait]
    impl PageFetcher for FailingFetcher {
        async fn fetch(&self, url: &Url) -> Result<SourceDocument, FetchError> {
            Err(FetchError {
                url: url.clone(),
                reason: "connection refused".into(),
            })
        }
    }

    struct FixedPage(&'static str);

    #[async_trait]
    impl PageFetcher for FixedPage {
        async fn fetch(&self, url: &Url) -> Result<SourceDocument, FetchError> {
            Ok(SourceDocument {
                url: url.clone(),
                markup: self.0.to_string(),
            })
        }
    }

    fn pipeline(fetcher: Arc<dyn PageFetcher>, root: &Path) -> Pipeline {
        Pipeline::new(
            fetcher,
            TableExtractor::new(HeaderPolicy::Infer),
            SpreadsheetExporter::new(root, "donnees").unwrap(),
        )
    }

    fn is_empty_dir(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn parse_url_accepts_http_and_https() {
        assert!(Pipeline::parse_url("https://example.com/a?b=c").is_ok());
        assert!(Pipeline::parse_url("  http://localhost:8080/ ").is_ok());
    }

    #[test]
    fn parse_url_rejects_everything_else() {
        for bad in ["", "   ", "example.com", "ftp://example.com/x", "file:///etc/passwd", "http://"] {
            let err = Pipeline::parse_url(bad).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidUrl { .. }), "{bad:?}");
            assert_eq!(err.status_code(), 400);
        }
    }

    #[tokio::test]
    async fn end_to_end_against_http_origin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><body>\
                 <table><tr><th>a</th><th>b</th></tr><tr><td>1</td><td>2</td></tr></table>\
                 </body></html>",
            ))
            .mount(&server)
            .await;

        let tmp = tempdir().unwrap();
        let fetcher = Arc::new(HttpFetcher::new(reqwest::Client::new()));
        let p = pipeline(fetcher, tmp.path());
        let url = Pipeline::parse_url(&format!("{}/stats", server.uri())).unwrap();

        let artifact = p.run(&url, None).await.unwrap();
        assert!(artifact.name.starts_with("donnees-"));
        assert_eq!(artifact.tables, 1);

        let resolved = ArtifactResolver::new(tmp.path())
            .resolve(&artifact.name)
            .await
            .unwrap();
        let book = xlsx::read_workbook(&resolved.bytes);
        assert_eq!(
            book,
            vec![(
                "Table_1".to_string(),
                vec![
                    vec![Data::String("a".into()), Data::String("b".into())],
                    vec![Data::Float(1.0), Data::Float(2.0)]
                ]
            )]
        );
    }

    #[tokio::test]
    async fn fetch_failure_leaves_storage_empty() {
        let tmp = tempdir().unwrap();
        let p = pipeline(Arc::new(FailingFetcher), tmp.path());
        let url = Url::parse("https://unreachable.example/").unwrap();

        let err = p.run(&url, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Fetch(_)));
        assert_eq!(err.status_code(), 500);
        assert!(is_empty_dir(tmp.path()));

        let resolve = ArtifactResolver::new(tmp.path())
            .resolve("donnees-2024-01-01-00-00-00.xlsx")
            .await;
        assert!(matches!(resolve, Err(ResolveError::NotFound(_))));
    }

    #[tokio::test]
    async fn page_without_tables_is_no_tables() {
        let tmp = tempdir().unwrap();
        let p = pipeline(Arc::new(FixedPage("<p>nothing here</p>")), tmp.path());
        let url = Url::parse("https://example.com/").unwrap();

        let err = p.run(&url, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoTables(_)));
        assert_eq!(err.status_code(), 404);
        assert!(is_empty_dir(tmp.path()));
    }

    #[tokio::test]
    async fn name_hint_reaches_exporter() {
        let tmp = tempdir().unwrap();
        let p = pipeline(
            Arc::new(FixedPage("<table><tr><td>x</td></tr></table>")),
            tmp.path(),
        );
        let url = Url::parse("https://example.com/").unwrap();
        let artifact = p.run(&url, Some("quarterly")).await.unwrap();
        assert!(artifact.name.starts_with("quarterly-"));
    }

    #[test]
    fn from_config_creates_storage_root() {
        let tmp = tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.storage_root = tmp.path().join("store");
        let p = Pipeline::from_config(&cfg).unwrap();
        assert!(p.exporter().root().is_dir());
    }
}
