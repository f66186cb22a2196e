// src/server.rs

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::{error, info, instrument};

use crate::artifact::{ArtifactResolver, ResolveError};
use crate::config::Config;
use crate::pipeline::{Pipeline, PipelineError};

const WELCOME: &str = "tablescraper: POST /extract-tables with {\"url\": \"https://...\"}, \
then GET the returned download_link.";

#[derive(Clone)]
pub struct AppState {
    pipeline: Pipeline,
    resolver: ArtifactResolver,
}

impl AppState {
    pub fn new(pipeline: Pipeline, resolver: ArtifactResolver) -> Self {
        Self { pipeline, resolver }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let pipeline = Pipeline::from_config(cfg)?;
        let resolver = ArtifactResolver::new(&cfg.storage_root);
        Ok(Self::new(pipeline, resolver))
    }
}

#[derive(Debug, Deserialize)]
struct ExtractRequest {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExtractResponse {
    message: String,
    file_name: String,
    download_link: String,
    tables: usize,
}

/// Every failure leaves the shell as a status plus `{ "error": message }`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status =
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match &e {
            PipelineError::NoTables(_) => "no tables found on the page".to_string(),
            other => other.to_string(),
        };
        Self::new(status, message)
    }
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NotFound(name) => {
                Self::new(StatusCode::NOT_FOUND, format!("file `{name}` not found"))
            }
            other => {
                error!(error = %other, "download failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/extract-tables", post(extract_tables))
        .route("/download/:name", get(download))
        .with_state(state)
}

async fn welcome() -> &'static str {
    WELCOME
}

#[instrument(level = "info", skip_all)]
async fn extract_tables(
    State(state): State<AppState>,
    body: Result<Json<ExtractRequest>, JsonRejection>,
) -> Result<Json<ExtractResponse>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;
    let raw = req
        .url
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "url is required"))?;
    let url = Pipeline::parse_url(&raw)?;

    let artifact = state.pipeline.run(&url, req.name.as_deref()).await?;
    info!(artifact = %artifact.name, "extraction served");

    Ok(Json(ExtractResponse {
        message: format!(
            "{} table(s) extracted into {}",
            artifact.tables, artifact.name
        ),
        download_link: format!("/download/{}", artifact.name),
        file_name: artifact.name,
        tables: artifact.tables,
    }))
}

#[instrument(level = "info", skip(state))]
async fn download(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let artifact = state.resolver.resolve(&name).await?;
    let disposition = format!("attachment; filename=\"{}\"", artifact.name);
    Ok((
        [
            (header::CONTENT_TYPE, artifact.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes,
    )
        .into_response())
}

/// Bind `cfg.listen` and serve until Ctrl-C.
pub async fn serve(cfg: &Config) -> Result<()> {
    let state = AppState::from_config(cfg)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("binding {}", cfg.listen))?;
    let addr: SocketAddr = listener.local_addr()?;
    info!(%addr, storage_root = %cfg.storage_root.display(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "installing Ctrl-C handler");
            }
            info!("shutting down");
        })
        .await
        .context("serving HTTP")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{SpreadsheetExporter, CONTENT_TYPE};
    use crate::extract::{HeaderPolicy, TableExtractor};
    use crate::fetch::{FetchError, PageFetcher, SourceDocument};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;
    use url::Url;

    struct StubPage(Option<&'static str>);

    #[async_trait]
    impl PageFetcher for StubPage {
        async fn fetch(&self, url: &Url) -> Result<SourceDocument, FetchError> {
            match self.0 {
                Some(markup) => Ok(SourceDocument {
                    url: url.clone(),
                    markup: markup.to_string(),
                }),
                None => Err(FetchError {
                    url: url.clone(),
                    reason: "HTTP status 502".into(),
                }),
            }
        }
    }

    fn app(page: Option<&'static str>) -> (Router, TempDir) {
        let tmp = tempdir().unwrap();
        let pipeline = Pipeline::new(
            Arc::new(StubPage(page)),
            TableExtractor::new(HeaderPolicy::Infer),
            SpreadsheetExporter::new(tmp.path(), "donnees").unwrap(),
        );
        let state = AppState::new(pipeline, ArtifactResolver::new(tmp.path()));
        (router(state), tmp)
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/extract-tables")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const ONE_TABLE: &str = "<table><tr><th>a</th><th>b</th></tr><tr><td>1</td><td>2</td></tr></table>";

    #[tokio::test]
    async fn welcome_page() {
        let (app, _tmp) = app(None);
        let resp = app.oneshot(get_req("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn extract_then_download() {
        let (app, _tmp) = app(Some(ONE_TABLE));

        let resp = app
            .clone()
            .oneshot(post_json(r#"{"url": "https://example.com/t"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        let name = body["file_name"].as_str().unwrap().to_string();
        assert!(name.starts_with("donnees-") && name.ends_with(".xlsx"));
        assert_eq!(body["tables"], 1);
        let link = body["download_link"].as_str().unwrap();
        assert_eq!(link, format!("/download/{name}"));

        let resp = app.oneshot(get_req(link)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], CONTENT_TYPE);
        assert_eq!(
            resp.headers()[header::CONTENT_DISPOSITION],
            format!("attachment; filename=\"{name}\"").as_str()
        );
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[tokio::test]
    async fn missing_url_is_bad_request() {
        let (app, _tmp) = app(Some(ONE_TABLE));
        let resp = app.oneshot(post_json("{}")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "url is required");
    }

    #[tokio::test]
    async fn malformed_body_and_url_are_bad_request() {
        let (app, _tmp) = app(Some(ONE_TABLE));
        for body in ["not json", r#"{"url": "ftp://example.com"}"#, r#"{"url": "nope"}"#] {
            let resp = app.clone().oneshot(post_json(body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
            assert!(json_body(resp).await["error"].is_string());
        }
    }

    #[tokio::test]
    async fn page_without_tables_is_not_found() {
        let (app, tmp) = app(Some("<p>no tables</p>"));
        let resp = app
            .oneshot(post_json(r#"{"url": "https://example.com/"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(resp).await["error"], "no tables found on the page");
        assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn fetch_failure_is_server_error() {
        let (app, _tmp) = app(None);
        let resp = app
            .oneshot(post_json(r#"{"url": "https://example.com/"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let err = json_body(resp).await["error"].as_str().unwrap().to_string();
        assert!(err.contains("HTTP status 502"), "{err}");
    }

    #[tokio::test]
    async fn unknown_and_traversal_downloads_are_not_found() {
        let (app, _tmp) = app(None);
        for uri in ["/download/donnees-2000-01-01-00-00-00.xlsx", "/download/..%2Fsecret"] {
            let resp = app.clone().oneshot(get_req(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
            assert!(json_body(resp).await["error"].is_string());
        }
    }
}
