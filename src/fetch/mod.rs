// src/fetch/mod.rs

pub mod auth;
pub mod browser;
pub mod http;
pub mod readiness;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::config::{FetchConfig, FetchMode};

pub use auth::{AuthStrategy, CredentialsProvider, EnvCredentials, StaticCredentials};
pub use browser::BrowserFetcher;
pub use http::HttpFetcher;
pub use readiness::Readiness;

/// Raw markup of one page and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub url: Url,
    pub markup: String,
}

/// Any failure to obtain a page. Callers never need to tell transport,
/// status, browser and login failures apart, so there is a single kind.
#[derive(Debug, Error)]
#[error("fetching {url} failed: {reason}")]
pub struct FetchError {
    pub url: Url,
    pub reason: String,
}

impl FetchError {
    /// Flatten an `anyhow` chain into the reason text.
    pub fn new(url: &Url, err: anyhow::Error) -> Self {
        Self {
            url: url.clone(),
            reason: format!("{err:#}"),
        }
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<SourceDocument, FetchError>;
}

/// Build the fetcher selected by `cfg.mode`.
pub fn build_fetcher(cfg: &FetchConfig) -> Result<Arc<dyn PageFetcher>> {
    Ok(match cfg.mode {
        FetchMode::Static => Arc::new(HttpFetcher::from_config(cfg)?),
        FetchMode::Scripted => Arc::new(BrowserFetcher::from_config(cfg)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[test]
    fn fetch_error_keeps_whole_chain() {
        let url = Url::parse("https://example.com/x").unwrap();
        let err = Err::<(), _>(anyhow!("connection reset"))
            .context("GET https://example.com/x")
            .unwrap_err();
        let fe = FetchError::new(&url, err);
        assert_eq!(fe.reason, "GET https://example.com/x: connection reset");
        assert!(fe.to_string().starts_with("fetching https://example.com/x failed"));
    }

    #[test]
    fn builds_static_fetcher_by_default() {
        assert!(build_fetcher(&FetchConfig::default()).is_ok());
    }
}
