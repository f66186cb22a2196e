// src/fetch/http.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{FetchError, PageFetcher, SourceDocument};
use crate::config::FetchConfig;

/// Plain GET fetcher. Non-2xx statuses are failures like any transport
/// error.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
    initial_backoff: Duration,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            max_retries: 0,
            initial_backoff: Duration::from_millis(500),
        }
    }

    pub fn from_config(cfg: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(cfg.timeout())
            .user_agent(cfg.user_agent.clone())
            .build()
            .context("building HTTP client")?;
        Ok(Self::new(client).with_retries(
            cfg.max_retries,
            Duration::from_millis(cfg.retry_backoff_ms),
        ))
    }

    /// Retry up to `max_retries` extra times, doubling the delay each time.
    pub fn with_retries(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    async fn get_text_core(&self, url: &Url) -> Result<String> {
        debug!("Fetching text from {}", url);
        self.client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("Non-success status {}", url))?
            .text()
            .await
            .with_context(|| format!("Reading text from {}", url))
    }

    async fn get_text_with_retry(&self, url: &Url) -> Result<String> {
        let mut attempts = 0;
        loop {
            match self.get_text_core(url).await {
                Ok(t) => return Ok(t),
                Err(e) if attempts < self.max_retries => {
                    attempts += 1;
                    let backoff = self.initial_backoff.saturating_mul(2u32.saturating_pow(attempts - 1));
                    warn!(%url, attempt = attempts, delay_ms = backoff.as_millis() as u64, error = %e, "Retrying");
                    sleep(backoff).await;
                }
                Err(e) => {
                    warn!(%url, attempts = attempts + 1, error = %format!("{e:#}"), "giving up");
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    #[instrument(level = "info", skip(self), fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<SourceDocument, FetchError> {
        let markup = self
            .get_text_with_retry(url)
            .await
            .map_err(|e| FetchError::new(url, e))?;
        Ok(SourceDocument {
            url: url.clone(),
            markup,
        })
    }
}
