// src/fetch/readiness.rs

use anyhow::{bail, Result};
use chromiumoxide::page::Page;
use std::{future::Future, time::Duration};
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::config::ReadinessConfig;

/// What a scripted fetch waits for before reading the rendered markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Fixed settle interval.
    Settle(Duration),
    /// Poll every `poll` until `selector` matches, for at most `timeout`.
    Selector {
        selector: String,
        timeout: Duration,
        poll: Duration,
    },
}

impl Readiness {
    pub fn from_config(cfg: &ReadinessConfig) -> Self {
        match cfg {
            ReadinessConfig::Settle { millis } => Readiness::Settle(Duration::from_millis(*millis)),
            ReadinessConfig::Selector {
                selector,
                timeout_ms,
                poll_ms,
            } => Readiness::Selector {
                selector: selector.clone(),
                timeout: Duration::from_millis(*timeout_ms),
                poll: Duration::from_millis((*poll_ms).max(1)),
            },
        }
    }

    pub async fn wait(&self, page: &Page) -> Result<()> {
        match self {
            Readiness::Settle(interval) => {
                debug!(?interval, "settling");
                sleep(*interval).await;
                Ok(())
            }
            Readiness::Selector {
                selector,
                timeout,
                poll,
            } => {
                let sel = selector.as_str();
                let ready = poll_until(*timeout, *poll, move || async move {
                    page.find_element(sel).await.is_ok()
                })
                .await;
                if !ready {
                    bail!("`{selector}` did not appear within {timeout:?}");
                }
                Ok(())
            }
        }
    }
}

/// Run `check` until it returns true or `timeout` elapses. The check always
/// runs at least once.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(interval.min(deadline - now)).await;
    }
}
