// src/fetch/browser.rs

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as LaunchConfig};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};
use tempfile::TempDir;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::auth::{AuthStrategy, FormLogin};
use super::readiness::Readiness;
use super::{FetchError, PageFetcher, SourceDocument};
use crate::config::FetchConfig;

/// Locate a Chromium binary: the configured path, then `$CHROME`, then the
/// usual names on `PATH`.
pub fn find_chrome(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env::var_os("CHROME") {
        return Some(PathBuf::from(path));
    }
    [
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ]
    .iter()
    .find_map(|bin| which::which(bin).ok())
}

/// Renders pages in a throwaway headless Chromium, logging in first when the
/// auth strategy asks for it.
#[derive(Debug, Clone)]
pub struct BrowserFetcher {
    chrome: Option<PathBuf>,
    auth: AuthStrategy,
    readiness: Readiness,
    login_settle: Duration,
    timeout: Duration,
}

impl BrowserFetcher {
    pub fn new(auth: AuthStrategy, readiness: Readiness) -> Self {
        Self {
            chrome: find_chrome(None),
            auth,
            readiness,
            login_settle: Duration::from_secs(3),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(cfg: &FetchConfig) -> Result<Self> {
        let browser = &cfg.browser;
        let auth = AuthStrategy::from_config(&browser.auth).context("browser auth config")?;
        Ok(Self {
            chrome: find_chrome(browser.chrome_path.as_deref()),
            auth,
            readiness: Readiness::from_config(&browser.readiness),
            login_settle: Duration::from_millis(browser.login_settle_ms),
            timeout: cfg.timeout(),
        })
    }

    pub fn with_chrome(mut self, path: impl Into<PathBuf>) -> Self {
        self.chrome = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_login_settle(mut self, settle: Duration) -> Self {
        self.login_settle = settle;
        self
    }

    /// Launch, drive, and always close the session.
    async fn render(&self, url: &Url) -> Result<String> {
        let session = tokio::time::timeout(self.timeout, BrowserSession::launch(self.chrome.as_deref()))
            .await
            .map_err(|_| anyhow!("launching Chromium timed out after {:?}", self.timeout))??;

        let outcome = tokio::time::timeout(self.timeout, self.drive(&session.browser, url))
            .await
            .unwrap_or_else(|_| Err(anyhow!("browser session timed out after {:?}", self.timeout)));

        session.close().await;
        outcome
    }

    async fn drive(&self, browser: &Browser, url: &Url) -> Result<String> {
        let page = browser
            .new_page(url.as_str())
            .await
            .with_context(|| format!("opening {url}"))?;
        page.wait_for_navigation()
            .await
            .with_context(|| format!("navigating to {url}"))?;

        if let Some(login) = self.auth.login_for(url) {
            info!(%url, "login form expected");
            let fields = login.resolve_fields()?;
            sleep(self.login_settle).await;
            submit_login(&page, login, &fields).await?;
            sleep(self.login_settle).await;
        }

        self.readiness.wait(&page).await.context("waiting for page")?;
        page.content().await.context("reading rendered markup")
    }
}

async fn submit_login(page: &Page, login: &FormLogin, fields: &[(String, String)]) -> Result<()> {
    let mut last: Option<Element> = None;
    for (selector, value) in fields {
        let el = page
            .find_element(selector.as_str())
            .await
            .with_context(|| format!("login field {selector} not found"))?;
        el.click()
            .await
            .with_context(|| format!("focusing {selector}"))?
            .type_str(value)
            .await
            .with_context(|| format!("typing into {selector}"))?;
        last = Some(el);
    }

    match (&login.submit_selector, last) {
        (Some(submit), _) => {
            page.find_element(submit.as_str())
                .await
                .with_context(|| format!("submit control {submit} not found"))?
                .click()
                .await
                .context("clicking submit")?;
        }
        (None, Some(el)) => {
            el.press_key("Enter").await.context("submitting login form")?;
        }
        (None, None) => {}
    }
    debug!("login submitted");
    Ok(())
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    #[instrument(level = "info", skip(self), fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<SourceDocument, FetchError> {
        let markup = self.render(url).await.map_err(|e| {
            warn!(error = %format!("{e:#}"), "scripted fetch failed");
            FetchError::new(url, e)
        })?;
        Ok(SourceDocument {
            url: url.clone(),
            markup,
        })
    }
}

/// One Chromium process with its own profile directory, used for a single
/// fetch. Dropping it aborts the event loop and kills the process; `close`
/// shuts it down politely first.
struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    _profile: TempDir,
}

impl BrowserSession {
    async fn launch(chrome: Option<&Path>) -> Result<Self> {
        let profile = tempfile::Builder::new()
            .prefix("tablescraper-profile-")
            .tempdir()
            .context("creating browser profile dir")?;

        let mut builder = LaunchConfig::builder()
            .user_data_dir(profile.path())
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking");
        if let Some(path) = chrome {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser,
            handler,
            _profile: profile,
        })
    }

    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "closing browser");
        }
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "waiting for browser exit");
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}
