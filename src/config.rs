// src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::info;

use crate::extract::HeaderPolicy;

/// Env var naming an optional YAML config file.
pub const CONFIG_PATH_ENV: &str = "TABLESCRAPER_CONFIG";

/// Process-wide configuration. Loaded once at startup, then handed to
/// constructors; nothing re-reads it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub listen: SocketAddr,
    pub storage_root: PathBuf,
    pub export: ExportConfig,
    pub extract: ExtractConfig,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    pub prefix: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractConfig {
    pub header: HeaderPolicy,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    #[default]
    Static,
    Scripted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub mode: FetchMode,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Extra attempts after the first one. 0 keeps the single-shot behaviour.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub browser: BrowserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BrowserConfig {
    pub chrome_path: Option<PathBuf>,
    pub login_settle_ms: u64,
    pub readiness: ReadinessConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ReadinessConfig {
    Settle {
        millis: u64,
    },
    Selector {
        selector: String,
        timeout_ms: u64,
        poll_ms: u64,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum AuthConfig {
    #[default]
    None,
    FormLogin {
        /// Regex tested against the full URL.
        url_pattern: String,
        /// Filled in order; Enter is pressed in the last one when there is
        /// no submit selector.
        fields: Vec<LoginField>,
        #[serde(default)]
        submit_selector: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoginField {
    /// The form control's `name` attribute.
    pub name: String,
    /// Environment variable holding the value.
    pub env: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            storage_root: PathBuf::from("artifacts"),
            export: ExportConfig::default(),
            extract: ExtractConfig::default(),
            fetch: FetchConfig::default(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            prefix: "donnees".to_string(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mode: FetchMode::Static,
            timeout_secs: 30,
            user_agent: concat!("tablescraper/", env!("CARGO_PKG_VERSION")).to_string(),
            max_retries: 0,
            retry_backoff_ms: 500,
            browser: BrowserConfig::default(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            login_settle_ms: 3_000,
            readiness: ReadinessConfig::Settle { millis: 5_000 },
            auth: AuthConfig::None,
        }
    }
}

impl Config {
    /// Parse a YAML document. Missing keys fall back to defaults.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing YAML config")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("in {}", path.display()))
    }

    /// File named by `TABLESCRAPER_CONFIG` (if any), then env overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = match env::var_os(CONFIG_PATH_ENV) {
            Some(path) => {
                info!(path = ?path, "loading config file");
                Self::from_file(PathBuf::from(path))?
            }
            None => Self::default(),
        };
        cfg.apply_overrides(|key| env::var(key).ok())?;
        Ok(cfg)
    }

    /// Apply environment overrides through `lookup` so tests need not touch
    /// the real process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("TABLESCRAPER_LISTEN") {
            self.listen = addr
                .parse()
                .with_context(|| format!("TABLESCRAPER_LISTEN={addr}"))?;
        } else if let Some(port) = lookup("PORT") {
            let port: u16 = port.parse().with_context(|| format!("PORT={port}"))?;
            self.listen.set_port(port);
        }
        if let Some(root) = lookup("TABLESCRAPER_STORAGE_ROOT") {
            self.storage_root = PathBuf::from(root);
        }
        if let Some(mode) = lookup("TABLESCRAPER_FETCH_MODE") {
            self.fetch.mode = match mode.to_ascii_lowercase().as_str() {
                "static" => FetchMode::Static,
                "scripted" => FetchMode::Scripted,
                other => anyhow::bail!("TABLESCRAPER_FETCH_MODE: unknown mode `{other}`"),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_yaml_gives_defaults() {
        let cfg = Config::from_yaml("{}").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.export.prefix, "donnees");
        assert_eq!(cfg.fetch.mode, FetchMode::Static);
        assert_eq!(cfg.fetch.max_retries, 0);
    }

    #[test]
    fn parses_full_document() {
        let yaml = r#"
listen: 127.0.0.1:9000
storage_root: /tmp/out
export:
  prefix: tables
extract:
  header: first_row
fetch:
  mode: scripted
  timeout_secs: 5
  browser:
    login_settle_ms: 100
    readiness:
      kind: selector
      selector: "table"
      timeout_ms: 2000
      poll_ms: 50
    auth:
      kind: form_login
      url_pattern: "(?i)login"
      fields:
        - name: username
          env: SITE_USER
        - name: password
          env: SITE_PASSWORD
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.listen.port(), 9000);
        assert_eq!(cfg.storage_root, PathBuf::from("/tmp/out"));
        assert_eq!(cfg.export.prefix, "tables");
        assert_eq!(cfg.extract.header, HeaderPolicy::FirstRow);
        assert_eq!(cfg.fetch.mode, FetchMode::Scripted);
        assert_eq!(cfg.fetch.timeout(), Duration::from_secs(5));
        assert_eq!(
            cfg.fetch.browser.readiness,
            ReadinessConfig::Selector {
                selector: "table".into(),
                timeout_ms: 2000,
                poll_ms: 50
            }
        );
        match cfg.fetch.browser.auth {
            AuthConfig::FormLogin {
                url_pattern,
                fields,
                submit_selector,
            } => {
                assert_eq!(url_pattern, "(?i)login");
                let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
                assert_eq!(names, vec!["username", "password"]);
                assert_eq!(fields[1].env, "SITE_PASSWORD");
                assert!(submit_selector.is_none());
            }
            other => panic!("unexpected auth {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(Config::from_yaml("stroage_root: x").is_err());
        assert!(Config::from_yaml("fetch: { mode: telepathy }").is_err());
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "3000"),
            ("TABLESCRAPER_STORAGE_ROOT", "/srv/xlsx"),
            ("TABLESCRAPER_FETCH_MODE", "Scripted"),
        ]
        .into_iter()
        .collect();
        let mut cfg = Config::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.listen, SocketAddr::from(([0, 0, 0, 0], 3000)));
        assert_eq!(cfg.storage_root, PathBuf::from("/srv/xlsx"));
        assert_eq!(cfg.fetch.mode, FetchMode::Scripted);
    }

    #[test]
    fn bad_override_is_an_error() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_overrides(|k| (k == "PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
