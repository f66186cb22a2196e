// src/fetch/auth.rs

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::{
    collections::{BTreeMap, HashMap},
    env, fmt,
    sync::Arc,
};
use url::Url;

use crate::config::{AuthConfig, LoginField};

/// Source of the values typed into login form fields.
pub trait CredentialsProvider: Send + Sync + fmt::Debug {
    /// Value for the form field called `field`, if any.
    fn credential(&self, field: &str) -> Option<String>;
}

/// Reads each field's value from an environment variable, looked up at
/// login time so secrets are never copied into the config.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    /// field name → env var name
    vars: BTreeMap<String, String>,
}

impl EnvCredentials {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    pub fn from_fields(fields: &[LoginField]) -> Self {
        Self::new(
            fields
                .iter()
                .map(|f| (f.name.clone(), f.env.clone()))
                .collect(),
        )
    }
}

impl CredentialsProvider for EnvCredentials {
    fn credential(&self, field: &str) -> Option<String> {
        self.vars.get(field).and_then(|var| env::var(var).ok())
    }
}

/// Fixed values; for tests and embedding.
#[derive(Clone, Default)]
pub struct StaticCredentials(HashMap<String, String>);

impl StaticCredentials {
    pub fn new<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // keys only
        f.debug_set().entries(self.0.keys()).finish()
    }
}

impl CredentialsProvider for StaticCredentials {
    fn credential(&self, field: &str) -> Option<String> {
        self.0.get(field).cloned()
    }
}

/// How a scripted fetch authenticates before reading the page.
#[derive(Debug, Clone, Default)]
pub enum AuthStrategy {
    #[default]
    None,
    FormLogin(FormLogin),
}

#[derive(Debug, Clone)]
pub struct FormLogin {
    pub url_pattern: Regex,
    /// Form field names, filled in this order.
    pub fields: Vec<String>,
    pub credentials: Arc<dyn CredentialsProvider>,
    /// Clicked to submit. Without it, Enter is pressed in the last field.
    pub submit_selector: Option<String>,
}

impl AuthStrategy {
    pub fn from_config(cfg: &AuthConfig) -> Result<Self> {
        Ok(match cfg {
            AuthConfig::None => AuthStrategy::None,
            AuthConfig::FormLogin {
                url_pattern,
                fields,
                submit_selector,
            } => {
                if fields.is_empty() {
                    anyhow::bail!("form_login needs at least one field");
                }
                let url_pattern = Regex::new(url_pattern)
                    .with_context(|| format!("invalid login url_pattern `{url_pattern}`"))?;
                AuthStrategy::FormLogin(FormLogin {
                    url_pattern,
                    fields: fields.iter().map(|f| f.name.clone()).collect(),
                    credentials: Arc::new(EnvCredentials::from_fields(fields)),
                    submit_selector: submit_selector.clone(),
                })
            }
        })
    }

    /// The login to perform for `url`, if any.
    pub fn login_for(&self, url: &Url) -> Option<&FormLogin> {
        match self {
            AuthStrategy::FormLogin(login) if login.url_pattern.is_match(url.as_str()) => {
                Some(login)
            }
            _ => None,
        }
    }
}

impl FormLogin {
    /// `(css selector, value)` for every field, or an error naming the first
    /// field without a credential.
    pub fn resolve_fields(&self) -> Result<Vec<(String, String)>> {
        self.fields
            .iter()
            .map(|field| {
                let value = self
                    .credentials
                    .credential(field)
                    .ok_or_else(|| anyhow!("no credential for login field `{field}`"))?;
                Ok((field_selector(field), value))
            })
            .collect()
    }
}

/// CSS selector for the form control named `name`.
pub fn field_selector(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("[name=\"{escaped}\"]")
}
