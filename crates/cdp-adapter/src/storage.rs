//! Saved login state in the Playwright `storageState` JSON shape.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::{AdapterError, AdapterErrorKind};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StorageCookie>,
    /// Per-origin localStorage; kept for round-tripping, not applied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub origins: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Unix seconds; `-1` marks a session cookie.
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

impl StorageState {
    pub async fn load(path: &Path) -> Result<Self, AdapterError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("cannot read storage state {}: {err}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("invalid storage state {}: {err}", path.display()))
        })
    }

    /// `Network.setCookies` parameters. Cookies with neither a domain nor a
    /// url cannot be scoped and are skipped.
    pub fn cookie_params(&self) -> Vec<Value> {
        self.cookies
            .iter()
            .filter_map(|cookie| {
                let param = cookie.to_cdp();
                if param.is_none() {
                    warn!(name = %cookie.name, "storage cookie has no domain or url, skipped");
                }
                param
            })
            .collect()
    }
}

impl StorageCookie {
    fn to_cdp(&self) -> Option<Value> {
        let mut param = Map::new();
        param.insert("name".into(), json!(self.name));
        param.insert("value".into(), json!(self.value));

        match (&self.domain, &self.url) {
            (Some(domain), _) => {
                param.insert("domain".into(), json!(domain));
                param.insert("path".into(), json!(self.path.as_deref().unwrap_or("/")));
            }
            (None, Some(url)) => {
                param.insert("url".into(), json!(url));
                if let Some(path) = &self.path {
                    param.insert("path".into(), json!(path));
                }
            }
            (None, None) => return None,
        }

        if let Some(expires) = self.expires.filter(|e| *e > 0.0) {
            param.insert("expires".into(), json!(expires));
        }
        param.insert("httpOnly".into(), json!(self.http_only));
        param.insert("secure".into(), json!(self.secure));
        if let Some(same_site) = self
            .same_site
            .as_deref()
            .filter(|s| matches!(*s, "Strict" | "Lax" | "None"))
        {
            param.insert("sameSite".into(), json!(same_site));
        }
        Some(Value::Object(param))
    }
}
