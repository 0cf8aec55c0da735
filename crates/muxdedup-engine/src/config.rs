use std::time::Duration;

use muxdedup_storage::{AuthMode, HttpClientConfig};
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://localhost:9981/api";
pub const DEFAULT_MUX_CLASS: &str = "dvb_mux_dvbs";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no credentials: set TVH_USER and TVH_PASS")]
    MissingCredentials,
    #[error("invalid TVH_AUTH: {0}")]
    InvalidAuth(String),
    #[error("invalid TVH_API_URL '{0}': expected an http:// or https:// URL")]
    InvalidApiUrl(String),
    #[error("invalid TVH_HTTP_TIMEOUT_SECS '{0}'")]
    InvalidTimeout(String),
    #[error("--snapshot runs are dry-run only")]
    LiveSnapshot,
}

/// Per-invocation switches, threaded explicitly into the transport and executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    pub debug: bool,
    pub dry_run: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            debug: false,
            dry_run: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub api_url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub auth: AuthMode,
    pub mux_class: String,
    pub http_timeout_secs: u64,
}

impl DedupConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_url = non_empty("TVH_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidApiUrl(api_url));
        }

        let auth = non_empty("TVH_AUTH")
            .unwrap_or_else(|| "digest".to_string())
            .parse::<AuthMode>()
            .map_err(ConfigError::InvalidAuth)?;

        let http_timeout_secs = match non_empty("TVH_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidTimeout(raw))?,
            None => 30,
        };

        Ok(Self {
            api_url,
            user: non_empty("TVH_USER"),
            password: non_empty("TVH_PASS"),
            auth,
            mux_class: mux_class_from_lookup(&lookup),
            http_timeout_secs,
        })
    }

    /// Transport settings for a live server; credentials are mandatory here.
    pub fn http_client_config(&self, run: RunConfig) -> Result<HttpClientConfig, ConfigError> {
        let (Some(user), Some(password)) = (&self.user, &self.password) else {
            return Err(ConfigError::MissingCredentials);
        };
        Ok(HttpClientConfig {
            api_url: self.api_url.clone(),
            user: user.clone(),
            password: password.clone(),
            auth: self.auth,
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(format!("muxdedup/{}", env!("CARGO_PKG_VERSION"))),
            debug: run.debug,
        })
    }
}

/// The mux class to scan. This is the only setting a `--snapshot` run reads.
pub fn mux_class_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup("TVH_MUX_CLASS")
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MUX_CLASS.to_string())
}
