//! Client configuration management.
//!
//! The API base URL is mandatory: without it there is nothing to talk to, so a
//! missing value is a startup error rather than something recovered from at
//! runtime. Values come from `~/.config/talentgate/config.json` and are
//! overridden by `TALENTGATE_*` environment variables.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{Host, Url};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "talentgate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_API_URL: &str = "TALENTGATE_API_URL";
pub const ENV_LOGIN_URL: &str = "TALENTGATE_LOGIN_URL";
pub const ENV_REQUEST_TIMEOUT: &str = "TALENTGATE_REQUEST_TIMEOUT_SECS";

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Path of the login entry point relative to the application origin.
const LOGIN_PATH: &str = "/auth/login";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("API base URL is not configured (set {ENV_API_URL})")]
    MissingBaseUrl,

    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },

    #[error("Invalid request timeout: {0}")]
    InvalidTimeout(String),
}

/// Deployment environment, derived from the host the user signs in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    Production,
    Local,
}

impl Deployment {
    /// Loopback hosts are local; everything else is treated as production.
    pub fn detect(url: &Url) -> Self {
        let local = match url.host() {
            Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
            Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
            Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
            None => true,
        };
        if local {
            Deployment::Local
        } else {
            Deployment::Production
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Deployment::Production)
    }
}

/// On-disk shape of the config file. Every field is optional so the
/// environment can fill the gaps.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    pub api_url: Option<String>,
    pub login_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base for every API path, e.g. `https://api.example.com/api`.
    pub api_base_url: String,
    /// Full-page navigation target when a session ends.
    pub login_url: Url,
    pub request_timeout: Duration,
}

impl Config {
    /// Build a config from explicit values.
    pub fn new(api_base_url: &str) -> Result<Self, ConfigError> {
        Self::resolve(ConfigFile {
            api_url: Some(api_base_url.to_string()),
            ..Default::default()
        })
    }

    /// Override the login entry point.
    pub fn with_login_url(mut self, login_url: &str) -> Result<Self, ConfigError> {
        self.login_url = parse_url("login_url", login_url)?;
        Ok(self)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build a config from the environment only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut file = ConfigFile::default();
        apply_env(&mut file)?;
        Self::resolve(file)
    }

    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut file = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            ConfigFile::default()
        };
        apply_env(&mut file)?;
        Ok(Self::resolve(file)?)
    }

    /// Validate and fill defaults.
    pub fn resolve(file: ConfigFile) -> Result<Self, ConfigError> {
        let raw = file
            .api_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingBaseUrl)?;
        let api_url = parse_url("api_url", raw)?;
        let api_base_url = api_url.as_str().trim_end_matches('/').to_string();

        let login_url = match file.login_url.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => parse_url("login_url", s)?,
            _ => {
                let mut url = api_url.clone();
                url.set_path(LOGIN_PATH);
                url.set_query(None);
                url.set_fragment(None);
                url
            }
        };

        let secs = file
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if secs == 0 {
            return Err(ConfigError::InvalidTimeout("must be at least 1 second".into()));
        }

        Ok(Self {
            api_base_url,
            login_url,
            request_timeout: Duration::from_secs(secs),
        })
    }

    pub fn deployment(&self) -> Deployment {
        Deployment::detect(&self.login_url)
    }

    /// Join an API path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base_url, path.trim_start_matches('/'))
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

fn apply_env(file: &mut ConfigFile) -> Result<(), ConfigError> {
    if let Ok(url) = std::env::var(ENV_API_URL) {
        file.api_url = Some(url);
    }
    if let Ok(url) = std::env::var(ENV_LOGIN_URL) {
        file.login_url = Some(url);
    }
    if let Ok(secs) = std::env::var(ENV_REQUEST_TIMEOUT) {
        let secs = secs
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidTimeout(format!("{}: {}", secs, e)))?;
        file.request_timeout_secs = Some(secs);
    }
    Ok(())
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        field,
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            field,
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}
