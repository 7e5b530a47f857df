//! Configuration parsed from environment variables.
//!
//! Every value is read once at startup. Missing optional values degrade the
//! feature that needs them rather than failing the whole configuration.

use std::path::PathBuf;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const DEFAULT_SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {reason}")]
    InvalidUrl { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

/// Identity-provider project credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub auth_domain: Option<String>,
    pub project_id: Option<String>,
    pub storage_bucket: Option<String>,
    pub messaging_sender_id: Option<String>,
    pub app_id: Option<String>,
    pub measurement_id: Option<String>,
    pub identity_url: String,
    pub secure_token_url: String,
}

impl FirebaseConfig {
    /// Config for the production endpoints with only an API key set.
    #[must_use]
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            auth_domain: None,
            project_id: None,
            storage_bucket: None,
            messaging_sender_id: None,
            app_id: None,
            measurement_id: None,
            identity_url: DEFAULT_IDENTITY_URL.to_owned(),
            secure_token_url: DEFAULT_SECURE_TOKEN_URL.to_owned(),
        }
    }

    /// Analytics only runs when a measurement ID is configured.
    #[must_use]
    pub fn analytics_enabled(&self) -> bool {
        self.measurement_id.is_some()
    }

    /// `requestUri` sent with IdP sign-ins.
    #[must_use]
    pub fn request_uri(&self) -> String {
        match &self.auth_domain {
            Some(domain) => format!("https://{domain}"),
            None => "http://localhost".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub api_base_url: String,
    /// `None` when `FIREBASE_API_KEY` is unset; provider sign-in is disabled.
    pub firebase: Option<FirebaseConfig>,
    pub debug: bool,
    pub asset_cdn_url: Option<String>,
    pub token_file: PathBuf,
    pub timeouts: HttpTimeouts,
}

impl AppConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `YARBA_API_URL`: default `http://localhost:8000`
    /// - `FIREBASE_API_KEY` (+ `FIREBASE_AUTH_DOMAIN`, `FIREBASE_PROJECT_ID`,
    ///   `FIREBASE_STORAGE_BUCKET`, `FIREBASE_MESSAGING_SENDER_ID`,
    ///   `FIREBASE_APP_ID`, `FIREBASE_MEASUREMENT_ID`)
    /// - `FIREBASE_IDENTITY_URL`, `FIREBASE_SECURE_TOKEN_URL`: endpoint overrides
    /// - `YARBA_DEBUG`: truthy enables debug logging
    /// - `YARBA_ASSET_CDN_URL`
    /// - `YARBA_TOKEN_FILE`: default `$HOME/.yarba/token`
    /// - `YARBA_REQUEST_TIMEOUT_SECS`: default 30
    /// - `YARBA_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns an error if a configured URL has no `http`/`https` scheme.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url = base_url("YARBA_API_URL", env_string("YARBA_API_URL").as_deref(), DEFAULT_API_BASE_URL)?;

        let firebase = match env_string("FIREBASE_API_KEY") {
            Some(api_key) => Some(FirebaseConfig {
                api_key,
                auth_domain: env_string("FIREBASE_AUTH_DOMAIN"),
                project_id: env_string("FIREBASE_PROJECT_ID"),
                storage_bucket: env_string("FIREBASE_STORAGE_BUCKET"),
                messaging_sender_id: env_string("FIREBASE_MESSAGING_SENDER_ID"),
                app_id: env_string("FIREBASE_APP_ID"),
                measurement_id: env_string("FIREBASE_MEASUREMENT_ID"),
                identity_url: base_url(
                    "FIREBASE_IDENTITY_URL",
                    env_string("FIREBASE_IDENTITY_URL").as_deref(),
                    DEFAULT_IDENTITY_URL,
                )?,
                secure_token_url: base_url(
                    "FIREBASE_SECURE_TOKEN_URL",
                    env_string("FIREBASE_SECURE_TOKEN_URL").as_deref(),
                    DEFAULT_SECURE_TOKEN_URL,
                )?,
            }),
            None => None,
        };

        let asset_cdn_url = env_string("YARBA_ASSET_CDN_URL").map(|u| u.trim_end_matches('/').to_owned());
        let token_file = env_string("YARBA_TOKEN_FILE")
            .map_or_else(|| default_token_file(std::env::var("HOME").ok().as_deref()), PathBuf::from);
        let timeouts = HttpTimeouts {
            request_secs: env_parse_u64("YARBA_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse_u64("YARBA_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };

        Ok(Self {
            api_base_url,
            firebase,
            debug: env_bool("YARBA_DEBUG").unwrap_or(false),
            asset_cdn_url,
            token_file,
            timeouts,
        })
    }

    /// Resolve a static asset path against the CDN, or leave it site-relative.
    #[must_use]
    pub fn asset_url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        match &self.asset_cdn_url {
            Some(cdn) => format!("{cdn}/{path}"),
            None => format!("/{path}"),
        }
    }
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| parse_bool(&raw))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn base_url(var: &'static str, raw: Option<&str>, default: &str) -> Result<String, ConfigError> {
    let value = raw.unwrap_or(default).trim_end_matches('/');
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(ConfigError::InvalidUrl { var, reason: format!("expected http(s) URL, got '{value}'") });
    }
    Ok(value.to_owned())
}

fn default_token_file(home: Option<&str>) -> PathBuf {
    match home {
        Some(home) if !home.is_empty() => PathBuf::from(home).join(".yarba").join("token"),
        _ => PathBuf::from(".yarba-token"),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
