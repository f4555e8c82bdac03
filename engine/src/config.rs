//! Sync client configuration.

use std::env;
use std::time::Duration;

/// Default path of the validation endpoint.
pub const DEFAULT_VALIDATE_PATH: &str = "/api/apps/db/sync/validate";
/// Default path of the LWW sync endpoint.
pub const DEFAULT_LWW_PATH: &str = "/api/apps/db/sync/lww";
/// Default bound on a single network call, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Where and how to reach the sync server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Server base URL, without trailing slash
    pub base_url: String,
    /// Path of the validate endpoint
    pub validate_path: String,
    /// Path of the LWW endpoint
    pub lww_path: String,
    /// Bound on each network call
    pub timeout: Duration,
    /// Bearer token sent with every request
    pub token: Option<String>,
}

impl SyncConfig {
    /// Configuration with default paths and timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            validate_path: DEFAULT_VALIDATE_PATH.to_string(),
            lww_path: DEFAULT_LWW_PATH.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            token: None,
        }
    }

    pub fn with_validate_path(mut self, path: impl Into<String>) -> Self {
        self.validate_path = path.into();
        self
    }

    pub fn with_lww_path(mut self, path: impl Into<String>) -> Self {
        self.lww_path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Load configuration from `HEARTH_SYNC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("HEARTH_SYNC_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingSyncUrl)?;

        let mut config = Self::new(base_url);

        if let Some(path) = lookup("HEARTH_SYNC_VALIDATE_PATH") {
            config.validate_path = path;
        }
        if let Some(path) = lookup("HEARTH_SYNC_LWW_PATH") {
            config.lww_path = path;
        }
        if let Some(secs) = lookup("HEARTH_SYNC_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout(secs.clone()))?;
            if secs == 0 {
                return Err(ConfigError::InvalidTimeout(secs.to_string()));
            }
            config.timeout = Duration::from_secs(secs);
        }
        config.token = lookup("HEARTH_SYNC_TOKEN").filter(|t| !t.is_empty());

        Ok(config)
    }

    pub(crate) fn validate_url(&self) -> String {
        format!("{}{}", self.base_url, self.validate_path)
    }

    pub(crate) fn lww_url(&self) -> String {
        format!("{}{}", self.base_url, self.lww_path)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("HEARTH_SYNC_URL environment variable is required")]
    MissingSyncUrl,

    #[error("Invalid HEARTH_SYNC_TIMEOUT_SECS value: {0}")]
    InvalidTimeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::from_lookup(lookup(&[("HEARTH_SYNC_URL", "http://localhost:3000/")])).unwrap();

        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.token, None);
        assert_eq!(
            config.lww_url(),
            "http://localhost:3000/api/apps/db/sync/lww"
        );
    }

    #[test]
    fn overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("HEARTH_SYNC_URL", "https://sync.example.com"),
            ("HEARTH_SYNC_VALIDATE_PATH", "/v2/validate"),
            ("HEARTH_SYNC_TIMEOUT_SECS", "5"),
            ("HEARTH_SYNC_TOKEN", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.validate_url(), "https://sync.example.com/v2/validate");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.token.as_deref(), Some("secret"));
    }

    #[test]
    fn missing_url_is_an_error() {
        assert_eq!(
            SyncConfig::from_lookup(lookup(&[])).unwrap_err(),
            ConfigError::MissingSyncUrl
        );
    }

    #[test]
    fn bad_timeout_is_an_error() {
        for value in ["soon", "0"] {
            let err = SyncConfig::from_lookup(lookup(&[
                ("HEARTH_SYNC_URL", "http://localhost"),
                ("HEARTH_SYNC_TIMEOUT_SECS", value),
            ]))
            .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidTimeout(_)));
        }
    }
}
