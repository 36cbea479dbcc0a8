//! Connection settings for a Parse application.

use std::env;
use std::time::Duration;

pub const DEFAULT_API_ROOT: &str = "https://api.parse.com/1";

/// Connect/read timeout applied to every request unless overridden.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Credentials and endpoint for one Parse application.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL every endpoint is appended to, without a trailing slash.
    pub api_root: String,
    pub application_id: String,
    pub rest_api_key: String,
    /// Sent instead of a session token for privileged operations.
    pub master_key: Option<String>,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(application_id: impl Into<String>, rest_api_key: impl Into<String>) -> Self {
        Self {
            api_root: DEFAULT_API_ROOT.to_string(),
            application_id: application_id.into(),
            rest_api_key: rest_api_key.into(),
            master_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_root(mut self, api_root: &str) -> Self {
        self.api_root = api_root.trim_end_matches('/').to_string();
        self
    }

    pub fn with_master_key(mut self, master_key: impl Into<String>) -> Self {
        self.master_key = Some(master_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// `PARSE_APPLICATION_ID` and `PARSE_REST_API_KEY` are required;
    /// `PARSE_API_ROOT`, `PARSE_MASTER_KEY` and `PARSE_TIMEOUT_SECS` are optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        let application_id =
            env::var("PARSE_APPLICATION_ID").map_err(|_| ConfigError::Missing("PARSE_APPLICATION_ID"))?;
        let rest_api_key =
            env::var("PARSE_REST_API_KEY").map_err(|_| ConfigError::Missing("PARSE_REST_API_KEY"))?;

        let mut config = Self::new(application_id, rest_api_key);
        if let Ok(root) = env::var("PARSE_API_ROOT") {
            config = config.with_api_root(&root);
        }
        if let Ok(master_key) = env::var("PARSE_MASTER_KEY") {
            config = config.with_master_key(master_key);
        }
        if let Ok(secs) = env::var("PARSE_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| ConfigError::InvalidTimeout(secs))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

// Keys stay out of debug output.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_root", &self.api_root)
            .field("application_id", &self.application_id)
            .field("master_key", &self.master_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("invalid PARSE_TIMEOUT_SECS value: {0}")]
    InvalidTimeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::new("app", "rest");
        assert_eq!(config.api_root, DEFAULT_API_ROOT);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(config.master_key.is_none());
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let config = ClientConfig::new("app", "rest").with_api_root("http://localhost:1337/1/");
        assert_eq!(config.api_root, "http://localhost:1337/1");
    }

    #[test]
    fn debug_output_hides_keys() {
        let config = ClientConfig::new("app", "secret-rest").with_master_key("secret-master");
        let printed = format!("{config:?}");
        assert!(!printed.contains("secret-rest"));
        assert!(!printed.contains("secret-master"));
    }
}
