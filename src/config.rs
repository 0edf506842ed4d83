//! Runtime configuration for the batch scanner.
//!
//! Read once (defaults, then environment overrides) and passed by value into
//! the executor and pipeline. Nothing here is mutated after construction.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::resilience::RetryConfig;
use crate::traits::ScanError;

pub const DEFAULT_API_URL: &str = "https://api.osv.dev/v1";
pub const DEFAULT_BATCH_ENDPOINT: &str = "/querybatch";
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection and batching settings for the OSV batch endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OsvConfig {
    /// Base URL of the API, without the endpoint path
    pub api_url: String,

    /// Path of the batch query endpoint, appended to `api_url`
    pub batch_endpoint: String,

    /// Packages per outbound request
    pub max_batch_size: usize,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Retry policy, used only when the executor is wrapped in
    /// [`crate::resilience::RetryingDatabase`]
    pub retry: RetryConfig,

    pub user_agent: String,
}

impl Default for OsvConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            batch_endpoint: DEFAULT_BATCH_ENDPOINT.to_string(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry: RetryConfig::default(),
            user_agent: concat!("osv-batch-scanner/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl OsvConfig {
    /// Defaults overridden by `OSV_API_URL`, `OSV_BATCH_ENDPOINT`,
    /// `OSV_MAX_BATCH_SIZE`, `OSV_TIMEOUT_SECS` and `OSV_RETRY_ATTEMPTS`.
    pub fn from_env() -> Result<Self, ScanError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ScanError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("OSV_API_URL") {
            cfg.api_url = v;
        }
        if let Some(v) = lookup("OSV_BATCH_ENDPOINT") {
            cfg.batch_endpoint = v;
        }
        if let Some(v) = lookup("OSV_MAX_BATCH_SIZE") {
            cfg.max_batch_size = parse_number("OSV_MAX_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("OSV_TIMEOUT_SECS") {
            cfg.timeout_secs = parse_number("OSV_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("OSV_RETRY_ATTEMPTS") {
            cfg.retry.max_attempts = parse_number("OSV_RETRY_ATTEMPTS", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.api_url.trim().is_empty() {
            return Err(ScanError::Config("api_url must not be empty".into()));
        }
        if self.max_batch_size == 0 {
            return Err(ScanError::Config(
                "max_batch_size must be at least 1".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ScanError::Config("timeout_secs must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ScanError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Full URL of the batch endpoint.
    pub fn batch_url(&self) -> String {
        let base = self.api_url.trim_end_matches('/');
        let path = self.batch_endpoint.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, path)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ScanError> {
    raw.trim()
        .parse()
        .map_err(|_| ScanError::Config(format!("{key} is not a valid number: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = OsvConfig::default();
        assert_eq!(cfg.batch_url(), "https://api.osv.dev/v1/querybatch");
        assert_eq!(cfg.max_batch_size, 1000);
        assert_eq!(cfg.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.retry.max_attempts, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let cfg = OsvConfig::from_lookup(lookup_from(&[
            ("OSV_API_URL", "http://localhost:8080/"),
            ("OSV_BATCH_ENDPOINT", "/v1/querybatch"),
            ("OSV_MAX_BATCH_SIZE", "250"),
            ("OSV_TIMEOUT_SECS", "5"),
            ("OSV_RETRY_ATTEMPTS", "1"),
        ]))
        .unwrap();

        assert_eq!(cfg.batch_url(), "http://localhost:8080/v1/querybatch");
        assert_eq!(cfg.max_batch_size, 250);
        assert_eq!(cfg.timeout_secs, 5);
        assert_eq!(cfg.retry.max_attempts, 1);
    }

    #[test]
    fn test_invalid_env_values() {
        let err = OsvConfig::from_lookup(lookup_from(&[("OSV_MAX_BATCH_SIZE", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));

        let err =
            OsvConfig::from_lookup(lookup_from(&[("OSV_MAX_BATCH_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let cfg: OsvConfig =
            serde_json::from_str(r#"{"api_url": "http://mirror", "timeout_secs": 10}"#).unwrap();
        assert_eq!(cfg.api_url, "http://mirror");
        assert_eq!(cfg.timeout_secs, 10);
        assert_eq!(cfg.batch_endpoint, DEFAULT_BATCH_ENDPOINT);
        assert_eq!(cfg.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
    }
}
