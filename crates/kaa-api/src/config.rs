//! API client configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable overriding [`ApiConfig::base_url`]
pub const BASE_URL_ENV: &str = "KAA_API_BASE";

/// Connection settings for the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Scheme + host + port, without the `/api` prefix
    pub base_url: String,
    /// Per-request timeout; the SSE stream is exempt
    pub request_timeout_secs: u64,
    /// Event stream path
    pub events_path: String,
    pub user_agent: String,
}

impl ApiConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Apply `KAA_API_BASE` if set and non-empty
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        match std::env::var(BASE_URL_ENV) {
            Ok(base) if !base.trim().is_empty() => self.with_base_url(base.trim()),
            _ => self,
        }
    }

    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4825".to_string(),
            request_timeout_secs: 10,
            events_path: "/api/v1/events".to_string(),
            user_agent: concat!("kaa-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ApiConfig::new();
        assert_eq!(cfg.base_url, "http://localhost:4825");
        assert_eq!(cfg.request_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.events_path, "/api/v1/events");
    }

    #[test]
    fn builder() {
        let cfg = ApiConfig::new()
            .with_base_url("http://10.0.0.2:4825")
            .with_timeout(Duration::from_millis(10));
        assert_eq!(cfg.base_url, "http://10.0.0.2:4825");
        assert_eq!(cfg.request_timeout_secs, 1);
    }

    #[test]
    fn partial_deserialize_fills_defaults() {
        let cfg: ApiConfig = serde_json::from_str(r#"{"base_url": "http://host:1"}"#).unwrap();
        assert_eq!(cfg.base_url, "http://host:1");
        assert_eq!(cfg.request_timeout_secs, 10);
    }
}
