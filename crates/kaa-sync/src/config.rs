//! Timing configuration for the sync layer

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Debounce, polling and reconnect timings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last edit before an auto-save fires
    pub autosave_debounce_ms: u64,
    /// Task overview refresh interval
    pub overview_poll_ms: u64,
    /// Polling interval while the event stream is down
    pub fallback_poll_ms: u64,
    /// First reconnect delay, doubled per failed attempt
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Upper bound (exclusive) of the random delay added to each reconnect
    pub backoff_jitter_ms: u64,
    /// How long a backend version probe stays fresh
    pub version_ttl_secs: u64,
}

impl SyncConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.autosave_debounce_ms = duration_ms(debounce);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_overview_poll(mut self, interval: Duration) -> Self {
        self.overview_poll_ms = duration_ms(interval);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_fallback_poll(mut self, interval: Duration) -> Self {
        self.fallback_poll_ms = duration_ms(interval);
        self
    }

    /// Set reconnect backoff parameters
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, cap: Duration, jitter: Duration) -> Self {
        self.backoff_base_ms = duration_ms(base);
        self.backoff_cap_ms = duration_ms(cap);
        self.backoff_jitter_ms = duration_ms(jitter);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_version_ttl(mut self, ttl: Duration) -> Self {
        self.version_ttl_secs = ttl.as_secs();
        self
    }

    #[inline]
    #[must_use]
    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    #[inline]
    #[must_use]
    pub fn overview_poll(&self) -> Duration {
        Duration::from_millis(self.overview_poll_ms.max(1))
    }

    #[inline]
    #[must_use]
    pub fn fallback_poll(&self) -> Duration {
        Duration::from_millis(self.fallback_poll_ms.max(1))
    }

    #[inline]
    #[must_use]
    pub fn version_ttl(&self) -> Duration {
        Duration::from_secs(self.version_ttl_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            autosave_debounce_ms: 800,
            overview_poll_ms: 3_000,
            fallback_poll_ms: 3_000,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            backoff_jitter_ms: 500,
            version_ttl_secs: 300,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SyncConfig::new();
        assert_eq!(cfg.autosave_debounce(), Duration::from_millis(800));
        assert_eq!(cfg.overview_poll(), Duration::from_secs(3));
        assert_eq!(cfg.fallback_poll(), Duration::from_secs(3));
        assert_eq!(cfg.backoff_cap_ms, 30_000);
        assert_eq!(cfg.version_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn partial_toml_style_input() {
        let cfg: SyncConfig = serde_json::from_str(r#"{"autosave_debounce_ms": 250}"#).unwrap();
        assert_eq!(cfg.autosave_debounce_ms, 250);
        assert_eq!(cfg.backoff_base_ms, 1_000);
    }

    #[test]
    fn zero_poll_interval_clamped() {
        let cfg = SyncConfig::new().with_overview_poll(Duration::ZERO);
        assert_eq!(cfg.overview_poll(), Duration::from_millis(1));
    }
}
