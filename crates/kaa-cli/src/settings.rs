//! Layered CLI settings: TOML file, then environment, then flags

use std::path::Path;

use anyhow::Context;
use kaa_api::ApiConfig;
use kaa_sync::SyncConfig;
use serde::{Deserialize, Serialize};

/// Everything the binary needs to talk to a backend
///
/// ```toml
/// [api]
/// base_url = "http://192.168.1.20:4825"
///
/// [sync]
/// autosave_debounce_ms = 500
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api: ApiConfig,
    pub sync: SyncConfig,
}

impl Settings {
    /// Parse settings from TOML text; missing tables and keys keep defaults
    ///
    /// # Errors
    /// Malformed TOML or mistyped values
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid settings")
    }

    /// Read `path` when given, otherwise start from defaults
    ///
    /// # Errors
    /// Unreadable file or invalid TOML
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let settings = Self::from_toml(&text)
            .with_context(|| format!("in {}", path.display()))?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Apply `KAA_API_BASE`, then an explicit `--base-url`
    #[must_use]
    pub fn with_overrides(mut self, base_url: Option<&str>) -> Self {
        self.api = self.api.with_env_overrides();
        if let Some(base) = base_url {
            self.api = self.api.with_base_url(base);
        }
        self
    }
}
