//! Dashboard module switches

use std::collections::BTreeMap;

use kaa_api::{ApiClient, QuickSettingsResponse};
use serde_json::Value as JsonValue;

use crate::cache::{QueryCache, QueryKey};
use crate::error::{Result, SyncError};
use crate::mutation::OptimisticMutation;

type Patch = BTreeMap<String, JsonValue>;

/// Quick settings backed by the action API
///
/// Patches are merged into the cached `values` before the request goes out;
/// the server's reply then replaces the cache wholesale.
#[derive(Clone)]
pub struct QuickSettingsController {
    client: ApiClient,
    cache: QueryCache,
    key: QueryKey,
    patch: OptimisticMutation<QuickSettingsResponse, Patch, QuickSettingsResponse>,
}

impl QuickSettingsController {
    #[must_use]
    pub fn new(client: ApiClient, cache: QueryCache) -> Self {
        let key = QueryKey::quick_settings();
        let patch = {
            let client = client.clone();
            OptimisticMutation::new(cache.clone(), key.clone(), move |patch: Patch| {
                let client = client.clone();
                async move { client.patch_quick_settings(&patch).await }
            })
        }
        .with_updater(|current: &mut QuickSettingsResponse, patch: &Patch| {
            if let Err(e) = current.values.apply_patch(patch) {
                tracing::debug!("Quick settings patch not applied locally: {}", e);
            }
        })
        .auto_replace();

        Self {
            client,
            cache,
            key,
            patch,
        }
    }

    /// Fetch from the server into the cache
    ///
    /// # Errors
    /// Request failure, or `Cancelled` if a patch started meanwhile
    pub async fn load(&self) -> Result<QuickSettingsResponse> {
        self.cache
            .fetch(&self.key, self.client.get_quick_settings())
            .await
    }

    /// Cached settings, fetching only when absent or stale
    ///
    /// # Errors
    /// As [`Self::load`]
    pub async fn ensure(&self) -> Result<QuickSettingsResponse> {
        self.cache
            .ensure(&self.key, || self.client.get_quick_settings())
            .await
    }

    #[must_use]
    pub fn current(&self) -> Option<QuickSettingsResponse> {
        self.cache.get(&self.key)
    }

    /// Merge `patch` (flag name to value) into the settings
    ///
    /// # Errors
    /// Request failure; the cache is rolled back first
    pub async fn patch(&self, patch: Patch) -> Result<QuickSettingsResponse> {
        tracing::info!("Patching quick settings: {:?}", patch.keys().collect::<Vec<_>>());
        self.patch.mutate(patch).await
    }

    /// Set one flag
    ///
    /// # Errors
    /// As [`Self::patch`]
    pub async fn set_flag(&self, flag: &str, enabled: bool) -> Result<QuickSettingsResponse> {
        self.patch(BTreeMap::from([(flag.to_string(), JsonValue::Bool(enabled))]))
            .await
    }

    /// Flip one flag, returning its new value
    ///
    /// # Errors
    /// `SyncError::Shape` for a flag the backend does not report, or as
    /// [`Self::patch`]
    pub async fn toggle(&self, flag: &str) -> Result<bool> {
        let current = match self.current() {
            Some(current) => current,
            None => self.load().await?,
        };
        let enabled = current
            .values
            .flag(flag)
            .ok_or_else(|| SyncError::Shape(format!("unknown quick setting '{flag}'")))?;
        let next = self.set_flag(flag, !enabled).await?;
        Ok(next.values.flag(flag).unwrap_or(!enabled))
    }
}
