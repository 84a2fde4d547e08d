//! Backend version probe with a time-to-live cache

use std::time::Duration;

use kaa_api::ApiClient;
use moka::future::Cache;

/// Asks the backend for its version at most once per TTL
///
/// An unreachable backend reports `None`, and that answer is cached too.
#[derive(Debug, Clone)]
pub struct VersionProbe {
    client: ApiClient,
    cache: Cache<(), Option<String>>,
}

impl VersionProbe {
    #[must_use]
    pub fn new(client: ApiClient, ttl: Duration) -> Self {
        Self {
            client,
            cache: Cache::builder().max_capacity(1).time_to_live(ttl).build(),
        }
    }

    pub async fn get(&self) -> Option<String> {
        self.cache
            .get_with((), async {
                tracing::debug!("Probing backend version");
                self.client.get_backend_version().await
            })
            .await
    }

    /// Forget the cached answer so the next [`Self::get`] asks again
    pub async fn refresh(&self) -> Option<String> {
        self.cache.invalidate(&()).await;
        self.get().await
    }
}
