//! [`ConfigBackend`] implementations over the kaa HTTP API

use async_trait::async_trait;
use kaa_api::{ApiClient, ApiError, ProduceSolution};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::document::{ConfigBackend, SaveOutcome};

/// Full user configuration behind `/api/v1/config`
///
/// The server wraps the document as `{data: ...}`; only `data` is edited.
/// There is no PATCH route, so a patch is merged into a fresh server copy
/// and PUT back.
#[derive(Debug, Clone)]
pub struct V1ConfigBackend {
    client: ApiClient,
}

impl V1ConfigBackend {
    #[inline]
    #[must_use]
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

fn unwrap_data(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(JsonValue::Null)
        }
        other => other,
    }
}

fn reply_message(message: String) -> Option<String> {
    (!message.is_empty()).then_some(message)
}

#[async_trait]
impl ConfigBackend for V1ConfigBackend {
    async fn fetch(&self) -> Result<JsonValue, ApiError> {
        Ok(unwrap_data(self.client.get_config().await?))
    }

    async fn put(&self, document: &JsonValue) -> Result<SaveOutcome, ApiError> {
        let reply = self.client.put_config(document).await?;
        Ok(SaveOutcome {
            document: None,
            message: reply_message(reply.message),
        })
    }

    async fn patch(&self, patch: &JsonValue) -> Result<SaveOutcome, ApiError> {
        let mut doc = kaa_document::ConfigDocument::new(self.fetch().await?);
        doc.merge_patch(patch);
        let reply = self.client.put_config(doc.value()).await?;
        Ok(SaveOutcome {
            document: Some(doc.into_value()),
            message: reply_message(reply.message),
        })
    }
}

/// Options tree behind the action API (`/api/config`)
///
/// `patch_options` answers with the whole tree, which becomes the new
/// baseline.
#[derive(Debug, Clone)]
pub struct OptionsBackend {
    client: ApiClient,
}

impl OptionsBackend {
    #[inline]
    #[must_use]
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigBackend for OptionsBackend {
    async fn fetch(&self) -> Result<JsonValue, ApiError> {
        self.client.get_options().await
    }

    async fn put(&self, document: &JsonValue) -> Result<SaveOutcome, ApiError> {
        let saved = self.client.save_options(document).await?;
        Ok(SaveOutcome {
            document: saved.filter(|v| !v.is_null()),
            message: None,
        })
    }

    async fn patch(&self, patch: &JsonValue) -> Result<SaveOutcome, ApiError> {
        Ok(SaveOutcome::with_document(
            self.client.patch_options(patch).await?,
        ))
    }
}

/// `data` of one produce solution, edited as a draft
///
/// Name and description ride along unchanged on every save.
#[derive(Debug)]
pub struct SolutionBackend {
    client: ApiClient,
    id: String,
    meta: Mutex<Option<ProduceSolution>>,
}

impl SolutionBackend {
    #[must_use]
    pub fn new(client: ApiClient, id: impl Into<String>) -> Self {
        Self {
            client,
            id: id.into(),
            meta: Mutex::new(None),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn current(&self) -> Result<ProduceSolution, ApiError> {
        let cached = self.meta.lock().clone();
        match cached {
            Some(solution) => Ok(solution),
            None => self.fetch_solution().await,
        }
    }

    async fn fetch_solution(&self) -> Result<ProduceSolution, ApiError> {
        let solution = self.client.get_solution(&self.id).await?;
        *self.meta.lock() = Some(solution.clone());
        Ok(solution)
    }

    async fn store(&self, data: JsonValue) -> Result<SaveOutcome, ApiError> {
        let mut solution = self.current().await?;
        solution.data = data;
        let saved = self.client.update_solution(&self.id, &solution).await?;
        let document = saved.data.clone();
        *self.meta.lock() = Some(saved);
        Ok(SaveOutcome::with_document(document))
    }
}

#[async_trait]
impl ConfigBackend for SolutionBackend {
    async fn fetch(&self) -> Result<JsonValue, ApiError> {
        Ok(self.fetch_solution().await?.data)
    }

    async fn put(&self, document: &JsonValue) -> Result<SaveOutcome, ApiError> {
        self.store(document.clone()).await
    }

    async fn patch(&self, patch: &JsonValue) -> Result<SaveOutcome, ApiError> {
        let mut doc = kaa_document::ConfigDocument::new(self.fetch().await?);
        doc.merge_patch(patch);
        self.store(doc.into_value()).await
    }
}
