//! Local editing of a server-held configuration document
//!
//! [`DocumentSync`] keeps one document loaded, applies edits locally without
//! touching the network, tracks them in a [`DirtyMask`], and saves either the
//! whole document or just the dirty subtree.
//!
//! Status transitions:
//!
//! ```text
//! Clean --set_at--> Dirty --save--> Saving --ok--> Clean | Dirty (newer edits)
//!                                          \--err--> Error --set_at--> Dirty
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kaa_api::ApiError;
use kaa_document::{ConfigDocument, ConfigPath, DirtyMask};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tokio::sync::{watch, Mutex};

use crate::error::{Result, SyncError};

/// Server's answer to a save
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOutcome {
    /// Full document as the server now holds it, when the reply carries one
    pub document: Option<JsonValue>,
    /// Human-readable confirmation
    pub message: Option<String>,
}

impl SaveOutcome {
    #[must_use]
    pub fn with_document(document: JsonValue) -> Self {
        Self {
            document: Some(document),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            document: None,
            message: Some(message.into()),
        }
    }
}

/// Where a document is loaded from and saved to
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigBackend: Send + Sync {
    /// Current server copy
    async fn fetch(&self) -> Result<JsonValue, ApiError>;

    /// Replace the server copy with `document`
    async fn put(&self, document: &JsonValue) -> Result<SaveOutcome, ApiError>;

    /// Deep-merge `patch` into the server copy
    async fn patch(&self, patch: &JsonValue) -> Result<SaveOutcome, ApiError>;
}

/// Save strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// PUT the entire document
    #[default]
    Full,
    /// PATCH only the dirty subtree; nothing is sent when nothing is dirty
    Dirty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Clean,
    Dirty,
    Saving,
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clean => "clean",
            Self::Dirty => "dirty",
            Self::Saving => "saving",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Default)]
struct SyncState {
    doc: Option<Arc<ConfigDocument>>,
    dirty: DirtyMask,
    status: SyncStatus,
    loading: bool,
    error: Option<String>,
    message: Option<String>,
    seq: u64,
}

struct Inner {
    backend: Arc<dyn ConfigBackend>,
    state: RwLock<SyncState>,
    save_lock: Mutex<()>,
    edits: watch::Sender<u64>,
}

/// Shared handle to one synchronized document
///
/// Clones share state; hand one to every consumer of the document.
#[derive(Clone)]
pub struct DocumentSync {
    inner: Arc<Inner>,
}

impl fmt::Debug for DocumentSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("DocumentSync")
            .field("status", &state.status)
            .field("loaded", &state.doc.is_some())
            .field("seq", &state.seq)
            .finish_non_exhaustive()
    }
}

impl DocumentSync {
    #[must_use]
    pub fn new(backend: Arc<dyn ConfigBackend>) -> Self {
        let (edits, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                backend,
                state: RwLock::new(SyncState::default()),
                save_lock: Mutex::new(()),
                edits,
            }),
        }
    }

    /// Fetch the server copy, discarding local edits
    ///
    /// On failure the current document is kept and the error recorded.
    ///
    /// # Errors
    /// The backend's error
    pub async fn load(&self) -> Result<()> {
        let _serial = self.inner.save_lock.lock().await;
        self.inner.state.write().loading = true;
        tracing::info!("Loading config document");

        let fetched = self.inner.backend.fetch().await;
        let mut state = self.inner.state.write();
        state.loading = false;
        match fetched {
            Ok(value) => {
                state.doc = Some(Arc::new(ConfigDocument::new(value)));
                state.dirty.clear();
                state.status = SyncStatus::Clean;
                state.error = None;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Config load failed: {}", e);
                state.error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Write `value` at `path` locally and mark it dirty
    ///
    /// Starts from an empty object when nothing is loaded yet.
    ///
    /// # Errors
    /// Returns error if the path cannot be written (array index past the end)
    pub fn set_at(&self, path: &ConfigPath, value: JsonValue) -> Result<()> {
        let seq = {
            let mut state = self.inner.state.write();
            let mut doc = state
                .doc
                .as_deref()
                .cloned()
                .unwrap_or_else(ConfigDocument::empty);
            doc.set_at(path, value)?;

            state.seq += 1;
            let seq = state.seq;
            state.doc = Some(Arc::new(doc));
            state.dirty.mark(path, seq);
            if state.status != SyncStatus::Saving {
                state.status = SyncStatus::Dirty;
            }
            seq
        };
        tracing::debug!("Edited {} (edit {})", path, seq);
        self.inner.edits.send_replace(seq);
        Ok(())
    }

    /// [`Self::set_at`] with a dotted path string
    ///
    /// # Errors
    /// Invalid path, or as [`Self::set_at`]
    pub fn set(&self, path: &str, value: JsonValue) -> Result<()> {
        self.set_at(&ConfigPath::parse(path)?, value)
    }

    /// Value at `path`, or `default` when missing or null
    #[must_use]
    pub fn get_at(&self, path: &ConfigPath, default: JsonValue) -> JsonValue {
        match self.inner.state.read().doc.as_deref() {
            Some(doc) => doc.get_or(path, default),
            None => default,
        }
    }

    /// [`Self::get_at`] with a dotted path string
    ///
    /// # Errors
    /// Invalid path
    pub fn get(&self, path: &str, default: JsonValue) -> Result<JsonValue> {
        Ok(self.get_at(&ConfigPath::parse(path)?, default))
    }

    /// Push local state to the server
    ///
    /// Saves never overlap; a second call waits for the first. Edits made
    /// while a save is in flight stay dirty and are re-applied on top of the
    /// server's reply.
    ///
    /// # Errors
    /// `SyncError::NotLoaded` when there is nothing to save, or the backend's
    /// error (document and dirty mask are left as they were)
    pub async fn save(&self, mode: SaveMode) -> Result<()> {
        let _serial = self.inner.save_lock.lock().await;

        let (payload, through) = {
            let mut state = self.inner.state.write();
            let Some(doc) = state.doc.clone() else {
                return Err(SyncError::NotLoaded);
            };
            let payload = match mode {
                SaveMode::Full => doc.value().clone(),
                SaveMode::Dirty => match state.dirty.extract(doc.value()) {
                    Some(patch) => patch,
                    None => return Ok(()),
                },
            };
            state.status = SyncStatus::Saving;
            (payload, state.seq)
        };

        tracing::info!("Saving config document ({:?}, through edit {})", mode, through);
        let result = match mode {
            SaveMode::Full => self.inner.backend.put(&payload).await,
            SaveMode::Dirty => self.inner.backend.patch(&payload).await,
        };

        let mut state = self.inner.state.write();
        match result {
            Ok(outcome) => {
                state.dirty.clear_through(through);
                if let Some(server) = outcome.document {
                    let rebased = rebase(server, state.doc.as_deref(), &state.dirty);
                    state.doc = Some(Arc::new(rebased));
                }
                state.status = if state.dirty.is_empty() {
                    SyncStatus::Clean
                } else {
                    SyncStatus::Dirty
                };
                state.error = None;
                state.message = outcome.message;
                tracing::info!("Config document saved");
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Config save failed: {}", e);
                state.status = SyncStatus::Error;
                state.error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Current document, shared
    #[must_use]
    pub fn document(&self) -> Option<Arc<ConfigDocument>> {
        self.inner.state.read().doc.clone()
    }

    /// Current document value
    #[must_use]
    pub fn value(&self) -> Option<JsonValue> {
        self.document().map(|doc| doc.value().clone())
    }

    /// Subset of the document holding unsaved edits
    #[must_use]
    pub fn dirty_patch(&self) -> Option<JsonValue> {
        let state = self.inner.state.read();
        state.dirty.extract(state.doc.as_deref()?.value())
    }

    #[must_use]
    pub fn dirty_mask(&self) -> DirtyMask {
        self.inner.state.read().dirty.clone()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.inner.state.read().dirty.is_empty()
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.inner.state.read().status
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.state.read().loading
    }

    /// Message of the last failed load or save
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.inner.state.read().error.clone()
    }

    /// Confirmation text of the last successful save
    #[must_use]
    pub fn message(&self) -> Option<String> {
        self.inner.state.read().message.clone()
    }

    /// Watch the edit counter; it changes on every local edit
    #[must_use]
    pub fn subscribe_edits(&self) -> watch::Receiver<u64> {
        self.inner.edits.subscribe()
    }
}

/// Server copy with the still-dirty local values written back over it
fn rebase(server: JsonValue, local: Option<&ConfigDocument>, dirty: &DirtyMask) -> ConfigDocument {
    let mut doc = ConfigDocument::new(server);
    let Some(local) = local else {
        return doc;
    };
    for path in dirty.leaf_paths() {
        if let Some(value) = local.get_at(&path) {
            if let Err(e) = doc.set_at(&path, value.clone()) {
                tracing::debug!("Could not re-apply pending edit at {}: {}", path, e);
            }
        }
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn loaded(mock: MockConfigBackend, initial: JsonValue) -> DocumentSync {
        let sync = DocumentSync::new(Arc::new(mock));
        sync.inner.state.write().doc = Some(Arc::new(ConfigDocument::new(initial)));
        sync
    }

    #[tokio::test]
    async fn load_replaces_doc_and_clears_dirty() {
        let mut mock = MockConfigBackend::new();
        mock.expect_fetch()
            .times(1)
            .returning(|| Ok(json!({"a": 1})));
        let sync = loaded(mock, json!({}));
        sync.set("b", json!(2)).unwrap();

        sync.load().await.unwrap();
        assert_eq!(sync.value(), Some(json!({"a": 1})));
        assert!(!sync.is_dirty());
        assert_eq!(sync.status(), SyncStatus::Clean);
    }

    #[tokio::test]
    async fn failed_load_keeps_doc_and_records_error() {
        let mut mock = MockConfigBackend::new();
        mock.expect_fetch().returning(|| {
            Err(ApiError::Status {
                status: 404,
                detail: None,
            })
        });
        let sync = loaded(mock, json!({"keep": true}));

        assert!(sync.load().await.is_err());
        assert_eq!(sync.value(), Some(json!({"keep": true})));
        assert_eq!(sync.error().as_deref(), Some("HTTP 404"));
        assert!(!sync.is_loading());
    }

    #[test]
    fn set_at_without_doc_starts_empty() {
        let sync = DocumentSync::new(Arc::new(MockConfigBackend::new()));
        sync.set("produce.enabled", json!(true)).unwrap();
        assert_eq!(sync.value(), Some(json!({"produce": {"enabled": true}})));
        assert_eq!(sync.status(), SyncStatus::Dirty);
        assert_eq!(sync.get("produce.enabled", json!(false)).unwrap(), json!(true));
        assert_eq!(sync.get("missing", json!(7)).unwrap(), json!(7));
    }

    #[test]
    fn set_at_does_not_touch_shared_snapshot() {
        let sync = loaded(MockConfigBackend::new(), json!({"a": 1}));
        let before = sync.document().unwrap();
        sync.set("a", json!(2)).unwrap();
        assert_eq!(before.value(), &json!({"a": 1}));
    }

    #[tokio::test]
    async fn full_save_replaces_with_server_copy() {
        let mut mock = MockConfigBackend::new();
        mock.expect_put()
            .withf(|doc| doc == &json!({"a": 1, "b": 2}))
            .times(1)
            .returning(|_| Ok(SaveOutcome::with_document(json!({"a": 1, "b": 2, "server": true}))));
        let sync = loaded(mock, json!({"a": 1}));
        sync.set("b", json!(2)).unwrap();

        sync.save(SaveMode::Full).await.unwrap();
        assert_eq!(sync.value(), Some(json!({"a": 1, "b": 2, "server": true})));
        assert!(!sync.is_dirty());
        assert_eq!(sync.status(), SyncStatus::Clean);
    }

    #[tokio::test]
    async fn dirty_save_sends_only_edits() {
        let mut mock = MockConfigBackend::new();
        mock.expect_patch()
            .withf(|patch| patch == &json!({"produce": {"count": 3}}))
            .times(1)
            .returning(|_| Ok(SaveOutcome::with_message("ok")));
        let sync = loaded(mock, json!({"produce": {"count": 1, "mode": "pro"}, "other": 0}));
        sync.set("produce.count", json!(3)).unwrap();

        sync.save(SaveMode::Dirty).await.unwrap();
        assert_eq!(sync.message().as_deref(), Some("ok"));
        assert!(!sync.is_dirty());
    }

    #[tokio::test]
    async fn dirty_save_with_nothing_dirty_is_noop() {
        let mut mock = MockConfigBackend::new();
        mock.expect_patch().never();
        let sync = loaded(mock, json!({"a": 1}));
        sync.save(SaveMode::Dirty).await.unwrap();
        assert_eq!(sync.status(), SyncStatus::Clean);
    }

    #[tokio::test]
    async fn failed_save_preserves_edits() {
        let mut mock = MockConfigBackend::new();
        mock.expect_put().returning(|_| {
            Err(ApiError::Api {
                code: None,
                message: "配置无效".into(),
                detail: None,
            })
        });
        let sync = loaded(mock, json!({"a": 1}));
        sync.set("a", json!(5)).unwrap();
        let doc_before = sync.value();
        let mask_before = sync.dirty_mask();

        let err = sync.save(SaveMode::Full).await.unwrap_err();
        assert_eq!(err.to_string(), "配置无效");
        assert_eq!(sync.value(), doc_before);
        assert_eq!(sync.dirty_mask(), mask_before);
        assert_eq!(sync.status(), SyncStatus::Error);
        assert_eq!(sync.error().as_deref(), Some("配置无效"));

        sync.set("b", json!(1)).unwrap();
        assert_eq!(sync.status(), SyncStatus::Dirty);
    }

    #[tokio::test]
    async fn save_without_doc_is_rejected() {
        let sync = DocumentSync::new(Arc::new(MockConfigBackend::new()));
        assert!(matches!(
            sync.save(SaveMode::Full).await,
            Err(SyncError::NotLoaded)
        ));
    }

    #[test]
    fn rebase_keeps_pending_values() {
        let local = ConfigDocument::new(json!({"a": 9, "b": {"c": 1}}));
        let mut dirty = DirtyMask::new();
        dirty.mark(&ConfigPath::parse("a").unwrap(), 4);
        let doc = rebase(json!({"a": 1, "b": {"c": 2}}), Some(&local), &dirty);
        assert_eq!(doc.value(), &json!({"a": 9, "b": {"c": 2}}));
    }

    #[test]
    fn edit_counter_advances() {
        let sync = DocumentSync::new(Arc::new(MockConfigBackend::new()));
        let rx = sync.subscribe_edits();
        sync.set("x", json!(1)).unwrap();
        sync.set("y", json!(2)).unwrap();
        assert_eq!(*rx.borrow(), 2);
    }
}
