use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kaa_api::ApiError;
use kaa_document::ConfigDocument;
use kaa_sync::{ConfigBackend, SaveOutcome};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Fetch,
    Put,
    Patch,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub body: Option<JsonValue>,
    /// Tokio clock at the moment the call arrived (paused-clock aware)
    pub at: Instant,
}

/// In-memory [`ConfigBackend`] that records every call
///
/// Puts and patches answer with the full stored document, so a save always
/// rebases on it. `set_failing(true)` makes writes answer `HTTP 500`.
#[derive(Debug)]
pub struct RecordingBackend {
    document: Mutex<JsonValue>,
    calls: Mutex<Vec<RecordedCall>>,
    failing: AtomicBool,
    latency: Mutex<Duration>,
    reply: Mutex<Option<JsonValue>>,
}

impl RecordingBackend {
    pub fn new(document: JsonValue) -> Self {
        Self {
            document: Mutex::new(document),
            calls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            reply: Mutex::new(None),
        }
    }

    /// Delay every write by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Answer writes with `reply` instead of the stored document
    pub fn set_reply(&self, reply: JsonValue) {
        *self.reply.lock() = Some(reply);
    }

    pub fn document(&self) -> JsonValue {
        self.document.lock().clone()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn writes(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.kind != CallKind::Fetch)
            .cloned()
            .collect()
    }

    fn record(&self, kind: CallKind, body: Option<JsonValue>) {
        self.calls.lock().push(RecordedCall {
            kind,
            body,
            at: Instant::now(),
        });
    }

    async fn write(&self, apply: impl FnOnce(&mut JsonValue)) -> Result<SaveOutcome, ApiError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 500,
                detail: Some("recording backend set to fail".to_string()),
            });
        }
        let stored = {
            let mut doc = self.document.lock();
            apply(&mut doc);
            doc.clone()
        };
        let reply = self.reply.lock().clone().unwrap_or(stored);
        Ok(SaveOutcome::with_document(reply))
    }
}

#[async_trait]
impl ConfigBackend for RecordingBackend {
    async fn fetch(&self) -> Result<JsonValue, ApiError> {
        self.record(CallKind::Fetch, None);
        Ok(self.document())
    }

    async fn put(&self, document: &JsonValue) -> Result<SaveOutcome, ApiError> {
        self.record(CallKind::Put, Some(document.clone()));
        let document = document.clone();
        self.write(move |doc| *doc = document).await
    }

    async fn patch(&self, patch: &JsonValue) -> Result<SaveOutcome, ApiError> {
        self.record(CallKind::Patch, Some(patch.clone()));
        let patch = patch.clone();
        self.write(move |doc| {
            let mut merged = ConfigDocument::new(doc.take());
            merged.merge_patch(&patch);
            *doc = merged.into_value();
        })
        .await
    }
}
