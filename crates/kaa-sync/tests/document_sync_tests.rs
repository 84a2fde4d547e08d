//! DocumentSync and AutoSaver Tests
//!
//! Run against the in-memory recording backend on a paused clock.
//!
use std::sync::Arc;
use std::time::Duration;

use kaa_document::{ConfigDocument, ConfigPath};
use kaa_sync::{AutoSaver, DocumentSync, SaveMode, SyncStatus};
use kaa_test_utils::{CallKind, RecordingBackend};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};

async fn loaded(initial: Value) -> (Arc<RecordingBackend>, DocumentSync) {
    let backend = Arc::new(RecordingBackend::new(initial));
    let sync = DocumentSync::new(backend.clone());
    sync.load().await.unwrap();
    (backend, sync)
}

#[tokio::test]
async fn test_full_save_adopts_server_reply() {
    let (backend, sync) = loaded(json!({"produce": {"enabled": false}})).await;
    let reply = json!({"produce": {"enabled": true}, "revision": 8});
    backend.set_reply(reply.clone());

    sync.set("produce.enabled", json!(true)).unwrap();
    sync.save(SaveMode::Full).await.unwrap();

    assert_eq!(sync.value(), Some(reply));
    assert!(!sync.is_dirty());
    assert_eq!(sync.dirty_patch(), None);
    assert_eq!(sync.status(), SyncStatus::Clean);
}

#[tokio::test]
async fn test_failed_save_changes_nothing() {
    let (backend, sync) = loaded(json!({"a": {"b": 1}, "c": [1, 2]})).await;
    sync.set("a.b", json!(2)).unwrap();
    sync.set("c.1", json!(5)).unwrap();
    let doc_before = sync.value();
    let mask_before = sync.dirty_mask();

    backend.set_failing(true);
    let err = sync.save(SaveMode::Dirty).await.unwrap_err();

    assert_eq!(err.to_string(), "HTTP 500");
    assert_eq!(sync.value(), doc_before);
    assert_eq!(sync.dirty_mask(), mask_before);
    assert_eq!(sync.status(), SyncStatus::Error);
    assert_eq!(backend.document(), json!({"a": {"b": 1}, "c": [1, 2]}));

    // Nothing was lost: a retry sends the same edits.
    backend.set_failing(false);
    sync.save(SaveMode::Dirty).await.unwrap();
    assert_eq!(backend.document(), json!({"a": {"b": 2}, "c": [1, 5]}));
}

#[tokio::test(start_paused = true)]
async fn test_edits_during_save_stay_dirty() {
    let (backend, sync) = loaded(json!({"a": 0, "b": 0})).await;
    backend.set_latency(Duration::from_millis(100));

    sync.set("a", json!(1)).unwrap();
    let save = tokio::spawn({
        let sync = sync.clone();
        async move { sync.save(SaveMode::Full).await }
    });
    sleep(Duration::from_millis(10)).await;
    assert_eq!(sync.status(), SyncStatus::Saving);

    sync.set("b", json!(2)).unwrap();
    save.await.unwrap().unwrap();

    assert_eq!(backend.document(), json!({"a": 1, "b": 0}));
    assert_eq!(sync.value(), Some(json!({"a": 1, "b": 2})));
    assert_eq!(sync.dirty_patch(), Some(json!({"b": 2})));
    assert_eq!(sync.status(), SyncStatus::Dirty);
}

#[tokio::test(start_paused = true)]
async fn test_debounce_coalesces_edits_into_one_save() {
    let (backend, sync) = loaded(json!({"a": 0, "b": 0, "c": 0, "untouched": 0})).await;
    let start = Instant::now();
    let saver = AutoSaver::spawn(sync.clone(), Duration::from_millis(800));

    sync.set("a", json!(1)).unwrap();
    sleep(Duration::from_millis(200)).await;
    sync.set("b", json!(2)).unwrap();
    sleep(Duration::from_millis(300)).await;
    sync.set("c", json!(3)).unwrap();
    sleep(Duration::from_millis(799)).await;
    assert!(backend.writes().is_empty());

    sleep(Duration::from_millis(2_000)).await;
    let writes = backend.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].kind, CallKind::Patch);
    assert_eq!(writes[0].body, Some(json!({"a": 1, "b": 2, "c": 3})));

    let fired = writes[0].at - start;
    assert!(fired >= Duration::from_millis(1_300), "fired at {fired:?}");
    assert!(fired < Duration::from_millis(1_310), "fired at {fired:?}");
    assert!(!sync.is_dirty());

    saver.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_edit_during_autosave_opens_new_window() {
    let (backend, sync) = loaded(json!({"a": 0, "b": 0})).await;
    backend.set_latency(Duration::from_millis(300));
    let start = Instant::now();
    let saver = AutoSaver::spawn(sync.clone(), Duration::from_millis(800));

    sync.set("a", json!(1)).unwrap();
    // First save starts at 800 and is in flight until 1100.
    sleep(Duration::from_millis(900)).await;
    sync.set("b", json!(2)).unwrap();
    sleep(Duration::from_secs(5)).await;

    let writes = backend.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].body, Some(json!({"a": 1})));
    assert_eq!(writes[1].body, Some(json!({"b": 2})));
    assert!(writes[1].at - start >= Duration::from_millis(1_700));
    assert_eq!(backend.document(), json!({"a": 1, "b": 2}));
    assert_eq!(sync.status(), SyncStatus::Clean);

    saver.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_autosave_is_not_retried() {
    let (backend, sync) = loaded(json!({"a": 0})).await;
    backend.set_failing(true);
    let saver = AutoSaver::spawn(sync.clone(), Duration::from_millis(800));

    sync.set("a", json!(1)).unwrap();
    sleep(Duration::from_secs(10)).await;

    assert_eq!(backend.writes().len(), 1);
    assert_eq!(sync.status(), SyncStatus::Error);
    assert!(sync.is_dirty());

    backend.set_failing(false);
    saver.flush().await.unwrap();
    assert_eq!(sync.status(), SyncStatus::Clean);
    saver.stop().await;
}

#[tokio::test]
async fn test_load_discards_local_edits() {
    let (backend, sync) = loaded(json!({"a": 1})).await;
    sync.set("a", json!(2)).unwrap();
    sync.load().await.unwrap();

    assert_eq!(sync.value(), Some(json!({"a": 1})));
    assert!(!sync.is_dirty());
    assert_eq!(
        backend.calls().iter().filter(|c| c.kind == CallKind::Fetch).count(),
        2
    );
}

fn edit_strategy() -> impl Strategy<Value = Vec<(Vec<String>, i64)>> {
    let segment = prop::sample::select(vec!["a", "b", "c"]).prop_map(String::from);
    let path = prop::collection::vec(segment, 1..=3);
    prop::collection::vec((path, any::<i64>()), 0..8)
}

proptest! {
    #[test]
    fn test_set_then_get_round_trips(edits in edit_strategy()) {
        let sync = DocumentSync::new(Arc::new(RecordingBackend::new(json!({}))));
        let mut reference = ConfigDocument::empty();
        for (segments, value) in &edits {
            let path = ConfigPath::new(segments.clone());
            sync.set_at(&path, json!(value)).unwrap();
            reference.set_at(&path, json!(value)).unwrap();
            prop_assert_eq!(sync.get_at(&path, Value::Null), json!(value));
        }
        if edits.is_empty() {
            prop_assert_eq!(sync.value(), None);
        } else {
            prop_assert_eq!(sync.value(), Some(reference.into_value()));
        }
    }
}
