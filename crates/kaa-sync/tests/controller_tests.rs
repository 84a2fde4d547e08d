//! Controller Tests
//!
//! Each test runs against its own in-process fake backend.
//!
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kaa_api::{ApiClient, ApiConfig, EndAction, PauseStatus, RunStatus};
use kaa_sync::{
    DocumentSync, EventSupervisor, OptionsBackend, QueryCache, QuickSettingsController, RunBoard,
    SaveMode, SolutionsController, SyncConfig, SyncStatus, TaskOverviewController,
    V1ConfigBackend, VersionProbe,
};
use kaa_test_utils::{sample_config_data, FakeServer};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

/// Poll `check` until it holds or two seconds pass
async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn fast_reconnect() -> SyncConfig {
    SyncConfig::new()
        .with_backoff(
            Duration::from_millis(10),
            Duration::from_millis(40),
            Duration::ZERO,
        )
        .with_fallback_poll(Duration::from_millis(5))
}

// Quick settings

#[tokio::test]
async fn test_quick_toggle_visible_before_response_then_rolled_back() {
    let server = FakeServer::start();
    let quick = QuickSettingsController::new(server.client(), QueryCache::new());
    quick.load().await.unwrap();
    assert!(!quick.current().unwrap().values.purchase);

    server.state.hold_writes(true);
    server.state.fail_writes(true);
    let pending = tokio::spawn({
        let quick = quick.clone();
        async move { quick.toggle("purchase").await }
    });

    eventually("optimistic flag", || {
        quick.current().is_some_and(|q| q.values.purchase)
    })
    .await;
    eventually("request at server", || {
        server.state.hits("POST /api/config") == 1
    })
    .await;
    assert!(quick.current().unwrap().values.purchase);

    server.state.release_write();
    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "HTTP 500");
    assert!(!quick.current().unwrap().values.purchase);
    assert!(!server.state.quick.lock().values.purchase);
}

#[tokio::test]
async fn test_quick_patch_replaced_by_server_reply() {
    let server = FakeServer::start();
    // Server side has drifted since the client loaded.
    let quick = QuickSettingsController::new(server.client(), QueryCache::new());
    quick.load().await.unwrap();
    server.state.quick.lock().values.presents = true;

    server.state.hold_writes(true);
    let pending = tokio::spawn({
        let quick = quick.clone();
        async move { quick.set_flag("purchase", true).await }
    });
    eventually("optimistic flag", || {
        quick.current().is_some_and(|q| q.values.purchase)
    })
    .await;
    assert!(!quick.current().unwrap().values.presents);

    server.state.release_write();
    let reply = pending.await.unwrap().unwrap();
    let stored = server.state.quick.lock().clone();
    assert_eq!(reply, stored);
    assert_eq!(quick.current(), Some(stored));
    assert!(quick.current().unwrap().values.presents);
}

#[tokio::test]
async fn test_quick_toggle_unknown_flag() {
    let server = FakeServer::start();
    let quick = QuickSettingsController::new(server.client(), QueryCache::new());

    let err = quick.toggle("does_not_exist").await.unwrap_err();
    assert!(err.to_string().contains("does_not_exist"));
    assert_eq!(server.state.hits("POST /api/config"), 0);
}

#[tokio::test]
async fn test_quick_ensure_uses_cache() {
    let server = FakeServer::start();
    let quick = QuickSettingsController::new(server.client(), QueryCache::new());

    quick.ensure().await.unwrap();
    quick.ensure().await.unwrap();
    assert_eq!(server.state.hits("GET /api/config?action=get_quick"), 1);
}

// Task overview

#[tokio::test]
async fn test_task_actions_update_overview() {
    let server = FakeServer::start();
    let tasks = TaskOverviewController::new(server.client(), QueryCache::new());
    let loaded = tasks.load().await.unwrap();
    assert_eq!(loaded.run_button.status, RunStatus::Start);

    let after = tasks.run_all().await.unwrap();
    assert_eq!(after.run_button.status, RunStatus::Stop);
    assert_eq!(tasks.current(), Some(after));

    let paused = tasks.pause_toggle().await.unwrap();
    assert_eq!(paused.pause_button.status, PauseStatus::Resume);
    assert_eq!(paused.paused, Some(true));

    let stopped = tasks.stop().await.unwrap();
    assert_eq!(stopped.run_button.status, RunStatus::Start);
    assert!(!stopped.runtime.running);
}

#[tokio::test]
async fn test_failed_task_action_rolls_back() {
    let server = FakeServer::start();
    let tasks = TaskOverviewController::new(server.client(), QueryCache::new());
    let before = tasks.load().await.unwrap();

    server.state.fail_writes(true);
    assert!(tasks.run_single("produce").await.is_err());
    assert_eq!(tasks.current(), Some(before));
}

#[tokio::test]
async fn test_poll_during_action_does_not_overwrite() {
    let server = FakeServer::start();
    let tasks = TaskOverviewController::new(server.client(), QueryCache::new());
    tasks.load().await.unwrap();

    // The poll sees Start on arrival and answers only after the action is done.
    server.state.delay_reads(Duration::from_millis(300));
    let poll = tokio::spawn({
        let tasks = tasks.clone();
        async move { tasks.load().await }
    });
    eventually("poll at server", || {
        server.state.hits("GET /api/tasks?action=overview") == 2
    })
    .await;

    let after = tasks.run_all().await.unwrap();
    assert_eq!(after.run_button.status, RunStatus::Stop);

    let stale = poll.await.unwrap();
    assert!(stale.unwrap_err().is_cancelled());
    assert_eq!(tasks.current().unwrap().run_button.status, RunStatus::Stop);
}

#[tokio::test]
async fn test_poller_refreshes_until_stopped() {
    let server = FakeServer::start();
    let tasks = TaskOverviewController::new(server.client(), QueryCache::new());

    let poller = tasks.spawn_poller(Duration::from_millis(20));
    eventually("three polls", || {
        server.state.hits("GET /api/tasks?action=overview") >= 3
    })
    .await;
    assert!(poller.is_running());
    assert!(tasks.current().is_some());

    poller.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = server.state.hits("GET /api/tasks?action=overview");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.state.hits("GET /api/tasks?action=overview"), settled);
}

// Run board

#[tokio::test]
async fn test_run_board_refresh_derives_flags() {
    let server = FakeServer::start();
    let board = RunBoard::new(server.client());
    board.refresh().await;

    let state = board.snapshot();
    assert_eq!(state.error, None);
    assert!(!state.loading);
    assert_eq!(state.run_button.text, "启动");
    assert_eq!(state.pause_button.text, "暂停");
    assert_eq!(state.tasks.len(), 2);
    assert!(state.quick.purchase);
    assert!(state.quick.contest);
    assert!(state.quick.presents);
    assert!(!state.quick.produce);
    assert_eq!(state.end_action, EndAction::DoNothing);
}

#[tokio::test]
async fn test_run_board_reads_end_action_from_config() {
    let server = FakeServer::start();
    server.state.config.lock()["user_configs"][0]["options"]["end_game"] =
        json!({"shutdown": false, "hibernate": true});
    let board = RunBoard::new(server.client());
    board.refresh().await;
    assert_eq!(board.snapshot().end_action, EndAction::Hibernate);
}

#[tokio::test]
async fn test_run_board_toggles() {
    let server = FakeServer::start();
    let board = RunBoard::new(server.client());

    board.toggle_run().await;
    assert_eq!(board.snapshot().run_button.text, "停止");
    assert_eq!(server.state.hits("GET /api/v1/tasks"), 1);

    board.toggle_pause().await;
    assert_eq!(board.snapshot().pause_button.text, "继续");

    board.save_end_action(EndAction::Shutdown).await;
    assert_eq!(board.snapshot().end_action, EndAction::Shutdown);
    assert_eq!(*server.state.end_action.lock(), EndAction::Shutdown);

    board
        .set_quick(&BTreeMap::from([("capsule_toys".to_string(), json!(true))]))
        .await;
    assert!(board.snapshot().quick.capsule_toys);
    assert_eq!(board.snapshot().error, None);
}

#[tokio::test]
async fn test_run_board_records_errors() {
    let server = FakeServer::start();
    let board = RunBoard::new(server.client());
    server.state.fail_writes(true);

    board.save_end_action(EndAction::Shutdown).await;
    let state = board.snapshot();
    assert_eq!(state.end_action, EndAction::DoNothing);
    assert_eq!(state.error.as_deref(), Some("HTTP 500"));
}

// Documents over HTTP

#[tokio::test]
async fn test_v1_config_round_trip() {
    let server = FakeServer::start();
    let sync = DocumentSync::new(Arc::new(V1ConfigBackend::new(server.client())));
    sync.load().await.unwrap();
    assert_eq!(sync.value(), Some(sample_config_data()));

    sync.set("user_configs.0.options.produce.enabled", json!(true))
        .unwrap();
    sync.save(SaveMode::Full).await.unwrap();

    assert_eq!(sync.status(), SyncStatus::Clean);
    assert_eq!(sync.message().as_deref(), Some("配置已保存"));
    assert_eq!(
        server.state.config.lock()["user_configs"][0]["options"]["produce"]["enabled"],
        json!(true)
    );
}

#[tokio::test]
async fn test_v1_config_dirty_save_keeps_server_changes() {
    let server = FakeServer::start();
    let sync = DocumentSync::new(Arc::new(V1ConfigBackend::new(server.client())));
    sync.load().await.unwrap();

    // Someone else edits another field after our load.
    server.state.config.lock()["version"] = json!(6);
    sync.set("user_configs.0.options.assignment.enabled", json!(true))
        .unwrap();
    sync.save(SaveMode::Dirty).await.unwrap();

    let stored = server.state.config.lock().clone();
    assert_eq!(stored["version"], json!(6));
    assert_eq!(
        stored["user_configs"][0]["options"]["assignment"]["enabled"],
        json!(true)
    );
    assert_eq!(sync.value(), Some(stored));
}

#[tokio::test]
async fn test_v1_config_dirty_save_of_array_element() {
    let server = FakeServer::start();
    *server.state.config.lock() = json!({"list": [1, 2, 3], "x": 0});
    let sync = DocumentSync::new(Arc::new(V1ConfigBackend::new(server.client())));
    sync.load().await.unwrap();

    sync.set("list.1", json!(9)).unwrap();
    assert_eq!(sync.dirty_patch(), Some(json!({"list": [null, 9]})));
    sync.save(SaveMode::Dirty).await.unwrap();

    let stored = server.state.config.lock().clone();
    assert_eq!(stored, json!({"list": [1, 9, 3], "x": 0}));
    assert_eq!(sync.value(), Some(stored));
    assert_eq!(sync.status(), SyncStatus::Clean);
}

#[tokio::test]
async fn test_v1_config_dirty_save_past_untouched_elements() {
    let server = FakeServer::start();
    *server.state.config.lock() = json!({"list": [1, 2, 3, 4]});
    let sync = DocumentSync::new(Arc::new(V1ConfigBackend::new(server.client())));
    sync.load().await.unwrap();

    // Another client rewrites the first element; our edit must not clobber it.
    server.state.config.lock()["list"][0] = json!(10);
    sync.set("list.2", json!("c")).unwrap();
    sync.save(SaveMode::Dirty).await.unwrap();

    assert_eq!(
        server.state.config.lock().clone(),
        json!({"list": [10, 2, "c", 4]})
    );
}

#[tokio::test]
async fn test_options_dirty_save_adopts_server_tree() {
    let server = FakeServer::start();
    let sync = DocumentSync::new(Arc::new(OptionsBackend::new(server.client())));
    sync.load().await.unwrap();

    sync.set("misc.check_update", json!("github")).unwrap();
    sync.save(SaveMode::Dirty).await.unwrap();

    let stored = server.state.options.lock().clone();
    assert_eq!(stored["misc"]["check_update"], json!("github"));
    assert_eq!(stored["purchase"]["ap_items"], json!([0, 1]));
    assert_eq!(sync.value(), Some(stored));
    assert!(!sync.is_dirty());
}

#[tokio::test]
async fn test_save_failure_over_http_keeps_edits() {
    let server = FakeServer::start();
    let sync = DocumentSync::new(Arc::new(OptionsBackend::new(server.client())));
    sync.load().await.unwrap();
    server.state.fail_writes(true);

    sync.set("produce.enabled", json!(true)).unwrap();
    assert!(sync.save(SaveMode::Dirty).await.is_err());

    assert_eq!(sync.status(), SyncStatus::Error);
    assert_eq!(sync.error().as_deref(), Some("HTTP 500"));
    assert_eq!(sync.dirty_patch(), Some(json!({"produce": {"enabled": true}})));
    assert_eq!(server.state.options.lock()["produce"]["enabled"], json!(false));
}

// Solutions

#[tokio::test]
async fn test_solution_create_and_delete() {
    let server = FakeServer::start();
    let solutions = SolutionsController::new(server.client(), QueryCache::new());
    assert_eq!(solutions.list().await.unwrap().len(), 1);

    let created = solutions.create("Hard mode", Some("pt boost on")).await.unwrap();
    assert_eq!(created.name, "Hard mode");
    assert_eq!(created.description.as_deref(), Some("pt boost on"));
    let cached = solutions.cached().unwrap();
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[1].id, created.id);

    solutions.delete(&created.id).await.unwrap();
    assert_eq!(solutions.cached().unwrap().len(), 1);
    assert_eq!(server.state.solutions.lock().len(), 1);
}

#[tokio::test]
async fn test_solution_delete_failure_restores_list() {
    let server = FakeServer::start();
    let solutions = SolutionsController::new(server.client(), QueryCache::new());
    let before = solutions.list().await.unwrap();

    server.state.fail_writes(true);
    assert!(solutions.delete("s1").await.is_err());
    assert_eq!(solutions.cached(), Some(before));
}

#[tokio::test]
async fn test_solution_draft_saves_data_only() {
    let server = FakeServer::start();
    let solutions = SolutionsController::new(server.client(), QueryCache::new());
    let draft = solutions.draft("s1");
    draft.load().await.unwrap();
    assert_eq!(draft.get("mode", Value::Null).unwrap(), json!("pro"));

    draft.set("use_pt_boost", json!(true)).unwrap();
    draft.save(SaveMode::Dirty).await.unwrap();

    let stored = server.state.solutions.lock()[0].clone();
    assert_eq!(stored.name, "Default");
    assert_eq!(stored.data["use_pt_boost"], json!(true));
    assert_eq!(stored.data["mode"], json!("pro"));
    assert_eq!(draft.status(), SyncStatus::Clean);
}

#[tokio::test]
async fn test_solution_draft_dirty_save_of_array_element() {
    let server = FakeServer::start();
    server.state.solutions.lock()[0].data["idols"] = json!(["a", "b", "c"]);
    let solutions = SolutionsController::new(server.client(), QueryCache::new());
    let draft = solutions.draft("s1");
    draft.load().await.unwrap();

    draft.set("idols.1", json!("x")).unwrap();
    draft.save(SaveMode::Dirty).await.unwrap();

    let stored = server.state.solutions.lock()[0].clone();
    assert_eq!(stored.data["idols"], json!(["a", "x", "c"]));
    assert_eq!(stored.data["mode"], json!("pro"));
}

// Version probe

#[tokio::test]
async fn test_version_probe_caches() {
    let server = FakeServer::start();
    let probe = VersionProbe::new(server.client(), Duration::from_secs(60));

    assert_eq!(probe.get().await.as_deref(), Some("v0.9.0"));
    assert_eq!(probe.get().await.as_deref(), Some("v0.9.0"));
    assert_eq!(server.state.hits("GET /api/system?action=get_version"), 1);

    *server.state.version.lock() = Some("v0.9.1".to_string());
    assert_eq!(probe.refresh().await.as_deref(), Some("v0.9.1"));
    assert_eq!(server.state.hits("GET /api/system?action=get_version"), 2);
}

#[tokio::test]
async fn test_version_probe_unavailable() {
    let server = FakeServer::start();
    *server.state.version.lock() = None;
    let probe = VersionProbe::new(server.client(), Duration::from_secs(60));
    assert_eq!(probe.get().await, None);
}

// Event supervision

#[tokio::test]
async fn test_supervisor_reconnects_after_server_closes() {
    let server = FakeServer::start();
    let events = Arc::new(AtomicUsize::new(0));
    let supervisor = EventSupervisor::spawn(
        server.client(),
        fast_reconnect(),
        {
            let events = Arc::clone(&events);
            move |_| {
                events.fetch_add(1, Ordering::SeqCst);
            }
        },
        || async {},
    );

    eventually("second connection", || {
        server.state.hits("GET /api/v1/events") >= 2
    })
    .await;
    eventually("events delivered", || events.load(Ordering::SeqCst) >= 2).await;

    supervisor.stop().await;
    let settled = server.state.hits("GET /api/v1/events");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.state.hits("GET /api/v1/events"), settled);
}

#[tokio::test]
async fn test_supervisor_polls_while_unreachable() {
    // Nothing listens on the discard port.
    let client = ApiClient::new(&ApiConfig::new().with_base_url("http://127.0.0.1:9")).unwrap();
    let polls = Arc::new(AtomicUsize::new(0));
    let supervisor = EventSupervisor::spawn(client, fast_reconnect(), |_| {}, {
        let polls = Arc::clone(&polls);
        move || {
            let polls = Arc::clone(&polls);
            async move {
                polls.fetch_add(1, Ordering::SeqCst);
            }
        }
    });

    eventually("fallback polls", || polls.load(Ordering::SeqCst) >= 3).await;
    let status = supervisor.status();
    assert!(!status.connected);
    assert!(status.polling);
    assert!(status.retry >= 1);

    supervisor.stop().await;
    let settled = polls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(polls.load(Ordering::SeqCst), settled);
}

#[tokio::test]
async fn test_supervisor_drives_run_board() {
    let server = FakeServer::start();
    let board = RunBoard::new(server.client());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let supervisor = EventSupervisor::spawn(
        server.client(),
        fast_reconnect(),
        move |event| {
            let _ = tx.send(event);
        },
        || async {},
    );

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, "task_status");
    board.refresh().await;
    assert_eq!(board.snapshot().tasks.len(), 2);

    supervisor.stop().await;
}
