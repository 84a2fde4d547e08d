use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kaa_api::{
    ApiClient, ApiConfig, EndAction, ProduceSolution, QuickSettingsDto, QuickSettingsResponse,
    RunButtonState, RunStatus, TaskAction, TaskOverviewDto, TaskRow,
};
use kaa_document::ConfigDocument;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::Semaphore;
use warp::http::StatusCode;
use warp::reply::{Reply, Response};
use warp::Filter;

use crate::fixtures;

/// Mutable world behind a [`FakeServer`]
#[derive(Debug)]
pub struct FakeState {
    pub quick: Mutex<QuickSettingsResponse>,
    pub overview: Mutex<TaskOverviewDto>,
    pub options: Mutex<JsonValue>,
    /// `data` member of the v1 config
    pub config: Mutex<JsonValue>,
    pub solutions: Mutex<Vec<ProduceSolution>>,
    pub end_action: Mutex<EndAction>,
    pub version: Mutex<Option<String>>,
    /// Events served per SSE connection before the server hangs up
    pub events: Mutex<Vec<JsonValue>>,
    fail_writes: AtomicBool,
    hold_writes: AtomicBool,
    read_delay: Mutex<Duration>,
    gate: Semaphore,
    hits: Mutex<BTreeMap<String, usize>>,
    next_id: AtomicUsize,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            quick: Mutex::new(fixtures::sample_quick()),
            overview: Mutex::new(fixtures::sample_overview(RunStatus::Start)),
            options: Mutex::new(fixtures::sample_options()),
            config: Mutex::new(fixtures::sample_config_data()),
            solutions: Mutex::new(vec![fixtures::sample_solution("s1", "Default")]),
            end_action: Mutex::new(EndAction::DoNothing),
            version: Mutex::new(Some("v0.9.0".to_string())),
            events: Mutex::new(vec![json!({"type": "task_status", "data": {}, "ts": 1})]),
            fail_writes: AtomicBool::new(false),
            hold_writes: AtomicBool::new(false),
            read_delay: Mutex::new(Duration::ZERO),
            gate: Semaphore::new(0),
            hits: Mutex::new(BTreeMap::new()),
            next_id: AtomicUsize::new(2),
        }
    }
}

impl FakeState {
    /// Answer every write with `HTTP 500`
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Park writes until [`Self::release_write`]
    pub fn hold_writes(&self, hold: bool) {
        self.hold_writes.store(hold, Ordering::SeqCst);
    }

    /// Answer action-API reads `delay` late, with the state as it was on arrival
    pub fn delay_reads(&self, delay: Duration) {
        *self.read_delay.lock() = delay;
    }

    /// Let one parked write proceed
    pub fn release_write(&self) {
        self.gate.add_permits(1);
    }

    /// Number of requests seen for `route`, e.g. `"GET /api/v1/events"`
    pub fn hits(&self, route: &str) -> usize {
        self.hits.lock().get(route).copied().unwrap_or(0)
    }

    fn hit(&self, route: &str) {
        *self.hits.lock().entry(route.to_string()).or_insert(0) += 1;
    }

    /// Gate for writes; `Err` carries the canned failure reply
    async fn admit_write(&self) -> Result<(), Response> {
        if self.hold_writes.load(Ordering::SeqCst) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(warp::reply::with_status(
                warp::reply::json(&json!({"message": "write rejected"})),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
            .into_response());
        }
        Ok(())
    }
}

/// In-process kaa backend on an ephemeral port
#[derive(Debug, Clone)]
pub struct FakeServer {
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
}

impl FakeServer {
    /// Serve the default fixtures; must be called within a Tokio runtime
    pub fn start() -> Self {
        Self::with_state(FakeState::default())
    }

    pub fn with_state(state: FakeState) -> Self {
        let state = Arc::new(state);
        let (addr, server) =
            warp::serve(routes(Arc::clone(&state))).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig::new().with_base_url(self.base_url())
    }

    /// Client pointed at this server
    ///
    /// # Panics
    /// Never for a started server; the address is always a valid URL
    pub fn client(&self) -> ApiClient {
        ApiClient::new(&self.api_config()).expect("fake server URL is valid")
    }
}

fn ok<T: Serialize>(data: &T) -> Response {
    warp::reply::json(&json!({"success": true, "data": data})).into_response()
}

fn fail(message: &str) -> Response {
    warp::reply::json(&json!({"success": false, "error": {"message": message}})).into_response()
}

fn reply_json<T: Serialize>(body: &T) -> Response {
    warp::reply::json(body).into_response()
}

fn with_state(
    state: Arc<FakeState>,
) -> impl Filter<Extract = (Arc<FakeState>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || Arc::clone(&state))
}

type Query = HashMap<String, String>;

fn routes(
    state: Arc<FakeState>,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    let action_get = warp::get()
        .and(warp::path!("api" / String))
        .and(warp::query::<Query>())
        .and(with_state(state.clone()))
        .then(|area: String, q: Query, s: Arc<FakeState>| async move {
            let action = q.get("action").cloned().unwrap_or_default();
            s.hit(&format!("GET /api/{area}?action={action}"));
            let reply = match (area.as_str(), action.as_str()) {
                ("config", "get_quick") => ok(&*s.quick.lock()),
                ("config", "get_options") => ok(&*s.options.lock()),
                ("tasks", "overview") => ok(&*s.overview.lock()),
                ("system", "get_version") => match s.version.lock().clone() {
                    Some(v) => ok(&v),
                    None => fail("version unavailable"),
                },
                _ => fail("unknown action"),
            };
            let delay = *s.read_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            reply
        });

    let action_post = warp::post()
        .and(warp::path!("api" / String))
        .and(warp::body::json::<JsonValue>())
        .and(with_state(state.clone()))
        .then(|area: String, body: JsonValue, s: Arc<FakeState>| async move {
            s.hit(&format!("POST /api/{area}"));
            if let Err(resp) = s.admit_write().await {
                return resp;
            }
            match area.as_str() {
                "config" => config_action(&s, &body),
                "tasks" => match serde_json::from_value::<TaskAction>(body) {
                    Ok(action) => {
                        let mut overview = s.overview.lock();
                        *overview = apply_task_action(&overview, &action);
                        ok(&*overview)
                    }
                    Err(_) => fail("bad task action"),
                },
                _ => fail("unknown area"),
            }
        });

    let v1_config = warp::path!("api" / "v1" / "config")
        .and(warp::get())
        .and(with_state(state.clone()))
        .map(|s: Arc<FakeState>| {
            s.hit("GET /api/v1/config");
            reply_json(&json!({"data": &*s.config.lock()}))
        });

    let v1_config_put = warp::path!("api" / "v1" / "config")
        .and(warp::put())
        .and(warp::body::json::<JsonValue>())
        .and(with_state(state.clone()))
        .then(|body: JsonValue, s: Arc<FakeState>| async move {
            s.hit("PUT /api/v1/config");
            if let Err(resp) = s.admit_write().await {
                return resp;
            }
            *s.config.lock() = body.get("data").cloned().unwrap_or(JsonValue::Null);
            reply_json(&json!({"ok": true, "message": "配置已保存"}))
        });

    let v1_quick = warp::path!("api" / "v1" / "config" / "quick")
        .and(warp::patch())
        .and(warp::body::json::<BTreeMap<String, JsonValue>>())
        .and(with_state(state.clone()))
        .then(|patch: BTreeMap<String, JsonValue>, s: Arc<FakeState>| async move {
            s.hit("PATCH /api/v1/config/quick");
            if let Err(resp) = s.admit_write().await {
                return resp;
            }
            let mut quick = s.quick.lock();
            if quick.values.apply_patch(&patch).is_err() {
                return fail("bad patch");
            }
            let values = QuickSettingsDto {
                end_action: None,
                ..quick.values.clone()
            };
            reply_json(&values)
        });

    let v1_end_action = warp::path!("api" / "v1" / "config" / "end_action")
        .and(warp::put())
        .and(warp::body::json::<JsonValue>())
        .and(with_state(state.clone()))
        .then(|body: JsonValue, s: Arc<FakeState>| async move {
            s.hit("PUT /api/v1/config/end_action");
            if let Err(resp) = s.admit_write().await {
                return resp;
            }
            match serde_json::from_value::<EndAction>(body["action"].clone()) {
                Ok(action) => {
                    *s.end_action.lock() = action;
                    reply_json(&json!({"ok": true, "message": ""}))
                }
                Err(_) => warp::reply::with_status(warp::reply(), StatusCode::UNPROCESSABLE_ENTITY)
                    .into_response(),
            }
        });

    let v1_run = warp::path!("api" / "v1" / "run" / String)
        .and(warp::method())
        .and(with_state(state.clone()))
        .map(|what: String, method: warp::http::Method, s: Arc<FakeState>| {
            s.hit(&format!("{method} /api/v1/run/{what}"));
            let mut overview = s.overview.lock();
            match what.as_str() {
                "button_state" | "state" => reply_json(&run_button(&overview)),
                "pause_button_state" => reply_json(&pause_button(&overview)),
                "toggle" => {
                    let action = if overview.run_button.status == RunStatus::Start {
                        TaskAction::RunAll
                    } else {
                        TaskAction::Stop
                    };
                    *overview = apply_task_action(&overview, &action);
                    reply_json(&run_button(&overview))
                }
                "pause_toggle" => {
                    *overview = apply_task_action(&overview, &TaskAction::PauseToggle);
                    reply_json(&pause_button(&overview))
                }
                _ => warp::reply::with_status(warp::reply(), StatusCode::NOT_FOUND).into_response(),
            }
        });

    let v1_tasks = warp::path!("api" / "v1" / "tasks")
        .and(warp::get())
        .and(with_state(state.clone()))
        .map(|s: Arc<FakeState>| {
            s.hit("GET /api/v1/tasks");
            reply_json(&vec![
                TaskRow {
                    name: "purchase".into(),
                    status_text: "finished".into(),
                },
                TaskRow {
                    name: "produce".into(),
                    status_text: "pending".into(),
                },
            ])
        });

    let v1_solutions = warp::path!("api" / "v1" / "produce" / "solutions")
        .and(warp::method())
        .and(warp::query::<Query>())
        .and(with_state(state.clone()))
        .then(|method: warp::http::Method, q: Query, s: Arc<FakeState>| async move {
            s.hit(&format!("{method} /api/v1/produce/solutions"));
            if method == warp::http::Method::POST {
                if let Err(resp) = s.admit_write().await {
                    return resp;
                }
                let id = format!("s{}", s.next_id.fetch_add(1, Ordering::SeqCst));
                let created = ProduceSolution {
                    id,
                    name: q.get("name").cloned().unwrap_or_default(),
                    description: q.get("description").cloned(),
                    data: json!({}),
                };
                s.solutions.lock().push(created.clone());
                reply_json(&created)
            } else {
                reply_json(&*s.solutions.lock())
            }
        });

    let v1_solution = warp::path!("api" / "v1" / "produce" / "solutions" / String)
        .and(warp::method())
        .and(warp::body::bytes())
        .and(with_state(state.clone()))
        .then(
            |id: String, method: warp::http::Method, body: Bytes, s: Arc<FakeState>| async move {
                s.hit(&format!("{method} /api/v1/produce/solutions/:id"));
                if method != warp::http::Method::GET {
                    if let Err(resp) = s.admit_write().await {
                        return resp;
                    }
                }
                let mut list = s.solutions.lock();
                let Some(pos) = list.iter().position(|x| x.id == id) else {
                    return warp::reply::with_status(
                        warp::reply::json(&json!({"message": "solution not found"})),
                        StatusCode::NOT_FOUND,
                    )
                    .into_response();
                };
                match method {
                    m if m == warp::http::Method::DELETE => {
                        list.remove(pos);
                        warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT).into_response()
                    }
                    m if m == warp::http::Method::PUT => {
                        match serde_json::from_slice::<ProduceSolution>(&body) {
                            Ok(mut updated) => {
                                updated.id = id;
                                list[pos] = updated.clone();
                                reply_json(&updated)
                            }
                            Err(_) => fail("bad solution body"),
                        }
                    }
                    _ => reply_json(&list[pos]),
                }
            },
        );

    let v1_events = warp::path!("api" / "v1" / "events")
        .and(with_state(state))
        .map(|s: Arc<FakeState>| {
            s.hit("GET /api/v1/events");
            let body: String = s
                .events
                .lock()
                .iter()
                .map(|ev| format!("data: {ev}\n\n"))
                .collect();
            warp::reply::with_header(body, "content-type", "text/event-stream").into_response()
        });

    action_get
        .or(action_post)
        .unify()
        .or(v1_quick)
        .unify()
        .or(v1_end_action)
        .unify()
        .or(v1_config)
        .unify()
        .or(v1_config_put)
        .unify()
        .or(v1_run)
        .unify()
        .or(v1_tasks)
        .unify()
        .or(v1_solutions)
        .unify()
        .or(v1_solution)
        .unify()
        .or(v1_events)
        .unify()
}

fn config_action(s: &FakeState, body: &JsonValue) -> Response {
    match body["action"].as_str() {
        Some("patch_quick") => {
            let patch: BTreeMap<String, JsonValue> =
                serde_json::from_value(body["patch"].clone()).unwrap_or_default();
            let mut quick = s.quick.lock();
            match quick.values.apply_patch(&patch) {
                Ok(()) => ok(&*quick),
                Err(_) => fail("bad patch"),
            }
        }
        Some("patch_options") => {
            let mut options = s.options.lock();
            let mut doc = ConfigDocument::new(options.take());
            doc.merge_patch(&body["patch"]);
            *options = doc.into_value();
            ok(&*options)
        }
        Some("save_options") => {
            let mut options = s.options.lock();
            *options = body["options"].clone();
            ok(&*options)
        }
        _ => fail("unknown config action"),
    }
}

fn apply_task_action(current: &TaskOverviewDto, action: &TaskAction) -> TaskOverviewDto {
    let mut next = current.clone();
    match action {
        TaskAction::RunAll | TaskAction::RunSingle { .. } => {
            next.run_button.status = RunStatus::Stop;
            next.runtime.running = true;
            next.pause_button.interactive = true;
        }
        TaskAction::Stop => {
            next.run_button.status = RunStatus::Start;
            next.runtime.running = false;
            next.pause_button.interactive = false;
        }
        TaskAction::PauseToggle => {
            let pause = next.pause_button.status == kaa_api::PauseStatus::Pause;
            next.pause_button.status = if pause {
                kaa_api::PauseStatus::Resume
            } else {
                kaa_api::PauseStatus::Pause
            };
            next.paused = Some(pause);
        }
    }
    next
}

fn run_button(overview: &TaskOverviewDto) -> RunButtonState {
    RunButtonState {
        text: match overview.run_button.status {
            RunStatus::Start => "启动",
            RunStatus::Stop => "停止",
            RunStatus::Stopping => "停止中",
        }
        .to_string(),
        interactive: overview.run_button.interactive,
    }
}

fn pause_button(overview: &TaskOverviewDto) -> RunButtonState {
    RunButtonState {
        text: match overview.pause_button.status {
            kaa_api::PauseStatus::Pause => "暂停",
            kaa_api::PauseStatus::Resume => "继续",
        }
        .to_string(),
        interactive: overview.pause_button.interactive,
    }
}
