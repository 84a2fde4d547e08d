//! HTTP client for the kaa backend
//!
//! Two API surfaces share one connection pool:
//! - the action API under `/api`, wrapping every reply in a
//!   `{success, data, error}` envelope
//! - the v1 REST API under `/api/v1`, returning plain JSON bodies

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::config::ApiConfig;
use crate::error::{ApiEnvelope, ApiError};
use crate::sse::SseDecoder;
use crate::types::{
    AppEvent, EndAction, IdolOption, InstallResponse, MessageReply, OptionItem, ProduceSolution,
    QuickSettingsDto, QuickSettingsResponse, RunButtonState, SaveReceipt, ScreenSize, TaskAction,
    TaskOverviewDto, TaskRow, VersionInfo,
};

const ACTION_PREFIX: &str = "/api";
const V1_PREFIX: &str = "/api/v1";

/// Decoded server-sent events, in arrival order
pub type EventStream = BoxStream<'static, Result<AppEvent, ApiError>>;

/// Handle to the backend
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    events_path: String,
    timeout: Duration,
}

impl ApiClient {
    /// Build a client from configuration
    ///
    /// # Errors
    /// Returns error if the base URL is not absolute or the TLS backend fails
    /// to initialize
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;

        // No client-wide timeout: it would also cut the event stream.
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            base_url,
            events_path: config.events_path.clone(),
            timeout: config.request_timeout(),
        })
    }

    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `path` is trusted route text; each `tail` entry is appended as one
    /// escaped path segment, so ids cannot change the route.
    fn url(&self, path: &str, tail: &[&str]) -> Result<Url, ApiError> {
        let joined = format!("{}{}", self.base_url, path);
        let mut url =
            Url::parse(&joined).map_err(|e| ApiError::InvalidUrl(format!("{joined}: {e}")))?;
        if !tail.is_empty() {
            url.path_segments_mut()
                .map_err(|()| ApiError::InvalidUrl(format!("{joined}: cannot be a base")))?
                .pop_if_empty()
                .extend(tail);
        }
        Ok(url)
    }

    fn request(&self, method: Method, path: &str, tail: &[&str]) -> Result<RequestBuilder, ApiError> {
        Ok(self
            .http
            .request(method, self.url(path, tail)?)
            .timeout(self.timeout)
            .header(ACCEPT, "application/json"))
    }

    // ------------------------------------------------------------------
    // Action API
    // ------------------------------------------------------------------

    async fn action_get<T: DeserializeOwned>(
        &self,
        path: &str,
        action: &str,
    ) -> Result<Option<T>, ApiError> {
        let full = format!("{ACTION_PREFIX}{path}");
        tracing::debug!("GET {}?action={}", full, action);
        let resp = self
            .request(Method::GET, &full, &[])?
            .query(&[("action", action)])
            .send()
            .await?;
        read_envelope(resp, "GET", path).await
    }

    async fn action_post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<T>, ApiError> {
        let full = format!("{ACTION_PREFIX}{path}");
        tracing::debug!("POST {}", full);
        let resp = self.request(Method::POST, &full, &[])?.json(body).send().await?;
        read_envelope(resp, "POST", path).await
    }

    /// `GET /config?action=get_quick`
    ///
    /// # Errors
    /// Transport or envelope failure
    pub async fn get_quick_settings(&self) -> Result<QuickSettingsResponse, ApiError> {
        let data = self.action_get("/config", "get_quick").await?;
        require(data, "/config?action=get_quick")
    }

    /// `POST /config {action: "patch_quick", patch}`
    ///
    /// # Errors
    /// Transport or envelope failure
    pub async fn patch_quick_settings(
        &self,
        patch: &BTreeMap<String, JsonValue>,
    ) -> Result<QuickSettingsResponse, ApiError> {
        let data = self
            .action_post("/config", &json!({"action": "patch_quick", "patch": patch}))
            .await?;
        require(data, "/config patch_quick")
    }

    /// `GET /config?action=get_options`: the editable configuration tree
    ///
    /// # Errors
    /// Transport or envelope failure
    pub async fn get_options(&self) -> Result<JsonValue, ApiError> {
        let data: Option<JsonValue> = self.action_get("/config", "get_options").await?;
        Ok(data.unwrap_or(JsonValue::Null))
    }

    /// `POST /config {action: "patch_options", patch}`; replies with the full tree
    ///
    /// # Errors
    /// Transport or envelope failure
    pub async fn patch_options(&self, patch: &JsonValue) -> Result<JsonValue, ApiError> {
        let data: Option<JsonValue> = self
            .action_post("/config", &json!({"action": "patch_options", "patch": patch}))
            .await?;
        require(data, "/config patch_options")
    }

    /// `POST /config {action: "save_options", options}`
    ///
    /// # Errors
    /// Transport or envelope failure
    pub async fn save_options(&self, options: &JsonValue) -> Result<Option<JsonValue>, ApiError> {
        self.action_post("/config", &json!({"action": "save_options", "options": options}))
            .await
    }

    /// `GET /tasks?action=overview`
    ///
    /// # Errors
    /// Transport or envelope failure
    pub async fn get_task_overview(&self) -> Result<TaskOverviewDto, ApiError> {
        let data = self.action_get("/tasks", "overview").await?;
        require(data, "/tasks?action=overview")
    }

    /// `POST /tasks {action, ...}`; replies with the updated overview
    ///
    /// # Errors
    /// Transport or envelope failure
    pub async fn post_task_action(&self, action: &TaskAction) -> Result<TaskOverviewDto, ApiError> {
        let data = self.action_post("/tasks", action).await?;
        require(data, "/tasks")
    }

    /// `GET /system?action=get_version`
    ///
    /// Never fails: an unreachable or confused backend simply has no version.
    pub async fn get_backend_version(&self) -> Option<String> {
        match self.action_get::<String>("/system", "get_version").await {
            Ok(version) => version,
            Err(e) => {
                tracing::debug!("Backend version unavailable: {}", e);
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // v1 API
    // ------------------------------------------------------------------

    async fn v1<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        tail: &[&str],
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<Response, ApiError> {
        let full = format!("{V1_PREFIX}{path}");
        tracing::debug!("{} {} {:?}", method, full, tail);
        let mut req = self.request(method, &full, tail)?;
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        check_status(req.send().await?).await
    }

    async fn v1_json<T: DeserializeOwned>(&self, method: Method, path: &str) -> Result<T, ApiError> {
        self.v1_json_at(method, path, &[]).await
    }

    async fn v1_json_at<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        tail: &[&str],
    ) -> Result<T, ApiError> {
        let resp = self.v1::<()>(method, path, tail, &[], None).await?;
        decode_json(resp).await
    }

    async fn v1_json_body<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.v1_json_body_at(method, path, &[], body).await
    }

    async fn v1_json_body_at<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        tail: &[&str],
        body: &B,
    ) -> Result<T, ApiError> {
        let resp = self.v1(method, path, tail, &[], Some(body)).await?;
        decode_json(resp).await
    }

    async fn v1_bytes(&self, path: &str, query: &[(&str, String)]) -> Result<Bytes, ApiError> {
        let resp = self.v1::<()>(Method::GET, path, &[], query, None).await?;
        Ok(resp.bytes().await?)
    }

    async fn v1_text(&self, path: &str) -> Result<String, ApiError> {
        let resp = self.v1::<()>(Method::GET, path, &[], &[], None).await?;
        let is_json = is_json(&resp);
        let body = resp.text().await?;
        if is_json {
            // A JSON string body; anything else is passed through as text.
            if let Ok(s) = serde_json::from_str::<String>(&body) {
                return Ok(s);
            }
        }
        Ok(body)
    }

    /// `GET /api/v1/config`: `{data: ...}` envelope around the document
    ///
    /// # Errors
    /// Transport or decode failure
    pub async fn get_config(&self) -> Result<JsonValue, ApiError> {
        self.v1_json(Method::GET, "/config").await
    }

    /// `PUT /api/v1/config {data}`
    ///
    /// # Errors
    /// Transport or decode failure
    pub async fn put_config(&self, data: &JsonValue) -> Result<SaveReceipt, ApiError> {
        self.v1_json_body(Method::PUT, "/config", &json!({ "data": data }))
            .await
    }

    /// `PATCH /api/v1/config/quick`
    ///
    /// # Errors
    /// Transport or decode failure
    pub async fn patch_quick(
        &self,
        patch: &BTreeMap<String, JsonValue>,
    ) -> Result<QuickSettingsDto, ApiError> {
        self.v1_json_body(Method::PATCH, "/config/quick", patch).await
    }

    /// `PUT /api/v1/config/end_action {action}`
    ///
    /// # Errors
    /// Transport or decode failure
    pub async fn put_end_action(&self, action: EndAction) -> Result<MessageReply, ApiError> {
        self.v1_json_body(Method::PUT, "/config/end_action", &json!({ "action": action }))
            .await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn list_solutions(&self) -> Result<Vec<ProduceSolution>, ApiError> {
        self.v1_json(Method::GET, "/produce/solutions").await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn get_solution(&self, id: &str) -> Result<ProduceSolution, ApiError> {
        self.v1_json_at(Method::GET, "/produce/solutions", &[id]).await
    }

    /// `POST /api/v1/produce/solutions?name=..&description=..`
    ///
    /// # Errors
    /// Transport or decode failure
    pub async fn create_solution(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<ProduceSolution, ApiError> {
        let mut query = vec![("name", name.to_string())];
        if let Some(desc) = description.filter(|d| !d.is_empty()) {
            query.push(("description", desc.to_string()));
        }
        let resp = self
            .v1::<()>(Method::POST, "/produce/solutions", &[], &query, None)
            .await?;
        decode_json(resp).await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn update_solution(
        &self,
        id: &str,
        body: &ProduceSolution,
    ) -> Result<ProduceSolution, ApiError> {
        self.v1_json_body_at(Method::PUT, "/produce/solutions", &[id], body)
            .await
    }

    /// # Errors
    /// Transport failure
    pub async fn delete_solution(&self, id: &str) -> Result<(), ApiError> {
        self.v1::<()>(Method::DELETE, "/produce/solutions", &[id], &[], None)
            .await?;
        Ok(())
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn list_idols(&self) -> Result<Vec<IdolOption>, ApiError> {
        self.v1_json(Method::GET, "/produce/idols").await
    }

    /// `GET /api/v1/run/state`
    ///
    /// # Errors
    /// Transport or decode failure
    pub async fn run_state(&self) -> Result<JsonValue, ApiError> {
        self.v1_json(Method::GET, "/run/state").await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn run_button_state(&self) -> Result<RunButtonState, ApiError> {
        self.v1_json(Method::GET, "/run/button_state").await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn pause_button_state(&self) -> Result<RunButtonState, ApiError> {
        self.v1_json(Method::GET, "/run/pause_button_state").await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn run_toggle(&self) -> Result<RunButtonState, ApiError> {
        self.v1_json(Method::POST, "/run/toggle").await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn run_start_all(&self) -> Result<RunButtonState, ApiError> {
        self.v1_json(Method::POST, "/run/start_all").await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn run_stop_all(&self) -> Result<RunButtonState, ApiError> {
        self.v1_json(Method::POST, "/run/stop_all").await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn run_pause_toggle(&self) -> Result<RunButtonState, ApiError> {
        self.v1_json(Method::POST, "/run/pause_toggle").await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn list_tasks(&self) -> Result<Vec<TaskRow>, ApiError> {
        self.v1_json(Method::GET, "/tasks").await
    }

    /// Latest screenshot as encoded image bytes
    ///
    /// # Errors
    /// Transport failure
    pub async fn screen_current(&self, size: ScreenSize) -> Result<Bytes, ApiError> {
        self.v1_bytes("/screen/current", &[("size", size.as_str().to_string())])
            .await
    }

    /// Screenshot from the last recognition pass
    ///
    /// # Errors
    /// Transport failure
    pub async fn screen_last(&self, size: ScreenSize) -> Result<Bytes, ApiError> {
        self.v1_bytes("/screen/last", &[("size", size.as_str().to_string())])
            .await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn update_versions(&self) -> Result<VersionInfo, ApiError> {
        self.v1_json(Method::GET, "/update/versions").await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn install_version(&self, version: &str) -> Result<InstallResponse, ApiError> {
        self.v1_json_at(Method::POST, "/update/install", &[version])
            .await
    }

    /// Changelog as markdown text
    ///
    /// # Errors
    /// Transport failure
    pub async fn update_changelog(&self) -> Result<String, ApiError> {
        self.v1_text("/update/changelog").await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn submit_bug_report(
        &self,
        title: &str,
        description: &str,
        upload: bool,
    ) -> Result<MessageReply, ApiError> {
        let query = [
            ("title", title.to_string()),
            ("description", description.to_string()),
            ("upload", upload.to_string()),
        ];
        let resp = self
            .v1::<()>(Method::POST, "/reports/bug", &[], &query, None)
            .await?;
        decode_json(resp).await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn bug_reports(&self) -> Result<JsonValue, ApiError> {
        self.v1_json(Method::GET, "/reports/bug").await
    }

    /// Server-generated log archive
    ///
    /// # Errors
    /// Transport failure
    pub async fn export_logs(&self) -> Result<Bytes, ApiError> {
        self.v1_bytes("/reports/logs.zip", &[]).await
    }

    /// Server-generated dump archive
    ///
    /// # Errors
    /// Transport failure
    pub async fn export_dumps(&self) -> Result<Bytes, ApiError> {
        self.v1_bytes("/reports/dumps.zip", &[]).await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn money_items(&self) -> Result<Vec<OptionItem>, ApiError> {
        self.v1_json(Method::GET, "/options/purchase/money_items").await
    }

    /// # Errors
    /// Transport or decode failure
    pub async fn ap_items(&self) -> Result<Vec<OptionItem>, ApiError> {
        self.v1_json(Method::GET, "/options/purchase/ap_items").await
    }

    /// Open the server-sent event stream
    ///
    /// Resolves once the server has accepted the stream (the "open" moment);
    /// the stream then yields events until the connection drops.
    ///
    /// # Errors
    /// Transport failure or non-2xx status while connecting
    pub async fn events(&self) -> Result<EventStream, ApiError> {
        let url = self.url(&self.events_path, &[])?;
        tracing::debug!("Connecting event stream {}", url);
        let resp = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let mut decoder = SseDecoder::new();
        let events = resp
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder.feed_events(&bytes).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(ApiError::from(e))],
            })
            .flat_map(stream::iter)
            .boxed();
        Ok(events)
    }
}

fn require<T>(data: Option<T>, what: &str) -> Result<T, ApiError> {
    data.ok_or_else(|| ApiError::MissingData(what.to_string()))
}

fn is_json(resp: &Response) -> bool {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"))
}

async fn read_envelope<T: DeserializeOwned>(
    resp: Response,
    method: &str,
    path: &str,
) -> Result<Option<T>, ApiError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            detail: None,
        });
    }
    let body = resp.bytes().await?;
    let envelope: ApiEnvelope<T> = serde_json::from_slice(&body)?;
    envelope.into_result(method, path)
}

#[derive(Deserialize)]
struct ErrorMessage {
    message: Option<String>,
}

async fn check_status(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let json_body = is_json(&resp);
    let reason = status.canonical_reason().map(str::to_string);
    let detail = match resp.text().await {
        Ok(text) if json_body => serde_json::from_str::<ErrorMessage>(&text)
            .ok()
            .and_then(|m| m.message)
            .or(reason),
        Ok(text) if !text.is_empty() => Some(text),
        _ => reason,
    };

    tracing::debug!("Request failed with HTTP {}: {:?}", status.as_u16(), detail);
    Err(ApiError::Status {
        status: status.as_u16(),
        detail,
    })
}

async fn decode_json<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let body = resp.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}
