//! Wire types exchanged with the backend
//!
//! Field names follow the backend's JSON exactly.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// What the backend does after all tasks finish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndAction {
    #[default]
    DoNothing,
    Shutdown,
    Hibernate,
}

impl EndAction {
    /// Parse either the v1 spelling (`DO_NOTHING`) or the action-API one (`none`)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "do_nothing" | "none" => Some(Self::DoNothing),
            "shutdown" => Some(Self::Shutdown),
            "hibernate" => Some(Self::Hibernate),
            _ => None,
        }
    }
}

impl fmt::Display for EndAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DoNothing => "DO_NOTHING",
            Self::Shutdown => "SHUTDOWN",
            Self::Hibernate => "HIBERNATE",
        })
    }
}

/// Module switches on the dashboard
///
/// The action API also carries `end_action` here (`none|shutdown|hibernate`);
/// the v1 API does not. Unknown flags are kept in `extra` so a newer backend
/// round-trips cleanly.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuickSettingsDto {
    #[serde(default)]
    pub purchase: bool,
    #[serde(default)]
    pub assignment: bool,
    #[serde(default)]
    pub contest: bool,
    #[serde(default)]
    pub produce: bool,
    #[serde(default)]
    pub mission_reward: bool,
    #[serde(default)]
    pub club_reward: bool,
    #[serde(default)]
    pub activity_funds: bool,
    #[serde(default)]
    pub presents: bool,
    #[serde(default)]
    pub capsule_toys: bool,
    #[serde(default)]
    pub upgrade_support_card: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_action: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl QuickSettingsDto {
    /// Module flag names, in dashboard order
    pub const FLAGS: [&'static str; 10] = [
        "purchase",
        "assignment",
        "contest",
        "produce",
        "mission_reward",
        "club_reward",
        "activity_funds",
        "presents",
        "capsule_toys",
        "upgrade_support_card",
    ];

    #[must_use]
    pub fn flag(&self, name: &str) -> Option<bool> {
        Some(match name {
            "purchase" => self.purchase,
            "assignment" => self.assignment,
            "contest" => self.contest,
            "produce" => self.produce,
            "mission_reward" => self.mission_reward,
            "club_reward" => self.club_reward,
            "activity_funds" => self.activity_funds,
            "presents" => self.presents,
            "capsule_toys" => self.capsule_toys,
            "upgrade_support_card" => self.upgrade_support_card,
            other => return self.extra.get(other).and_then(JsonValue::as_bool),
        })
    }

    /// Shallow-merge a patch of flags (`{purchase: true}`) into these values
    ///
    /// # Errors
    /// Returns error if a known flag is given a non-boolean value
    pub fn apply_patch(&mut self, patch: &BTreeMap<String, JsonValue>) -> Result<(), serde_json::Error> {
        let mut merged = serde_json::to_value(&*self)?;
        if let JsonValue::Object(map) = &mut merged {
            for (k, v) in patch {
                map.insert(k.clone(), v.clone());
            }
        }
        *self = serde_json::from_value(merged)?;
        Ok(())
    }
}

/// Descriptor of one quick-settings switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickSettingItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub has_settings: bool,
    #[serde(default)]
    pub value_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuickSettingsResponse {
    pub values: QuickSettingsDto,
    #[serde(default)]
    pub items: Vec<QuickSettingItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Start,
    Stop,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseStatus {
    Pause,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunButtonStatus {
    pub status: RunStatus,
    pub interactive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseButtonStatus {
    pub status: PauseStatus,
    pub interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRuntimeDto {
    /// `HH:MM:SS`
    pub display: String,
    pub seconds: u64,
    pub running: bool,
}

/// Run/pause button state and elapsed runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOverviewDto {
    #[serde(default)]
    pub paused: Option<bool>,
    pub run_button: RunButtonStatus,
    pub pause_button: PauseButtonStatus,
    pub runtime: TaskRuntimeDto,
}

/// Body of `POST /tasks`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TaskAction {
    RunAll,
    Stop,
    RunSingle { task_name: String },
    PauseToggle,
}

/// Button label state reported by the v1 run endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunButtonState {
    pub text: String,
    pub interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRow {
    pub name: String,
    pub status_text: String,
}

/// `{ok, message}` reply of config saves, installs and bug reports
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageReply {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub message: String,
}

/// Reply of `PUT /config`
pub type SaveReceipt = MessageReply;

/// Reply of `POST /update/install/{version}`
pub type InstallResponse = MessageReply;

/// A named training plan
///
/// `data` stays schema-less; drafts edit it through a config document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProduceSolution {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub data: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdolOption {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionItem {
    pub label: String,
    pub value: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(default)]
    pub installed: Option<String>,
    #[serde(default)]
    pub latest: Option<String>,
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Screenshot resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenSize {
    #[default]
    Thumb,
    Full,
}

impl ScreenSize {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thumb => "thumb",
            Self::Full => "full",
        }
    }
}

/// One server-sent event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: JsonValue,
    /// Milliseconds since the Unix epoch; may be fractional
    #[serde(default)]
    pub ts: f64,
}

impl AppEvent {
    /// `ts` at millisecond precision, `None` when out of range
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        if !self.ts.is_finite() {
            return None;
        }
        // Float-to-int `as` saturates; out-of-range values are rejected below.
        #[allow(clippy::cast_possible_truncation)]
        let millis = self.ts.floor() as i64;
        Utc.timestamp_millis_opt(millis).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_action_wire_shape() {
        assert_eq!(serde_json::to_value(TaskAction::RunAll).unwrap(), json!({"action": "run_all"}));
        assert_eq!(
            serde_json::to_value(TaskAction::RunSingle {
                task_name: "produce".into()
            })
            .unwrap(),
            json!({"action": "run_single", "task_name": "produce"})
        );
        assert_eq!(
            serde_json::to_value(TaskAction::PauseToggle).unwrap(),
            json!({"action": "pause_toggle"})
        );
    }

    #[test]
    fn end_action_spellings() {
        assert_eq!(serde_json::to_value(EndAction::DoNothing).unwrap(), json!("DO_NOTHING"));
        assert_eq!(EndAction::parse("none"), Some(EndAction::DoNothing));
        assert_eq!(EndAction::parse("hibernate"), Some(EndAction::Hibernate));
        assert_eq!(EndAction::parse("do-nothing"), Some(EndAction::DoNothing));
        assert_eq!(EndAction::parse("reboot"), None);
    }

    #[test]
    fn quick_settings_patch_merges() {
        let mut values: QuickSettingsDto =
            serde_json::from_value(json!({"purchase": false, "contest": true, "end_action": "none"})).unwrap();
        let patch = BTreeMap::from([("purchase".to_string(), json!(true))]);
        values.apply_patch(&patch).unwrap();
        assert!(values.purchase);
        assert!(values.contest);
        assert_eq!(values.end_action.as_deref(), Some("none"));
    }

    #[test]
    fn quick_settings_keeps_unknown_flags() {
        let values: QuickSettingsDto = serde_json::from_value(json!({"new_module": true})).unwrap();
        assert_eq!(values.flag("new_module"), Some(true));
        assert_eq!(values.flag("presents"), Some(false));
        assert_eq!(serde_json::to_value(&values).unwrap()["new_module"], json!(true));
    }

    #[test]
    fn overview_decodes() {
        let dto: TaskOverviewDto = serde_json::from_value(json!({
            "paused": null,
            "run_button": {"status": "stopping", "interactive": false},
            "pause_button": {"status": "resume", "interactive": true},
            "runtime": {"display": "00:01:05", "seconds": 65, "running": true}
        }))
        .unwrap();
        assert_eq!(dto.run_button.status, RunStatus::Stopping);
        assert_eq!(dto.pause_button.status, PauseStatus::Resume);
        assert_eq!(dto.runtime.seconds, 65);
    }

    #[test]
    fn event_timestamp() {
        let ev: AppEvent =
            serde_json::from_value(json!({"type": "task_status", "data": {}, "ts": 1_700_000_000_000_i64})).unwrap();
        assert_eq!(ev.kind, "task_status");
        assert_eq!(ev.timestamp().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn fractional_event_timestamp() {
        let ev: AppEvent =
            serde_json::from_value(json!({"type": "log", "ts": 1_700_000_000_123.75})).unwrap();
        assert_eq!(ev.data, JsonValue::Null);
        assert_eq!(ev.timestamp().unwrap().timestamp_millis(), 1_700_000_000_123);

        let far = AppEvent { ts: 1e30, ..ev };
        assert_eq!(far.timestamp(), None);
    }
}
