//! Live run dashboard: buttons, task list, quick flags and end action
//!
//! Driven by [`crate::EventSupervisor`]: every event (or fallback poll) calls
//! [`RunBoard::refresh`].

use std::collections::BTreeMap;
use std::sync::Arc;

use kaa_api::{ApiClient, EndAction, QuickSettingsDto, RunButtonState, TaskRow};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;

/// Everything the dashboard shows
#[derive(Debug, Clone, PartialEq)]
pub struct BoardState {
    pub run_button: RunButtonState,
    pub pause_button: RunButtonState,
    pub tasks: Vec<TaskRow>,
    pub quick: QuickSettingsDto,
    pub end_action: EndAction,
    pub loading: bool,
    /// Message of the last failed operation
    pub error: Option<String>,
}

impl Default for BoardState {
    fn default() -> Self {
        Self {
            run_button: RunButtonState {
                text: "启动".to_string(),
                interactive: true,
            },
            pause_button: RunButtonState {
                text: "暂停".to_string(),
                interactive: true,
            },
            tasks: Vec::new(),
            quick: QuickSettingsDto::default(),
            end_action: EndAction::DoNothing,
            loading: false,
            error: None,
        }
    }
}

/// Shared dashboard state over the v1 API
///
/// Operations never return errors; failures land in [`BoardState::error`].
#[derive(Debug, Clone)]
pub struct RunBoard {
    client: ApiClient,
    state: Arc<RwLock<BoardState>>,
}

impl RunBoard {
    #[must_use]
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            state: Arc::new(RwLock::new(BoardState::default())),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> BoardState {
        self.state.read().clone()
    }

    /// Reload buttons, tasks and configuration together
    pub async fn refresh(&self) {
        self.state.write().loading = true;
        let fetched = tokio::try_join!(
            self.client.run_button_state(),
            self.client.pause_button_state(),
            self.client.list_tasks(),
            self.client.get_config(),
        );

        let mut state = self.state.write();
        state.loading = false;
        match fetched {
            Ok((run_button, pause_button, tasks, config)) => {
                let (quick, end_action) = derive_quick_and_end_action(&config);
                state.run_button = run_button;
                state.pause_button = pause_button;
                state.tasks = tasks;
                state.quick = quick;
                state.end_action = end_action;
                tracing::debug!("Run board refreshed ({} tasks)", state.tasks.len());
            }
            Err(e) => {
                tracing::warn!("Run board refresh failed: {}", e);
                state.error = Some(e.to_string());
            }
        }
    }

    /// Start or stop the run, then reload the task list
    pub async fn toggle_run(&self) {
        self.state.write().loading = true;
        let result = async {
            let run_button = self.client.run_toggle().await?;
            let tasks = self.client.list_tasks().await?;
            Ok::<_, kaa_api::ApiError>((run_button, tasks))
        }
        .await;

        let mut state = self.state.write();
        state.loading = false;
        match result {
            Ok((run_button, tasks)) => {
                state.run_button = run_button;
                state.tasks = tasks;
            }
            Err(e) => state.error = Some(e.to_string()),
        }
    }

    pub async fn toggle_pause(&self) {
        self.state.write().loading = true;
        let result = self.client.run_pause_toggle().await;

        let mut state = self.state.write();
        state.loading = false;
        match result {
            Ok(pause_button) => state.pause_button = pause_button,
            Err(e) => state.error = Some(e.to_string()),
        }
    }

    /// Patch quick flags; the server's reply replaces the local flags
    pub async fn set_quick(&self, patch: &BTreeMap<String, JsonValue>) {
        match self.client.patch_quick(patch).await {
            Ok(quick) => self.state.write().quick = quick,
            Err(e) => self.state.write().error = Some(e.to_string()),
        }
    }

    pub async fn save_end_action(&self, action: EndAction) {
        match self.client.put_end_action(action).await {
            Ok(_) => self.state.write().end_action = action,
            Err(e) => self.state.write().error = Some(e.to_string()),
        }
    }
}

/// Quick flags and end action as stored in the first user config
///
/// Reads `data.user_configs[0].options`: each module's `enabled`, and
/// `end_game.shutdown` / `end_game.hibernate` (shutdown wins).
#[must_use]
pub fn derive_quick_and_end_action(config: &JsonValue) -> (QuickSettingsDto, EndAction) {
    let options = config
        .pointer("/data/user_configs/0/options")
        .unwrap_or(&JsonValue::Null);
    let enabled = |module: &str| {
        options
            .get(module)
            .and_then(|m| m.get("enabled"))
            .is_some_and(truthy)
    };

    let quick = QuickSettingsDto {
        purchase: enabled("purchase"),
        assignment: enabled("assignment"),
        contest: enabled("contest"),
        produce: enabled("produce"),
        mission_reward: enabled("mission_reward"),
        club_reward: enabled("club_reward"),
        activity_funds: enabled("activity_funds"),
        presents: enabled("presents"),
        capsule_toys: enabled("capsule_toys"),
        upgrade_support_card: enabled("upgrade_support_card"),
        ..QuickSettingsDto::default()
    };

    let end_game = options.get("end_game");
    let flag = |name: &str| end_game.and_then(|e| e.get(name)).is_some_and(truthy);
    let end_action = if flag("shutdown") {
        EndAction::Shutdown
    } else if flag("hibernate") {
        EndAction::Hibernate
    } else {
        EndAction::DoNothing
    };

    (quick, end_action)
}

fn truthy(v: &JsonValue) -> bool {
    match v {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derives_flags_from_first_user_config() {
        let config = json!({"data": {"user_configs": [
            {"options": {
                "purchase": {"enabled": true},
                "produce": {"enabled": false},
                "presents": {"enabled": 1},
                "end_game": {"shutdown": false, "hibernate": true}
            }},
            {"options": {"contest": {"enabled": true}}}
        ]}});
        let (quick, end) = derive_quick_and_end_action(&config);
        assert!(quick.purchase);
        assert!(!quick.produce);
        assert!(quick.presents);
        assert!(!quick.contest);
        assert_eq!(end, EndAction::Hibernate);
    }

    #[test]
    fn shutdown_wins_over_hibernate() {
        let config = json!({"data": {"user_configs": [{"options": {
            "end_game": {"shutdown": true, "hibernate": true}
        }}]}});
        assert_eq!(derive_quick_and_end_action(&config).1, EndAction::Shutdown);
    }

    #[test]
    fn missing_config_yields_defaults() {
        let (quick, end) = derive_quick_and_end_action(&json!({}));
        assert_eq!(quick, QuickSettingsDto::default());
        assert_eq!(end, EndAction::DoNothing);
    }
}
