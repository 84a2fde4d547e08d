use kaa_api::{
    PauseButtonStatus, PauseStatus, ProduceSolution, QuickSettingItem, QuickSettingsDto,
    QuickSettingsResponse, RunButtonStatus, RunStatus, TaskOverviewDto, TaskRuntimeDto,
};
use serde_json::{json, Value as JsonValue};

/// Inner document of `GET /api/v1/config` (what sits under `data`)
pub fn sample_config_data() -> JsonValue {
    json!({
        "version": 5,
        "user_configs": [{
            "name": "default",
            "options": {
                "purchase": {"enabled": true, "money_enabled": false},
                "assignment": {"enabled": false},
                "contest": {"enabled": true, "select_which_contestant": 1},
                "produce": {"enabled": false, "mode": "regular", "produce_count": 1},
                "mission_reward": {"enabled": true},
                "club_reward": {"enabled": false},
                "activity_funds": {"enabled": false},
                "presents": {"enabled": true},
                "capsule_toys": {"enabled": false},
                "upgrade_support_card": {"enabled": false},
                "end_game": {"shutdown": false, "hibernate": false}
            }
        }]
    })
}

/// Full `GET /api/v1/config` reply
pub fn sample_config() -> JsonValue {
    json!({ "data": sample_config_data() })
}

/// Options tree served by the action API
pub fn sample_options() -> JsonValue {
    json!({
        "purchase": {"enabled": true, "ap_items": [0, 1]},
        "produce": {"enabled": false, "mode": "regular", "idols": ["i_card-skin-hski-3-002"]},
        "misc": {"check_update": "mirror", "expose_dropdown_option": false}
    })
}

pub fn sample_quick() -> QuickSettingsResponse {
    QuickSettingsResponse {
        values: QuickSettingsDto {
            purchase: false,
            contest: true,
            end_action: Some("none".to_string()),
            ..QuickSettingsDto::default()
        },
        items: QuickSettingsDto::FLAGS
            .iter()
            .map(|flag| QuickSettingItem {
                id: (*flag).to_string(),
                name: (*flag).to_string(),
                icon: None,
                has_settings: false,
                value_key: Some((*flag).to_string()),
            })
            .collect(),
    }
}

pub fn sample_overview(status: RunStatus) -> TaskOverviewDto {
    TaskOverviewDto {
        paused: Some(false),
        run_button: RunButtonStatus {
            status,
            interactive: true,
        },
        pause_button: PauseButtonStatus {
            status: PauseStatus::Pause,
            interactive: status == RunStatus::Stop,
        },
        runtime: TaskRuntimeDto {
            display: "00:00:00".to_string(),
            seconds: 0,
            running: status == RunStatus::Stop,
        },
    }
}

pub fn sample_solution(id: &str, name: &str) -> ProduceSolution {
    ProduceSolution {
        id: id.to_string(),
        name: name.to_string(),
        description: None,
        data: json!({"mode": "pro", "idol": "i_card-skin-fktn-3-000", "use_pt_boost": false}),
    }
}
