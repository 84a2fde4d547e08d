//! kaa-api: typed HTTP client for the kaa automation backend
//!
//! Covers both backend surfaces:
//! - the action API (`/api/config`, `/api/tasks`, `/api/system`), which
//!   wraps replies in a `{success, data, error}` envelope
//! - the v1 REST API (`/api/v1/...`), including the server-sent event
//!   stream at `/api/v1/events`
//!
//! Failures split into two families, see [`ApiError`]: transport errors
//! display as `HTTP <status>`, structured API errors display the backend's
//! message verbatim.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod client;
mod config;
mod error;
mod sse;
mod types;

pub use client::{ApiClient, EventStream};
pub use config::{ApiConfig, BASE_URL_ENV};
pub use error::{ApiEnvelope, ApiError, ApiErrorBody};
pub use sse::SseDecoder;
pub use types::{
    AppEvent, EndAction, IdolOption, InstallResponse, MessageReply, OptionItem, PauseButtonStatus,
    PauseStatus, ProduceSolution, QuickSettingItem, QuickSettingsDto, QuickSettingsResponse,
    RunButtonState, RunButtonStatus, RunStatus, SaveReceipt, ScreenSize, TaskAction,
    TaskOverviewDto, TaskRow, TaskRuntimeDto, VersionInfo,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
