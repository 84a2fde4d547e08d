//! kaa-sync: keeps local copies of kaa backend state in step with the server
//!
//! Building blocks:
//! - [`QueryCache`]: shared, keyed cache with stale marking and fetch
//!   cancellation
//! - [`OptimisticMutation`]: snapshot, apply locally, then confirm or roll back
//! - [`DocumentSync`] + [`AutoSaver`]: edit a configuration document offline
//!   and save it (whole or dirty subtree), debounced
//! - [`EventSupervisor`]: server-sent events with reconnect backoff and a
//!   polling fallback
//!
//! Controllers tie these to concrete resources: [`QuickSettingsController`],
//! [`TaskOverviewController`], [`RunBoard`], [`SolutionsController`] and
//! [`VersionProbe`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use kaa_api::{ApiClient, ApiConfig};
//! use kaa_sync::{AutoSaver, DocumentSync, OptionsBackend, SyncConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(&ApiConfig::new().with_env_overrides())?;
//! let options = DocumentSync::new(Arc::new(OptionsBackend::new(client)));
//! options.load().await?;
//!
//! let saver = AutoSaver::spawn(options.clone(), SyncConfig::new().autosave_debounce());
//! options.set("purchase.enabled", serde_json::json!(true))?;
//! saver.flush().await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod autosave;
mod backend;
mod board;
mod cache;
mod config;
mod document;
mod error;
mod events;
mod mutation;
mod quick;
mod solutions;
mod tasks;
mod version;

pub use autosave::AutoSaver;
pub use backend::{OptionsBackend, SolutionBackend, V1ConfigBackend};
pub use board::{derive_quick_and_end_action, BoardState, RunBoard};
pub use cache::{QueryCache, QueryKey};
pub use config::SyncConfig;
pub use document::{ConfigBackend, DocumentSync, SaveMode, SaveOutcome, SyncStatus};
pub use error::{Result, SyncError};
pub use events::{backoff_delay, EventSupervisor, StreamStatus};
pub use mutation::{OptimisticMutation, Reconcile};
pub use quick::QuickSettingsController;
pub use solutions::SolutionsController;
pub use tasks::{Poller, TaskOverviewController};
pub use version::VersionProbe;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
