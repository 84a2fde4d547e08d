//! Testing utilities for the kaa client workspace
//!
//! Shared fixtures, an in-memory recording [`kaa_sync::ConfigBackend`], and
//! an in-process fake backend server.

#![allow(missing_docs)]

mod fixtures;
mod recording;
mod server;

pub use fixtures::{
    sample_config, sample_config_data, sample_options, sample_overview, sample_quick,
    sample_solution,
};
pub use recording::{CallKind, RecordedCall, RecordingBackend};
pub use server::{FakeServer, FakeState};
