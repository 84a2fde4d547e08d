//! kaa command-line front end
//!
//! The binary is a thin shell: [`cli::command`] parses, [`settings::Settings`]
//! resolves where the backend lives, and [`commands::run`] does the work on
//! top of `kaa-sync`.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cli;
pub mod commands;
pub mod logging;
pub mod settings;

pub use settings::Settings;

/// Version of the kaa-cli crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
