//! kaa configuration documents
//!
//! Schema-less, server-owned configuration trees edited by dot path.
//!
//! # Core Concepts
//!
//! - [`ConfigDocument`]: owned JSON tree with `get_at` / `set_at`
//! - [`ConfigPath`]: dot-separated address (`options.purchase.enabled`)
//! - [`DirtyMask`]: which paths were edited locally since the last load/save
//!
//! # Example
//!
//! ```rust
//! use kaa_document::{ConfigDocument, ConfigPath, DirtyMask};
//! use serde_json::json;
//!
//! let mut doc = ConfigDocument::new(json!({"options": {"purchase": {"enabled": false}}}));
//! let mut dirty = DirtyMask::new();
//!
//! let path: ConfigPath = "options.purchase.enabled".parse().unwrap();
//! doc.set_at(&path, json!(true)).unwrap();
//! dirty.mark(&path, 1);
//!
//! assert_eq!(
//!     dirty.extract(doc.value()),
//!     Some(json!({"options": {"purchase": {"enabled": true}}}))
//! );
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod dirty;
mod document;
mod path;

pub use dirty::DirtyMask;
pub use document::{ConfigDocument, DocumentError};
pub use path::{segment_index, ConfigPath, PathError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
