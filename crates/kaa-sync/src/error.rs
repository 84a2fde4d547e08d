//! Error types for the sync layer

use kaa_api::ApiError;
use kaa_document::{DocumentError, PathError};

use crate::cache::QueryKey;

/// Main sync error type
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Request failed; displays exactly as the API error does
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Local document edit failed
    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    /// Malformed config path
    #[error("invalid path: {0}")]
    Path(#[from] PathError),

    /// Result discarded because the query was cancelled while in flight
    #[error("query {0} cancelled")]
    Cancelled(QueryKey),

    /// Save requested before any document exists
    #[error("no document loaded")]
    NotLoaded,

    /// Cached value has an unexpected type or shape
    #[error("unexpected data: {0}")]
    Shape(String),
}

impl SyncError {
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// The underlying API error, if any
    #[inline]
    #[must_use]
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e) => Some(e),
            _ => None,
        }
    }
}

/// Result alias for sync operations
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
