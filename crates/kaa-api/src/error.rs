//! Error types for the kaa API
//!
//! Two families reach the caller:
//! - transport errors (non-2xx status, network failure, undecodable body),
//!   surfaced with a generic message
//! - structured API errors (`success: false`), whose message is shown verbatim

use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Main API error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Non-2xx HTTP status
    #[error("HTTP {status}")]
    Status {
        status: u16,
        /// Server-supplied detail (body `message` or text), never displayed
        detail: Option<String>,
    },

    /// Structured failure reported by the backend
    #[error("{message}")]
    Api {
        code: Option<String>,
        message: String,
        detail: Option<JsonValue>,
    },

    /// Network failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Body was not the expected JSON
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Base URL or path could not be joined
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Envelope reported success but carried no data
    #[error("response from {0} carried no data")]
    MissingData(String),
}

impl ApiError {
    /// Whether this is a transport-level failure (as opposed to the backend
    /// rejecting the request)
    #[inline]
    #[must_use]
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::Api { .. })
    }

    /// HTTP status, when the error came from one
    #[inline]
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Server-supplied detail for a status error
    #[inline]
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    /// Structured failure with the generic fallback message
    #[must_use]
    pub fn api_fallback(method: &str, path: &str) -> Self {
        Self::Api {
            code: None,
            message: format!("API error on {method} {path}"),
            detail: None,
        }
    }
}

/// `error` member of the action-API envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<JsonValue>,
}

/// `{success, data?, error?}` envelope used by the action API
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default = "none")]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

fn none<T>() -> Option<T> {
    None
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the envelope
    ///
    /// A successful envelope with `data: null` yields `Ok(None)`.
    ///
    /// # Errors
    /// `ApiError::Api` carrying `error.message`, or the generic fallback
    pub fn into_result(self, method: &str, path: &str) -> Result<Option<T>, ApiError> {
        if self.success {
            return Ok(self.data);
        }
        match self.error {
            Some(ApiErrorBody {
                code,
                message: Some(message),
                detail,
            }) if !message.is_empty() => Err(ApiError::Api {
                code,
                message,
                detail,
            }),
            _ => Err(ApiError::api_fallback(method, path)),
        }
    }
}
