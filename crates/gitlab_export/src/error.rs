use thiserror::Error;

use crate::api::ApiError;
use crate::sdk::{PipeError, StateError};

/// Errors that can abort an export, webhook or lifecycle call.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Request layer failure.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Output sink failure.
    #[error("pipe error: {0}")]
    Pipe(#[from] PipeError),

    /// State store failure or a corrupt stored value.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Invalid or incomplete integration configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The stored last export date could not be parsed.
    #[error("error formatting last export date. date {value}: {source}")]
    InvalidLastExportDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("integration type not defined {0}")]
    UnsupportedIntegrationType(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Malformed payload or record.
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// A pipeline task panicked or was cancelled.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ExportError {
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    #[inline]
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is a rate limit error.
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_rate_limited())
    }

    /// Permission-issue responses that callers log and skip.
    #[inline]
    pub fn is_permission_warning(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_permission_warning())
    }

    /// Missing, hidden or forbidden resources.
    #[inline]
    pub fn is_inaccessible(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_inaccessible())
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Api(ApiError::Decode(err))
    }
}

/// Extract a short error message suitable for display.
///
/// Takes the first line of an error message, which is useful for errors
/// that include response bodies or multi-line details.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

/// Result type for export operations.
pub type Result<T> = std::result::Result<T, ExportError>;
