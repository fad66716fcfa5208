//! GitLab API error types.

use thiserror::Error;

use crate::http::{HttpError, HttpResponse};

/// Text GitLab returns when a resource is hidden behind a tier or permission.
/// Callers treat it as a warning and skip the resource.
pub const PERMISSION_ISSUE_MESSAGE: &str = "The resource that you are attempting to access does not exist or you don't have permission to perform this action";

/// Errors that can occur when interacting with the GitLab API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("permissions error: {status}: {body}")]
    Forbidden { status: u16, body: String },

    #[error("rate limit exceeded after {attempts} throttled attempts")]
    RateLimited { attempts: usize },

    #[error("request with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("can't retry request, too many retries ({attempts}): {last}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        last: Box<ApiError>,
    },

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("JSON deserialization error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    /// Resource hidden behind a tier or missing permission.
    #[error("{PERMISSION_ISSUE_MESSAGE}: {0}")]
    Permission(String),

    #[error("invalid request url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// Build an error from a failed response, keeping the body for diagnostics.
    pub fn from_response(resp: &HttpResponse) -> Self {
        let body = resp.text();
        if body.contains(PERMISSION_ISSUE_MESSAGE) {
            Self::Permission(body)
        } else if resp.status == 403 {
            Self::Forbidden {
                status: resp.status,
                body,
            }
        } else {
            Self::Status {
                status: resp.status,
                body,
            }
        }
    }

    /// Rate limiting exhausted its throttled retries.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::RetriesExhausted { last, .. } => last.is_rate_limited(),
            _ => false,
        }
    }

    /// Errors that were never retried because retrying cannot help.
    pub fn is_fail_fast(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    /// The GitLab "does not exist or you don't have permission" condition.
    pub fn is_permission_warning(&self) -> bool {
        match self {
            Self::Permission(_) => true,
            Self::RetriesExhausted { last, .. } => last.is_permission_warning(),
            Self::GraphQl(msg) => msg.contains(PERMISSION_ISSUE_MESSAGE),
            _ => false,
        }
    }

    /// HTTP status of the response behind this error, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Forbidden { status, .. } | Self::Status { status, .. } => Some(*status),
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// The resource is gone or hidden from this token, so asking again will
    /// not help.
    pub fn is_inaccessible(&self) -> bool {
        self.is_not_found() || self.is_permission_warning() || self.status() == Some(403)
    }
}

/// Check if an error indicates a rate limit.
pub fn is_rate_limit_error(e: &ApiError) -> bool {
    e.is_rate_limited()
}
