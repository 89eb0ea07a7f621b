use std::sync::Arc;

use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::StoreError;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Broad category of an `ApiError`, for callers that only need to branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No response was received
    Network,
    /// A non-2xx response other than 401
    Http,
    /// A 401 that was not recovered but did not end the session
    Unauthorized,
    /// No automatic recovery is possible; the user must sign in again
    AuthTerminal,
    /// The request could not be built (bad header value, unserializable body)
    InvalidRequest,
    InvalidResponse,
    Storage,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized - token may be expired")]
    Unauthorized {
        body: String,
        /// Set when this 401 ended the session (no refresh token was held)
        session_terminated: bool,
    },

    #[error("Access denied: {}", truncate_body(.0))]
    AccessDenied(String),

    #[error("Resource not found: {}", truncate_body(.0))]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error ({status}): {}", truncate_body(.body))]
    ServerError { status: StatusCode, body: String },

    #[error("Request failed with status {status}: {}", truncate_body(.body))]
    Status { status: StatusCode, body: String },

    /// The refresh call failed and the session was cleared
    #[error("Session expired - please sign in again")]
    SessionTerminated(#[source] Arc<ApiError>),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Credential storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        body.to_string()
    } else {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }
}

impl ApiError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let body = body.to_string();
        match status.as_u16() {
            401 => ApiError::Unauthorized {
                body,
                session_terminated: false,
            },
            403 => ApiError::AccessDenied(body),
            404 => ApiError::NotFound(body),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError { status, body },
            _ => ApiError::Status { status, body },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Unauthorized {
                session_terminated: true,
                ..
            }
            | ApiError::SessionTerminated(_) => ErrorKind::AuthTerminal,
            ApiError::Unauthorized { .. } => ErrorKind::Unauthorized,
            ApiError::AccessDenied(_)
            | ApiError::NotFound(_)
            | ApiError::RateLimited
            | ApiError::ServerError { .. }
            | ApiError::Status { .. } => ErrorKind::Http,
            ApiError::NetworkError(e) if e.is_decode() => ErrorKind::InvalidResponse,
            ApiError::NetworkError(_) => ErrorKind::Network,
            ApiError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ApiError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            ApiError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// True when the user has to sign in again.
    pub fn is_auth_terminal(&self) -> bool {
        self.kind() == ErrorKind::AuthTerminal
    }

    /// HTTP status of the response that caused this error, if there was one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED),
            ApiError::AccessDenied(_) => Some(StatusCode::FORBIDDEN),
            ApiError::NotFound(_) => Some(StatusCode::NOT_FOUND),
            ApiError::RateLimited => Some(StatusCode::TOO_MANY_REQUESTS),
            ApiError::ServerError { status, .. } | ApiError::Status { status, .. } => {
                Some(*status)
            }
            ApiError::SessionTerminated(cause) => cause.status(),
            ApiError::NetworkError(e) => e.status(),
            ApiError::InvalidRequest(_) | ApiError::InvalidResponse(_) | ApiError::Storage(_) => {
                None
            }
        }
    }

    /// Raw response body of an HTTP error, if one was received.
    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized { body, .. }
            | ApiError::AccessDenied(body)
            | ApiError::NotFound(body)
            | ApiError::ServerError { body, .. }
            | ApiError::Status { body, .. } => Some(body),
            ApiError::SessionTerminated(cause) => cause.body(),
            _ => None,
        }
    }
}
