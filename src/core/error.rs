use http::{Method, StatusCode};
use thiserror::Error;

/// A domain error carrying the exact status and body the client should see.
///
/// Handlers and middleware return it through `eyre::Result`; the invoker
/// recovers it with `Report::downcast_ref` and writes `message` verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{status}: {message}")]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

/// Errors raised while wiring up routes; never produced while serving.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    #[error("Invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Unsupported method '{0}' (expected GET, POST, PUT, PATCH, DELETE or OPTIONS)")]
    UnsupportedMethod(Method),

    #[error("Invalid CORS options: {0}")]
    InvalidCors(String),
}

impl EngineError {
    pub(crate) fn pattern(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}
