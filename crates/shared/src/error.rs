use thiserror::Error;

/// Coarse classification of a platform rejection, mapped from the
/// HTTP status of the failing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    RateLimited,
    Internal,
}

/// A request the platform rejected. `message` carries the server's
/// own text so callers can surface it verbatim.
#[derive(Debug, Clone, Error)]
#[error("{code:?}: {message}")]
pub struct ApiException {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiException {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
