//! # Provider API Errors
//!
//! [`ApiError`] is the error every provider API trait returns. It mirrors the
//! `code` + `message` pair cloud SDKs report, so callers can match on well-known
//! codes (for example a missing parameter) without depending on a concrete SDK.
use thiserror::Error;

/// Result of a raw provider API call
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

/// Error codes the core reacts to
pub mod codes {
    pub const VALIDATION_ERROR: &str = "ValidationError";
    pub const PARAMETER_NOT_FOUND: &str = "ParameterNotFound";
    pub const NO_SUCH_KEY: &str = "NoSuchKey";
    pub const NO_SUCH_BUCKET: &str = "NoSuchBucket";
    pub const NOT_MODIFIED: &str = "NotModified";
    pub const REPOSITORY_NOT_FOUND: &str = "RepositoryNotFoundException";
    pub const RESOURCE_NOT_FOUND: &str = "ResourceNotFoundException";
    pub const ACCESS_DENIED: &str = "AccessDenied";
}

/// Message returned by an update that would not change anything
pub const NO_UPDATES_MESSAGE: &str = "No updates are to be performed.";

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(codes::VALIDATION_ERROR, message)
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }

    /// True for the "no updates are to be performed" validation failure.
    pub fn is_no_updates(&self) -> bool {
        self.is(codes::VALIDATION_ERROR) && self.message == NO_UPDATES_MESSAGE
    }
}
