//! # Mu Core Kernel Errors
//!
//! Defines the crate-wide [`Error`] type.
//!
//! Each subsystem owns a typed error enum ([`ConfigError`], [`StackSystemError`],
//! [`WorkflowError`]) that converts into [`Error`] with `?`. Failures reported by a
//! cloud provider API arrive as [`ApiError`] and are wrapped with the operation and
//! target that produced them.
use std::error::Error as StdError;
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::config::error::ConfigError;
use crate::provider::ApiError;
use crate::stack::error::StackSystemError;
use crate::workflows::error::WorkflowError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Configuration could not be found, parsed or validated
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Stack manager failure (version conflicts, failed stacks, missing stacks)
    #[error(transparent)]
    StackSystem(#[from] StackSystemError),

    /// A workflow precondition did not hold
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// An underlying provider API call failed
    #[error("{operation} failed for '{target}': {source}")]
    Provider {
        operation: String,
        target: String,
        #[source]
        source: ApiError,
    },

    #[error("Unable to parse {what} '{value}': {reason}")]
    Parse {
        what: String,
        value: String,
        reason: String,
    },

    #[error("Unable to render template '{name}': {reason}")]
    Template { name: String, reason: String },

    #[error("I/O error during '{operation}' on '{}': {source}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        operation: String,
        path: PathBuf,
    },

    #[error("Unable to serialize {format}: {source}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl Error {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Error::Io {
            source,
            operation: operation.into(),
            path: path.into(),
        }
    }

    pub fn provider(operation: impl Into<String>, target: impl Into<String>, source: ApiError) -> Self {
        Error::Provider {
            operation: operation.into(),
            target: target.into(),
            source,
        }
    }

    pub fn parse(what: impl Into<String>, value: impl Into<String>, reason: impl ToString) -> Self {
        Error::Parse {
            what: what.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }

    pub fn serialization<E>(format: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Error::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// The provider error code, when this error came from a provider API call.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Error::Provider { source, .. } => Some(source.code.as_str()),
            _ => None,
        }
    }
}
