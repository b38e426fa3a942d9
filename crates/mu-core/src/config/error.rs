//! # Configuration Errors
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to find config file '{}'", path.display())]
    NotFound { path: PathBuf },

    #[error("Invalid config file '{}': {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    Validation {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unable to find environment named '{name}' in configuration")]
    EnvironmentNotFound { name: String },

    #[error(
        "Consul is no longer supported as a service discovery provider.  Check out the mu-consul extension for an alternative: https://github.com/stelligent/mu-consul"
    )]
    UnsupportedDiscovery,
}

impl ConfigError {
    pub fn validation(field: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Validation {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}
