//! # Stack Manager Errors
//!
//! Defines [`StackSystemError`], raised by the stack manager when a stack cannot be
//! upserted, ends in a failed status, or a prerequisite stack or image is missing.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackSystemError {
    #[error(
        "Unable to upsert stack '{stack}' with existing version '{existing}' to {direction} version '{current}' (can be overridden with -F)"
    )]
    VersionIncompatible {
        stack: String,
        existing: String,
        current: String,
        direction: String,
    },

    #[error("Unable to create stack {stack}")]
    StackNotCreated { stack: String },

    #[error("Ended in failed status {status} {reason}")]
    FailedStatus {
        stack: String,
        status: String,
        reason: String,
    },

    #[error("Unable to find stack '{stack}'")]
    StackNotFound { stack: String },

    #[error("Unable to find image for pattern '{pattern}'")]
    ImageNotFound { pattern: String },

    #[error("Unable to write dryrun output for stack '{stack}' to '{}': {source}", path.display())]
    DryrunOutput {
        stack: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
