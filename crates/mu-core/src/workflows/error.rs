//! # Workflow Errors
//!
//! Defines [`WorkflowError`], raised when a workflow precondition does not hold:
//! a prerequisite stack is missing, the input is incomplete, or a resource the
//! workflow would create collides with an existing one.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Unable to find stack '{stack}' for environment '{environment}'")]
    EnvironmentStackMissing { stack: String, environment: String },

    #[error("At least 2 availability zones are required, found {count}")]
    InsufficientZones { count: usize },

    #[error("Service name must be provided")]
    ServiceNameRequired,

    #[error("ELB priority already in use: {priority}")]
    PriorityInUse { priority: u32 },

    #[error("Tag '{key}' is reserved and can not be set on stack '{stack}'")]
    ReservedTag { stack: String, key: String },

    #[error("A source token is required for the first upsert of pipeline '{stack}'")]
    MissingToken { stack: String },

    #[error("Unable to find pipeline for service '{service}'")]
    PipelineNotFound { service: String },

    #[error("Stack '{stack}' has no output '{output}'")]
    MissingOutput { stack: String, output: String },

    #[error("Invalid setting '{setting}', expected KEY=VALUE")]
    InvalidSetting { setting: String },

    #[error("File '{}' already exists, use --force to overwrite", path.display())]
    ConfigExists { path: PathBuf },

    #[error("Unable to determine the git repository of '{}', has it been pushed yet?", basedir.display())]
    RepositoryUnknown { basedir: PathBuf },
}
