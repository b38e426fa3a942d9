//! # Workflows
//!
//! High-level intents ("upsert environment", "deploy service", "purge namespace")
//! assembled from [`Executor`] compositors over the managers of a [`Context`].
//!
//! Every workflow follows the same shape: a struct holding the shared
//! [`Context`] plus a `tokio::sync::Mutex` of per-run state, and a public
//! constructor returning an [`Executor`] whose steps are async methods on that
//! struct. Steps hand data forward through the state (parameter maps, stack
//! names, resolved images); nothing runs until the executor is awaited.
//!
//! Stacks refer to each other only through exported names
//! (`<stack>-VpcId`, `<stack>-ElbHttpListenerArn`, ...), so any upsert can be
//! re-run on its own.
//!
//! [`Context`]: crate::kernel::Context
pub mod catalog;
pub mod database;
pub mod environment;
pub mod error;
pub mod init;
pub mod logs;
pub mod pipeline;
pub mod purge;
pub mod service;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;

use crate::config::Config;
use crate::executor::Executor;
use crate::kernel::constants::TAG_PREFIX;
use crate::kernel::error::Result;
use crate::stack::{Stack, StackManager, StackUpsert, check_deleted, check_upserted};

pub use error::WorkflowError;

/// Tags written by the tool itself; config-supplied tags may not use them.
const RESERVED_TAGS: [&str; 7] = ["type", "version", "environment", "service", "provider", "revision", "repo"];

/// Run `f` with the shared workflow struct when the executor runs.
pub(crate) fn step<W, F, Fut>(workflow: &Arc<W>, f: F) -> Executor
where
    W: Send + Sync + 'static,
    F: FnOnce(Arc<W>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let workflow = workflow.clone();
    Executor::new(move || f(workflow))
}

pub(crate) fn params(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Insert `value` under `key` unless it is empty.
pub(crate) fn set_if(params: &mut BTreeMap<String, String>, key: &str, value: &str) {
    if !value.is_empty() {
        params.insert(key.to_string(), value.to_string());
    }
}

/// Insert `value` under `key` when present.
pub(crate) fn set_opt<T: ToString>(params: &mut BTreeMap<String, String>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        params.insert(key.to_string(), value.to_string());
    }
}

/// Upsert a stack and wait for it to settle in a successful status.
pub(crate) async fn upsert_and_await(stacks: &dyn StackManager, upsert: StackUpsert) -> Result<Stack> {
    let name = upsert.name.clone();
    stacks.upsert_stack(upsert).await?;
    debug!("Waiting for stack '{name}' to complete");
    let stack = stacks.await_final_status(&name).await?;
    check_upserted(&name, stack)
}

/// Delete a stack if it exists and wait for the delete to finish.
pub(crate) async fn delete_and_await(stacks: &dyn StackManager, name: &str) -> Result<()> {
    if stacks.await_final_status(name).await?.is_none() {
        info!("  Stack '{name}' is already deleted.");
        return Ok(());
    }
    stacks.delete_stack(name).await?;
    debug!("Waiting for stack '{name}' to delete");
    let stack = stacks.await_final_status(name).await?;
    check_deleted(stack)
}

/// Layer user tags from the config onto the tool's own tags.
pub(crate) fn merge_tags(
    stack: &str,
    tags: BTreeMap<String, String>,
    extra: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut merged = tags;
    for (key, value) in extra {
        if RESERVED_TAGS.contains(&key.as_str()) {
            return Err(WorkflowError::ReservedTag {
                stack: stack.to_string(),
                key: key.clone(),
            }
            .into());
        }
        merged.insert(format!("{TAG_PREFIX}{key}"), value.clone());
    }
    Ok(merged)
}

/// Explicit name, else the config's service name, else the repository name.
pub(crate) fn resolve_service_name(config: &Config, explicit: &str) -> Result<String> {
    let name = if explicit.is_empty() { config.service_name() } else { explicit };
    if name.is_empty() {
        return Err(WorkflowError::ServiceNameRequired.into());
    }
    Ok(name.to_string())
}

/// One row of a stack listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackSummary {
    /// Value of the tag the listing is keyed by (environment or service).
    pub subject: String,
    pub stack: String,
    pub status: String,
    pub status_reason: String,
    pub last_update: DateTime<Utc>,
    pub version: String,
}

impl StackSummary {
    pub fn new(stack: &Stack, subject_tag: &str) -> Self {
        Self {
            subject: stack.tag(subject_tag).to_string(),
            stack: stack.name.clone(),
            status: stack.status.clone(),
            status_reason: stack.status_reason.clone(),
            last_update: stack.last_update,
            version: stack.tag("version").to_string(),
        }
    }
}

#[cfg(test)]
mod tests;
