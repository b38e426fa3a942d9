//! # Stack Management
//!
//! A stack is the unit of provisioned state: a named set of cloud resources
//! created from one template. Every stack the tool creates is named
//! `<namespace>-<type>-<parts...>` (see [`stack_name`]) and carries `mu:`-prefixed
//! tags recording its [`StackType`] and the tool version that wrote it.
//!
//! [`StackManager`] is the seam the rest of the crate talks to;
//! [`ProvisioningStackManager`] implements it over a raw [`ProvisioningApi`].
pub mod api;
pub mod error;
pub mod manager;
pub mod version;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kernel::constants::TAG_PREFIX;
use crate::kernel::error::{Error, Result};

pub use api::ProvisioningApi;
pub use error::StackSystemError;
pub use manager::{ProvisioningStackManager, StackManagerOptions};

/// Purpose of a stack, recorded in its `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackType {
    Vpc,
    Target,
    Environment,
    LoadBalancer,
    Service,
    Pipeline,
    Database,
    Bucket,
    Repo,
    Iam,
    Schedule,
    App,
    Consul,
    Product,
    Portfolio,
}

impl StackType {
    pub const ALL: [StackType; 15] = [
        StackType::Vpc,
        StackType::Target,
        StackType::Environment,
        StackType::LoadBalancer,
        StackType::Service,
        StackType::Pipeline,
        StackType::Database,
        StackType::Bucket,
        StackType::Repo,
        StackType::Iam,
        StackType::Schedule,
        StackType::App,
        StackType::Consul,
        StackType::Product,
        StackType::Portfolio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StackType::Vpc => "vpc",
            StackType::Target => "target",
            StackType::Environment => "environment",
            StackType::LoadBalancer => "loadbalancer",
            StackType::Service => "service",
            StackType::Pipeline => "pipeline",
            StackType::Database => "database",
            StackType::Bucket => "bucket",
            StackType::Repo => "repo",
            StackType::Iam => "iam",
            StackType::Schedule => "schedule",
            StackType::App => "app",
            StackType::Consul => "consul",
            StackType::Product => "product",
            StackType::Portfolio => "portfolio",
        }
    }
}

impl fmt::Display for StackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StackType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // stacks written by older releases call the environment stack a cluster
        if s.eq_ignore_ascii_case("cluster") {
            return Ok(StackType::Environment);
        }
        StackType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::parse("stack type", s, "not a known stack type"))
    }
}

/// `<namespace>-<type>-<parts joined by "-">`
pub fn stack_name(namespace: &str, stack_type: StackType, parts: &[&str]) -> String {
    let mut name = format!("{namespace}-{stack_type}");
    for part in parts {
        name.push('-');
        name.push_str(part);
    }
    name
}

/// Tool-owned tags for a new stack, keys already prefixed with `mu:`.
pub fn build_tags(stack_type: StackType, pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert(format!("{TAG_PREFIX}type"), stack_type.to_string());
    for (key, value) in pairs {
        tags.insert(format!("{TAG_PREFIX}{key}"), (*value).to_string());
    }
    tags
}

/// Provisioning status values and helpers.
pub mod status {
    pub const CREATE_IN_PROGRESS: &str = "CREATE_IN_PROGRESS";
    pub const CREATE_COMPLETE: &str = "CREATE_COMPLETE";
    pub const CREATE_FAILED: &str = "CREATE_FAILED";
    pub const UPDATE_IN_PROGRESS: &str = "UPDATE_IN_PROGRESS";
    pub const UPDATE_COMPLETE: &str = "UPDATE_COMPLETE";
    pub const ROLLBACK_IN_PROGRESS: &str = "ROLLBACK_IN_PROGRESS";
    pub const ROLLBACK_COMPLETE: &str = "ROLLBACK_COMPLETE";
    pub const DELETE_IN_PROGRESS: &str = "DELETE_IN_PROGRESS";
    pub const DELETE_COMPLETE: &str = "DELETE_COMPLETE";
    pub const DELETE_FAILED: &str = "DELETE_FAILED";
    pub const DRYRUN_COMPLETE: &str = "DRYRUN_COMPLETE";

    /// Any status that does not end with `_IN_PROGRESS`.
    pub fn is_final(status: &str) -> bool {
        !status.ends_with("_IN_PROGRESS")
    }

    /// A final status that represents a successful create or update.
    pub fn is_successful(status: &str) -> bool {
        status.ends_with("_COMPLETE") && !status.ends_with("ROLLBACK_COMPLETE")
    }
}

/// A provisioned stack, with tag prefixes stripped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    pub id: String,
    pub name: String,
    pub status: String,
    pub status_reason: String,
    pub last_update: DateTime<Utc>,
    pub region: String,
    pub account_id: String,
    pub tags: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    pub parameters: BTreeMap<String, String>,
    pub termination_protection: bool,
}

impl Stack {
    /// Synthetic stack returned for stacks that only exist in a dryrun.
    pub fn dryrun(name: &str, version: &str) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert("version".to_string(), version.to_string());
        Self {
            name: name.to_string(),
            status: status::DRYRUN_COMPLETE.to_string(),
            last_update: Utc::now(),
            tags,
            ..Default::default()
        }
    }

    pub fn tag(&self, key: &str) -> &str {
        self.tags.get(key).map(String::as_str).unwrap_or_default()
    }

    pub fn output(&self, key: &str) -> &str {
        self.outputs.get(key).map(String::as_str).unwrap_or_default()
    }

    pub fn stack_type(&self) -> Option<StackType> {
        self.tags.get("type").and_then(|t| t.parse().ok())
    }

    pub fn is_final(&self) -> bool {
        status::is_final(&self.status)
    }

    pub fn is_successful(&self) -> bool {
        status::is_successful(&self.status)
    }
}

/// Everything needed to create or update one stack.
#[derive(Debug, Clone)]
pub struct StackUpsert {
    pub name: String,
    pub template: String,
    pub template_data: serde_json::Value,
    pub parameters: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub policy: Option<String>,
    pub role_arn: Option<String>,
}

impl StackUpsert {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            template_data: serde_json::Value::Null,
            parameters: BTreeMap::new(),
            tags: BTreeMap::new(),
            policy: None,
            role_arn: None,
        }
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.template_data = data;
        self
    }

    pub fn parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Service role the provisioning service assumes; ignored when empty.
    pub fn role_arn(mut self, role_arn: &str) -> Self {
        if !role_arn.is_empty() {
            self.role_arn = Some(role_arn.to_string());
        }
        self
    }

    pub fn stack_type(&self) -> Option<StackType> {
        self.tags
            .get(&format!("{TAG_PREFIX}type"))
            .and_then(|t| t.parse().ok())
    }
}

/// Outcome of an upsert: the stack must exist and have completed successfully.
pub fn check_upserted(name: &str, stack: Option<Stack>) -> Result<Stack> {
    let stack = stack.ok_or_else(|| StackSystemError::StackNotCreated { stack: name.to_string() })?;
    if !stack.is_successful() {
        return Err(StackSystemError::FailedStatus {
            stack: stack.name.clone(),
            status: stack.status.clone(),
            reason: stack.status_reason.clone(),
        }
        .into());
    }
    Ok(stack)
}

/// Outcome of a delete: the stack is gone or settled in a `_COMPLETE` status.
pub fn check_deleted(stack: Option<Stack>) -> Result<()> {
    match stack {
        Some(stack) if !stack.status.ends_with("_COMPLETE") => Err(StackSystemError::FailedStatus {
            stack: stack.name,
            status: stack.status,
            reason: stack.status_reason,
        }
        .into()),
        _ => Ok(()),
    }
}

#[async_trait]
pub trait StackManager: Send + Sync {
    /// Create the stack if absent, update it otherwise.
    async fn upsert_stack(&self, upsert: StackUpsert) -> Result<()>;

    /// Poll until the stack reaches a final status; `None` if it does not exist.
    async fn await_final_status(&self, name: &str) -> Result<Option<Stack>>;

    /// Stacks in `namespace`, optionally only those of one type.
    async fn list_stacks(&self, stack_type: Option<StackType>, namespace: &str) -> Result<Vec<Stack>>;

    async fn get_stack(&self, name: &str) -> Result<Stack>;

    async fn delete_stack(&self, name: &str) -> Result<()>;

    async fn find_latest_image_id(&self, pattern: &str) -> Result<String>;

    async fn set_termination_protection(&self, name: &str, enabled: bool) -> Result<()>;

    async fn availability_zones(&self) -> Result<Vec<String>>;

    /// Fail when `stack` was written by an incompatible major version of the tool.
    fn check_version(&self, stack: &Stack) -> Result<()>;

    /// Authorize teardown paths to delete stacks that hold data.
    fn allow_data_loss(&self, allow: bool);

    fn is_dryrun(&self) -> bool;
}

#[cfg(test)]
mod tests;
