//! # Local Cloud
//!
//! An in-process cloud that implements every provider API of the crate. Stacks
//! move through `*_IN_PROGRESS` into a final status after a configurable number
//! of polls, and their templates are evaluated so outputs, exports and the
//! resources they own (buckets, repositories, services, listener rules,
//! pipelines, catalog products) behave like the real thing.
//!
//! State lives in memory and, when opened with a path, is written back to a JSON
//! file after every mutation so consecutive CLI invocations share it.
mod provisioning;
mod services;
pub mod template;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::artifact::StoredObject;
use crate::kernel::error::{Error, Result};
use crate::param::Parameter;
use crate::provider::catalog::{ProvisionedProduct, ProvisioningArtifact};
use crate::provider::cluster::ContainerInstance;
use crate::provider::elb::ListenerRule;
use crate::provider::logs::LogEvent;
use crate::provider::pipeline::StageState;
use crate::stack::api::{ImageDescription, StackDescription, StackEvent, StackResource};

pub use template::{ACCOUNT_ID, REGION};

/// Environment variable naming the state file used by the binary.
pub const STATE_FILE_ENV: &str = "MU_STATE_FILE";

/// Polls a stack operation stays in progress before it settles.
pub const DEFAULT_SETTLE_POLLS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum OperationKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PendingOperation {
    pub kind: OperationKind,
    pub polls_left: u32,
}

/// Inputs an update replaced, restored when the update rolls back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PreviousInputs {
    pub template_body: String,
    pub parameters: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LocalStack {
    pub description: StackDescription,
    pub template_body: String,
    pub policy_body: Option<String>,
    pub role_arn: Option<String>,
    pub resources: Vec<StackResource>,
    /// Newest first.
    pub events: Vec<StackEvent>,
    pub exports: BTreeSet<String>,
    pub imports: BTreeSet<String>,
    pub pending: Option<PendingOperation>,
    pub previous: Option<PreviousInputs>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LocalService {
    pub cluster: String,
    pub name: String,
    pub container_names: Vec<String>,
    pub desired_count: u32,
    pub tasks: Vec<String>,
    pub stack: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LocalTask {
    pub arn: String,
    pub cluster: String,
    pub container_names: Vec<String>,
    pub container_instance_arn: String,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LocalProduct {
    pub stack: String,
    pub artifacts: Vec<ProvisioningArtifact>,
    pub provisioned: Vec<ProvisionedProduct>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LocalPipeline {
    pub stack: String,
    pub stages: Vec<StageState>,
}

/// Everything the local cloud knows, serialized as one JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct CloudState {
    pub stacks: BTreeMap<String, LocalStack>,
    pub exports: BTreeMap<String, String>,
    pub images: Vec<ImageDescription>,
    pub availability_zones: Vec<String>,
    pub parameters: BTreeMap<String, Parameter>,
    pub buckets: BTreeMap<String, BTreeMap<String, StoredObject>>,
    pub bucket_owners: BTreeMap<String, String>,
    pub repositories: BTreeMap<String, BTreeSet<String>>,
    pub repository_owners: BTreeMap<String, String>,
    pub log_groups: BTreeMap<String, Vec<LogEvent>>,
    /// Listener arn to rules; each rule remembers the stack that created it.
    pub listener_rules: BTreeMap<String, Vec<(ListenerRule, String)>>,
    pub services: Vec<LocalService>,
    pub tasks: Vec<LocalTask>,
    /// Cluster name to its hosts, with the stack that launched them.
    pub instances: BTreeMap<String, (Vec<ContainerInstance>, String)>,
    pub pipelines: BTreeMap<String, LocalPipeline>,
    /// Cluster to `namespace/kind/name` to the YAML body of the resource.
    pub kubernetes: BTreeMap<String, BTreeMap<String, String>>,
    pub products: BTreeMap<String, LocalProduct>,
    pub built_images: Vec<String>,
    pub pushed_images: Vec<String>,
    pub sequence: u64,
    /// Count of mutating calls, used to check idempotence.
    pub writes: u64,
    /// Mutating calls in order, e.g. `CreateStack mu-vpc-dev`.
    pub history: Vec<String>,
}

impl CloudState {
    fn seeded() -> Self {
        let image = |id: &str, name: &str, created: &str| ImageDescription {
            image_id: id.to_string(),
            name: name.to_string(),
            creation_date: created.to_string(),
        };
        Self {
            availability_zones: ["a", "b", "c"].iter().map(|z| format!("{REGION}{z}")).collect(),
            images: vec![
                image("ami-0ec5000001", "amzn-ami-2018.03.a-amazon-ecs-optimized", "2018-06-01T00:00:00.000Z"),
                image("ami-0ec5000002", "amzn-ami-2018.03.u-amazon-ecs-optimized", "2019-11-20T00:00:00.000Z"),
                image("ami-0ec2000001", "amzn-ami-hvm-2018.03.0.20180811-x86_64-gp2", "2018-08-11T00:00:00.000Z"),
                image("ami-0ec2000002", "amzn-ami-hvm-2018.03.0.20190826-x86_64-gp2", "2019-08-26T00:00:00.000Z"),
                image("ami-0e45000001", "amazon-eks-node-1.11-v20190220", "2019-02-20T00:00:00.000Z"),
            ],
            ..Default::default()
        }
    }

    pub fn next_id(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    pub fn record_write(&mut self, action: impl Into<String>) {
        self.writes += 1;
        self.history.push(action.into());
    }
}

/// In-process implementation of every provider API.
pub struct LocalCloud {
    state: Mutex<CloudState>,
    state_file: Option<PathBuf>,
    settle_polls: u32,
}

impl Default for LocalCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalCloud {
    /// An empty cloud held only in memory.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CloudState::seeded()),
            state_file: None,
            settle_polls: DEFAULT_SETTLE_POLLS,
        }
    }

    /// Load the cloud persisted at `path`, or start a new one that will be saved there.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.is_file() {
            let body = fs::read(&path).map_err(|e| Error::io(e, "read", &path))?;
            serde_json::from_slice(&body).map_err(|e| Error::serialization("local cloud state", e))?
        } else {
            debug!("No local cloud state at '{}', starting empty", path.display());
            CloudState::seeded()
        };
        Ok(Self {
            state: Mutex::new(state),
            state_file: Some(path),
            settle_polls: DEFAULT_SETTLE_POLLS,
        })
    }

    /// Number of polls a stack operation stays in progress; 0 settles on the first poll.
    pub fn with_settle_polls(mut self, polls: u32) -> Self {
        self.settle_polls = polls;
        self
    }

    pub fn with_availability_zones(self, zones: &[&str]) -> Self {
        self.lock().availability_zones = zones.iter().map(|z| z.to_string()).collect();
        self
    }

    pub fn state_file(&self) -> Option<&Path> {
        self.state_file.as_deref()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the state file, if any. Failures are logged; the in-memory state stays authoritative.
    pub(crate) fn persist(&self, state: &CloudState) {
        let Some(path) = &self.state_file else {
            return;
        };
        let result = serde_json::to_vec_pretty(state)
            .map_err(|e| e.to_string())
            .and_then(|body| {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                fs::write(path, body).map_err(|e| e.to_string())
            });
        if let Err(err) = result {
            log::warn!("Unable to save local cloud state to '{}': {err}", path.display());
        }
    }

    /// Count of mutating calls so far.
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    /// Mutating calls in the order they were made.
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    /// Names of the stacks that currently exist.
    pub fn stack_names(&self) -> Vec<String> {
        self.lock().stacks.keys().cloned().collect()
    }

    /// Current description of a stack without advancing it.
    pub fn peek_stack(&self, name: &str) -> Option<StackDescription> {
        self.lock().stacks.get(name).map(|stack| stack.description.clone())
    }

    /// Register a stack as if an earlier release had created it.
    pub fn seed_stack(&self, description: StackDescription) {
        let mut state = self.lock();
        let name = description.stack_name.clone();
        state.stacks.insert(
            name,
            LocalStack {
                description,
                template_body: String::new(),
                policy_body: None,
                role_arn: None,
                resources: Vec::new(),
                events: Vec::new(),
                exports: BTreeSet::new(),
                imports: BTreeSet::new(),
                pending: None,
                previous: None,
            },
        );
        self.persist(&state);
    }

    pub fn add_image(&self, image: ImageDescription) {
        let mut state = self.lock();
        state.images.push(image);
        self.persist(&state);
    }

    /// Add a rule not owned by any stack to a listener.
    pub fn add_listener_rule(&self, listener_arn: &str, priority: u32) {
        let mut state = self.lock();
        let id = state.next_id();
        let rule = ListenerRule {
            arn: format!("{listener_arn}/rule/{id}"),
            priority: Some(priority),
        };
        state
            .listener_rules
            .entry(listener_arn.to_string())
            .or_default()
            .push((rule, String::new()));
        self.persist(&state);
    }

    /// Append log lines to a stream of a group, stamped with the current time.
    pub fn put_log_events(&self, group: &str, stream: &str, messages: &[&str]) {
        let mut state = self.lock();
        let now = chrono::Utc::now().timestamp_millis();
        let events = state.log_groups.entry(group.to_string()).or_default();
        for message in messages {
            events.push(LogEvent {
                stream: stream.to_string(),
                message: message.to_string(),
                timestamp: now,
            });
        }
        self.persist(&state);
    }

    /// Register a product provisioned from a catalog product.
    pub fn add_provisioned_product(&self, product_id: &str, name: &str) {
        let mut state = self.lock();
        let id = state.next_id();
        if let Some(product) = state.products.get_mut(product_id) {
            product.provisioned.push(ProvisionedProduct {
                id: format!("pp-{id:012}"),
                name: name.to_string(),
                physical_id: format!("arn:aws:cloudformation:{REGION}:{ACCOUNT_ID}:stack/SC-{name}/{id}"),
            });
        }
        self.persist(&state);
    }

    pub fn parameter(&self, name: &str) -> Option<Parameter> {
        self.lock().parameters.get(name).cloned()
    }

    pub fn bucket_keys(&self, bucket: &str) -> Option<Vec<String>> {
        self.lock().buckets.get(bucket).map(|objects| objects.keys().cloned().collect())
    }

    pub fn repository_images(&self, repository: &str) -> Option<Vec<String>> {
        self.lock()
            .repositories
            .get(repository)
            .map(|images| images.iter().cloned().collect())
    }

    pub fn listener_rules(&self, listener_arn: &str) -> Vec<ListenerRule> {
        self.lock()
            .listener_rules
            .get(listener_arn)
            .map(|rules| rules.iter().map(|(rule, _)| rule.clone()).collect())
            .unwrap_or_default()
    }

    /// Keys (`namespace/kind/name`) of the Kubernetes resources applied to `cluster`.
    pub fn kubernetes_resources(&self, cluster: &str) -> Vec<String> {
        self.lock()
            .kubernetes
            .get(cluster)
            .map(|resources| resources.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn product_artifacts(&self, product_id: &str) -> Vec<ProvisioningArtifact> {
        self.lock()
            .products
            .get(product_id)
            .map(|product| product.artifacts.clone())
            .unwrap_or_default()
    }

    pub fn built_images(&self) -> Vec<String> {
        self.lock().built_images.clone()
    }

    pub fn pushed_images(&self) -> Vec<String> {
        self.lock().pushed_images.clone()
    }

    /// Command lines of the ad-hoc tasks started so far.
    pub fn task_commands(&self) -> Vec<Vec<String>> {
        self.lock().tasks.iter().map(|task| task.command.clone()).collect()
    }
}

#[cfg(test)]
mod tests;
