//! Raw provisioning service API consumed by the stack manager.
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ApiResult;

/// Stack as reported by the provisioning service. Tag keys still carry their prefix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackDescription {
    pub stack_id: String,
    pub stack_name: String,
    pub status: String,
    pub status_reason: Option<String>,
    pub creation_time: DateTime<Utc>,
    pub last_updated_time: Option<DateTime<Utc>>,
    pub tags: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    pub parameters: BTreeMap<String, String>,
    pub termination_protection: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StacksPage {
    pub stacks: Vec<StackDescription>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackParameter {
    pub key: String,
    pub value: Option<String>,
    pub use_previous_value: bool,
}

/// Create/update request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackInput {
    pub stack_name: String,
    pub template_body: String,
    pub parameters: Vec<StackParameter>,
    pub tags: BTreeMap<String, String>,
    pub capabilities: Vec<String>,
    pub role_arn: Option<String>,
    pub policy_body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackEvent {
    pub event_id: String,
    pub stack_name: String,
    pub logical_resource_id: String,
    pub resource_type: String,
    pub resource_status: String,
    pub resource_status_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackResource {
    pub logical_resource_id: String,
    pub physical_resource_id: String,
    pub resource_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescription {
    pub image_id: String,
    pub name: String,
    /// RFC 3339 timestamp
    pub creation_date: String,
}

pub const CAPABILITY_IAM: &str = "CAPABILITY_IAM";
pub const CAPABILITY_NAMED_IAM: &str = "CAPABILITY_NAMED_IAM";

pub const RESOURCE_TYPE_BUCKET: &str = "AWS::S3::Bucket";
pub const RESOURCE_TYPE_REPOSITORY: &str = "AWS::ECR::Repository";
pub const RESOURCE_TYPE_STACK: &str = "AWS::CloudFormation::Stack";

#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    /// Describe one stack; `None` when it does not exist.
    async fn describe_stack(&self, name: &str) -> ApiResult<Option<StackDescription>>;

    async fn describe_stacks_page(&self, next_token: Option<String>) -> ApiResult<StacksPage>;

    /// Stack events, newest first.
    async fn describe_stack_events(&self, name: &str) -> ApiResult<Vec<StackEvent>>;

    async fn describe_stack_resources(&self, name: &str) -> ApiResult<Vec<StackResource>>;

    /// Returns the new stack id.
    async fn create_stack(&self, input: StackInput) -> ApiResult<String>;

    async fn update_stack(&self, input: StackInput) -> ApiResult<()>;

    async fn delete_stack(&self, name: &str) -> ApiResult<()>;

    async fn wait_until_stack_exists(&self, name: &str) -> ApiResult<()>;

    async fn update_termination_protection(&self, name: &str, enabled: bool) -> ApiResult<()>;

    async fn set_stack_policy(&self, name: &str, policy_body: &str) -> ApiResult<()>;

    async fn describe_images(&self, owner: &str, name_pattern: &str) -> ApiResult<Vec<ImageDescription>>;

    async fn describe_availability_zones(&self) -> ApiResult<Vec<String>>;
}
