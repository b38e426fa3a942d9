//! # Configuration
//!
//! Typed model of `mu.yml`. The document is read once per invocation by
//! [`loader::load_config`], validated by [`validate::validate`], and never
//! mutated by workflows afterwards.
//!
//! Keys are camelCase; unknown keys are rejected when the file is parsed.
pub mod error;
pub mod git;
pub mod loader;
pub mod validate;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::kernel::error::{Error, Result};

pub use error::ConfigError;
pub use loader::{load_config, load_config_str};

/// Container platform an environment runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvProvider {
    #[default]
    Ecs,
    EcsFargate,
    Ec2,
    Eks,
    EksFargate,
}

impl EnvProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvProvider::Ecs => "ecs",
            EnvProvider::EcsFargate => "ecs-fargate",
            EnvProvider::Ec2 => "ec2",
            EnvProvider::Eks => "eks",
            EnvProvider::EksFargate => "eks-fargate",
        }
    }

    pub fn is_ecs(&self) -> bool {
        matches!(self, EnvProvider::Ecs | EnvProvider::EcsFargate)
    }

    pub fn is_eks(&self) -> bool {
        matches!(self, EnvProvider::Eks | EnvProvider::EksFargate)
    }
}

impl fmt::Display for EnvProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ecs" => Ok(EnvProvider::Ecs),
            "ecs-fargate" => Ok(EnvProvider::EcsFargate),
            "ec2" => Ok(EnvProvider::Ec2),
            "eks" => Ok(EnvProvider::Eks),
            "eks-fargate" => Ok(EnvProvider::EksFargate),
            _ => Err(Error::parse("environment provider", s, "expected ecs, ecs-fargate, ec2, eks or eks-fargate")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Config {
    pub namespace: String,
    pub environments: Vec<Environment>,
    pub service: Service,
    pub catalog: Catalog,
    #[serde(rename = "disableIAM")]
    pub disable_iam: bool,
    pub roles: CommonRoles,
    pub extensions: Vec<Extension>,
    /// Template overlays keyed by stack name.
    pub templates: BTreeMap<String, serde_yaml::Value>,
    /// Parameter overrides keyed by stack name.
    pub parameters: BTreeMap<String, BTreeMap<String, String>>,
    /// Additional tags keyed by stack name.
    pub tags: BTreeMap<String, BTreeMap<String, String>>,

    /// Directory holding the config file
    #[serde(skip)]
    pub basedir: PathBuf,
    /// Config file path relative to the repository root
    #[serde(skip)]
    pub rel_mu_file: String,
    #[serde(skip)]
    pub repo: Repo,
}

impl Config {
    /// Look up an environment by name, case-insensitively.
    pub fn environment(&self, name: &str) -> Result<&Environment> {
        self.environments
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::EnvironmentNotFound { name: name.to_string() }.into())
    }

    /// Service name from the config, falling back to the repository name.
    pub fn service_name(&self) -> &str {
        if self.service.name.is_empty() {
            &self.repo.name
        } else {
            &self.service.name
        }
    }
}

/// Source repository metadata discovered next to the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub name: String,
    pub slug: String,
    pub revision: String,
    pub branch: String,
    pub provider: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct CommonRoles {
    pub cloud_formation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Extension {
    pub url: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Environment {
    pub name: String,
    pub provider: EnvProvider,
    pub loadbalancer: LoadBalancer,
    pub cluster: Cluster,
    pub discovery: Discovery,
    pub vpc_target: VpcTarget,
    pub roles: EnvironmentRoles,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoadBalancer {
    pub hostedzone: String,
    pub name: String,
    pub certificate: String,
    pub internal: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Cluster {
    pub instance_type: String,
    pub image_id: String,
    pub image_os_type: String,
    pub instance_tenancy: String,
    pub desired_capacity: Option<u32>,
    pub max_size: Option<u32>,
    pub min_size: Option<u32>,
    pub key_name: String,
    pub ssh_allow: String,
    pub scale_out_threshold: Option<u32>,
    pub scale_in_threshold: Option<u32>,
    pub http_proxy: String,
    #[serde(rename = "targetCPUReservation")]
    pub target_cpu_reservation: Option<u32>,
    pub target_memory_reservation: Option<u32>,
    pub extra_user_data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Discovery {
    pub provider: String,
    pub name: String,
    pub configuration: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct VpcTarget {
    pub vpc_id: String,
    pub elb_subnet_ids: Vec<String>,
    pub instance_subnet_ids: Vec<String>,
    /// Reuse the network of another environment instead of naming ids.
    pub environment: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct EnvironmentRoles {
    pub ecs_instance: String,
    pub eks_service: String,
    pub consul_client_task: String,
    pub consul_instance: String,
    pub consul_server_task: String,
}

/// How a new revision replaces the running one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStrategy {
    #[default]
    BlueGreen,
    Rolling,
    Replace,
}

/// An environment variable value, either shared or per environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentValue {
    Shared(String),
    PerEnvironment(BTreeMap<String, String>),
}

impl EnvironmentValue {
    /// Value for `environment`; empty when a per-environment map has no entry.
    pub fn resolve(&self, environment: &str) -> String {
        match self {
            EnvironmentValue::Shared(value) => value.clone(),
            EnvironmentValue::PerEnvironment(values) => values.get(environment).cloned().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Service {
    pub name: String,
    pub port: Option<u16>,
    pub protocol: String,
    pub health_endpoint: String,
    pub cpu: Option<u32>,
    pub memory: Option<u32>,
    pub network_mode: String,
    pub links: Vec<String>,
    pub assign_public_ip: bool,
    pub desired_count: Option<u32>,
    pub min_size: Option<u32>,
    pub max_size: Option<u32>,
    #[serde(rename = "targetCPUUtilization")]
    pub target_cpu_utilization: Option<u32>,
    #[serde(rename = "discoveryTTL")]
    pub discovery_ttl: String,
    pub environment: BTreeMap<String, EnvironmentValue>,
    pub path_patterns: Vec<String>,
    pub host_patterns: Vec<String>,
    pub priority: Option<u32>,
    pub image_repository: String,
    pub dockerfile: String,
    /// Artifact provider for `service push`: `ecr` or `s3`.
    pub provider: String,
    pub deployment_strategy: DeploymentStrategy,
    pub database: Database,
    pub pipeline: Pipeline,
    pub roles: ServiceRoles,
    pub schedule: Vec<Schedule>,
}

impl Service {
    /// Environment variables with per-environment values resolved.
    pub fn environment_for(&self, environment: &str) -> BTreeMap<String, String> {
        self.environment
            .iter()
            .map(|(key, value)| (key.clone(), value.resolve(environment)))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ServiceRoles {
    pub ec2_instance: String,
    pub code_deploy: String,
    pub ecs_events: String,
    pub ecs_service: String,
    pub ecs_task: String,
    pub application_auto_scaling: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Schedule {
    pub name: String,
    pub expression: String,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Database {
    pub name: String,
    pub engine: String,
    pub engine_mode: String,
    pub instance_class: String,
    pub allocated_storage: String,
    pub master_username: String,
    pub min_size: String,
    pub max_size: String,
    pub seconds_until_auto_pause: String,
    pub kms_key: String,
    #[serde(rename = "masterPasswordSSMParam")]
    pub master_password_ssm_param: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Pipeline {
    pub source: PipelineSource,
    pub build: PipelineBuild,
    pub acceptance: PipelineStage,
    pub production: PipelineStage,
    pub mu_baseurl: String,
    pub mu_version: String,
    pub kms_key: String,
    pub roles: PipelineRoles,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct PipelineSource {
    pub provider: String,
    pub repo: String,
    pub branch: String,
    pub bucket: String,
    pub object_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct PipelineBuild {
    #[serde(rename = "type")]
    pub build_type: String,
    pub compute_type: String,
    pub image: String,
    pub bucket: String,
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct PipelineStage {
    pub environment: String,
    #[serde(rename = "type")]
    pub build_type: String,
    pub compute_type: String,
    pub image: String,
    pub disabled: bool,
    pub roles: StageRoles,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct StageRoles {
    pub code_build: String,
    pub mu: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct PipelineRoles {
    pub pipeline: String,
    pub build: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Catalog {
    #[serde(rename = "iamUsers")]
    pub iam_users: Vec<String>,
    pub pipelines: Vec<CatalogPipeline>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct CatalogPipeline {
    pub name: String,
    pub description: String,
    /// Product version name to the pipeline it provisions.
    pub versions: BTreeMap<String, Pipeline>,
}

#[cfg(test)]
mod tests;
