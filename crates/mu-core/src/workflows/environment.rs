//! # Environment Workflows
//!
//! An environment is four stacks plus its IAM roles:
//!
//! 1. `<ns>-vpc-<env>` (or `<ns>-target-<env>` when the network already exists)
//! 2. `<ns>-loadbalancer-<env>`
//! 3. `<ns>-environment-<env>`, the cluster, with a template chosen by provider
//!
//! Upsert walks them in that order, feeding each stack the export names of the
//! ones before it. Terminate removes everything deployed into the environment
//! first, then walks the stacks backwards.
use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;

use crate::config::{ConfigError, EnvProvider, Environment};
use crate::executor::{Executor, any_error, parallel, sequence, warn_on_fail};
use crate::kernel::Context;
use crate::kernel::constants::{EC2_IMAGE_PATTERN, ECS_IMAGE_PATTERN, EKS_IMAGE_PATTERN};
use crate::kernel::error::{Error, Result};
use crate::provider::ContainerInstance;
use crate::stack::{Stack, StackType, StackUpsert, build_tags, stack_name};
use crate::templates;
use crate::workflows::{
    StackSummary, WorkflowError, delete_and_await, merge_tags, params, set_if, set_opt, step, upsert_and_await,
};

const DEFAULT_SSH_ALLOW: &str = "0.0.0.0/0";

#[derive(Default)]
struct UpsertState {
    environment: Environment,
    cloud_formation_role: String,
    elb_params: BTreeMap<String, String>,
    cluster_params: BTreeMap<String, String>,
}

struct EnvironmentUpsert {
    ctx: Arc<Context>,
    name: String,
    state: Mutex<UpsertState>,
}

/// Create or update every stack of environment `name`.
pub fn upserter(ctx: Arc<Context>, name: &str) -> Executor {
    let workflow = Arc::new(EnvironmentUpsert {
        ctx,
        name: name.to_string(),
        state: Mutex::new(UpsertState::default()),
    });
    sequence(vec![
        step(&workflow, |w| async move { w.load_environment().await }),
        step(&workflow, |w| async move { w.upsert_rolesets().await }),
        step(&workflow, |w| async move { w.upsert_network().await }),
        step(&workflow, |w| async move { w.upsert_load_balancer().await }),
        step(&workflow, |w| async move { w.upsert_cluster().await }),
    ])
}

/// Reject settings that are no longer supported.
fn normalize(environment: &Environment) -> Result<Environment> {
    if environment.discovery.provider.eq_ignore_ascii_case("consul") {
        return Err(ConfigError::UnsupportedDiscovery.into());
    }
    Ok(environment.clone())
}

impl EnvironmentUpsert {
    fn namespace(&self) -> &str {
        self.ctx.namespace()
    }

    fn tags(&self, stack: &str, stack_type: StackType, environment: &Environment) -> Result<BTreeMap<String, String>> {
        let repo = &self.ctx.config.repo;
        let tags = build_tags(
            stack_type,
            &[
                ("environment", environment.name.as_str()),
                ("provider", environment.provider.as_str()),
                ("revision", repo.revision.as_str()),
                ("repo", repo.slug.as_str()),
            ],
        );
        merge_tags(stack, tags, &environment.tags)
    }

    async fn load_environment(&self) -> Result<()> {
        let environment = normalize(self.ctx.config.environment(&self.name)?)?;
        debug!("Loaded environment '{}' with provider '{}'", environment.name, environment.provider);

        // refuse before anything is written
        let env_stack = stack_name(self.namespace(), StackType::Environment, &[&self.name]);
        if let Some(existing) = self.ctx.stacks.await_final_status(&env_stack).await? {
            self.ctx.stacks.check_version(&existing)?;
        }
        self.state.lock().await.environment = environment;
        Ok(())
    }

    async fn upsert_rolesets(&self) -> Result<()> {
        let rolesets = &self.ctx.rolesets;
        let mut state = self.state.lock().await;
        let name = state.environment.name.clone();

        rolesets.upsert_common_roleset().await?;
        rolesets.upsert_environment_roleset(&name).await?;

        let common = rolesets.get_common_roleset().await?;
        let roles = rolesets.get_environment_roleset(&name).await?;
        let role = |key: &str| roles.get(key).cloned().unwrap_or_default();

        state.cloud_formation_role = common.get("CloudFormationRoleArn").cloned().unwrap_or_default();
        let eks = state.environment.provider.is_eks();
        set_if(&mut state.cluster_params, "EC2InstanceProfileArn", &role("EC2InstanceProfileArn"));
        if eks {
            set_if(&mut state.cluster_params, "EksServiceRoleArn", &role("EksServiceRoleArn"));
        }
        Ok(())
    }

    async fn upsert_network(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let environment = state.environment.clone();
        let target = &environment.vpc_target;

        let vpc_stack = if !target.environment.is_empty() {
            let namespace = if target.namespace.is_empty() { self.namespace() } else { target.namespace.as_str() };
            let shared = stack_name(namespace, StackType::Vpc, &[&target.environment]);
            info!("Using network of stack '{shared}' for environment '{}'", environment.name);
            shared
        } else if target.vpc_id.is_empty() {
            debug!("No VpcTarget, so we will upsert the VPC stack that manages the VPC");
            let vpc_stack = stack_name(self.namespace(), StackType::Vpc, &[&environment.name]);
            let zones = self.ctx.stacks.availability_zones().await?;
            if zones.len() < 2 {
                return Err(WorkflowError::InsufficientZones { count: zones.len() }.into());
            }

            let cluster = &environment.cluster;
            let mut parameters = params(&[(
                "SshAllow",
                if cluster.ssh_allow.is_empty() { DEFAULT_SSH_ALLOW } else { cluster.ssh_allow.as_str() },
            )]);
            set_if(&mut parameters, "InstanceTenancy", &cluster.instance_tenancy);
            if !cluster.key_name.is_empty() {
                parameters.insert("BastionKeyName".to_string(), cluster.key_name.clone());
                let image = self.ctx.stacks.find_latest_image_id(EC2_IMAGE_PATTERN).await?;
                parameters.insert("BastionImageId".to_string(), image);
            }
            parameters.insert("ElbInternal".to_string(), environment.loadbalancer.internal.to_string());

            info!("Upserting VPC environment '{}' ...", environment.name);
            let upsert = StackUpsert::new(&vpc_stack, templates::VPC)
                .data(json!({ "availability_zones": zones }))
                .parameters(parameters)
                .tags(self.tags(&vpc_stack, StackType::Vpc, &environment)?)
                .role_arn(&state.cloud_formation_role);
            upsert_and_await(self.ctx.stacks.as_ref(), upsert).await?;
            vpc_stack
        } else {
            debug!("VpcTarget exists, so we will upsert the VPC stack that references the VPC attributes");
            let vpc_stack = stack_name(self.namespace(), StackType::Target, &[&environment.name]);
            let parameters = params(&[
                ("VpcId", target.vpc_id.as_str()),
                ("ElbSubnetIds", target.elb_subnet_ids.join(",").as_str()),
                ("InstanceSubnetIds", target.instance_subnet_ids.join(",").as_str()),
            ]);

            info!("Upserting VPC target for environment '{}' ...", environment.name);
            let upsert = StackUpsert::new(&vpc_stack, templates::VPC_TARGET)
                .parameters(parameters)
                .tags(self.tags(&vpc_stack, StackType::Target, &environment)?)
                .role_arn(&state.cloud_formation_role);
            upsert_and_await(self.ctx.stacks.as_ref(), upsert).await?;
            vpc_stack
        };

        state.cluster_params.insert("VpcId".to_string(), format!("{vpc_stack}-VpcId"));
        state
            .cluster_params
            .insert("InstanceSubnetIds".to_string(), format!("{vpc_stack}-InstanceSubnetIds"));
        if environment.provider.is_eks() {
            state
                .cluster_params
                .insert("ElbSubnetIds".to_string(), format!("{vpc_stack}-ElbSubnetIds"));
        }
        state.elb_params.insert("VpcId".to_string(), format!("{vpc_stack}-VpcId"));
        state
            .elb_params
            .insert("ElbSubnetIds".to_string(), format!("{vpc_stack}-ElbSubnetIds"));
        Ok(())
    }

    async fn upsert_load_balancer(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let environment = state.environment.clone();
        let lb_stack = stack_name(self.namespace(), StackType::LoadBalancer, &[&environment.name]);
        let lb = &environment.loadbalancer;

        let mut parameters = state.elb_params.clone();
        set_if(&mut parameters, "ElbCert", &lb.certificate);
        if !lb.hostedzone.is_empty() {
            parameters.insert("ElbDomainName".to_string(), lb.hostedzone.clone());
            let host = if lb.name.is_empty() { &environment.name } else { &lb.name };
            parameters.insert("ElbHostName".to_string(), host.clone());
        }
        parameters.insert("ElbInternal".to_string(), lb.internal.to_string());
        let discovery_name = match environment.discovery.name.as_str() {
            "" => format!("{}.{}.local", environment.name, self.namespace()),
            name => name.to_string(),
        };
        parameters.insert("ServiceDiscoveryName".to_string(), discovery_name);

        info!("Upserting ELB environment '{}' ...", environment.name);
        let upsert = StackUpsert::new(&lb_stack, templates::ELB)
            .parameters(parameters)
            .tags(self.tags(&lb_stack, StackType::LoadBalancer, &environment)?)
            .role_arn(&state.cloud_formation_role);
        upsert_and_await(self.ctx.stacks.as_ref(), upsert).await?;

        state
            .cluster_params
            .insert("ElbSecurityGroup".to_string(), format!("{lb_stack}-InstanceSecurityGroup"));
        Ok(())
    }

    async fn upsert_cluster(&self) -> Result<()> {
        let state = self.state.lock().await;
        let environment = &state.environment;
        let cluster = &environment.cluster;
        let env_stack = stack_name(self.namespace(), StackType::Environment, &[&environment.name]);

        let (template, image_pattern) = match environment.provider {
            EnvProvider::Ecs => (templates::ENV_ECS, Some(ECS_IMAGE_PATTERN)),
            EnvProvider::EcsFargate => (templates::ENV_ECS, None),
            EnvProvider::Ec2 => (templates::ENV_EC2, Some(EC2_IMAGE_PATTERN)),
            EnvProvider::Eks => (templates::ENV_EKS, Some(EKS_IMAGE_PATTERN)),
            EnvProvider::EksFargate => (templates::ENV_EKS, None),
        };

        let mut parameters = state.cluster_params.clone();
        parameters.insert(
            "SshAllow".to_string(),
            if cluster.ssh_allow.is_empty() { DEFAULT_SSH_ALLOW } else { cluster.ssh_allow.as_str() }.to_string(),
        );
        set_if(&mut parameters, "InstanceType", &cluster.instance_type);
        if !cluster.image_id.is_empty() {
            parameters.insert("ImageId".to_string(), cluster.image_id.clone());
        } else if let Some(pattern) = image_pattern {
            let image = self.ctx.stacks.find_latest_image_id(pattern).await?;
            parameters.insert("ImageId".to_string(), image);
        }
        set_opt(&mut parameters, "DesiredCapacity", cluster.desired_capacity);
        set_opt(&mut parameters, "MaxSize", cluster.max_size);
        set_opt(&mut parameters, "MinSize", cluster.min_size);
        set_if(&mut parameters, "KeyName", &cluster.key_name);
        set_opt(&mut parameters, "ScaleOutThreshold", cluster.scale_out_threshold);
        set_opt(&mut parameters, "ScaleInThreshold", cluster.scale_in_threshold);
        set_if(&mut parameters, "HttpProxy", &cluster.http_proxy);
        match environment.provider {
            EnvProvider::Ecs | EnvProvider::EcsFargate => {
                let launch_type = if environment.provider == EnvProvider::EcsFargate { "FARGATE" } else { "EC2" };
                parameters.insert("LaunchType".to_string(), launch_type.to_string());
                set_opt(&mut parameters, "TargetCPUReservation", cluster.target_cpu_reservation);
                set_opt(&mut parameters, "TargetMemoryReservation", cluster.target_memory_reservation);
            }
            EnvProvider::Ec2 => {
                let os = if cluster.image_os_type.is_empty() { "amazon" } else { cluster.image_os_type.as_str() };
                parameters.insert("ImageOsType".to_string(), os.to_string());
            }
            EnvProvider::Eks | EnvProvider::EksFargate => {}
        }

        info!("Upserting cluster environment '{}' ...", environment.name);
        let data = serde_json::to_value(environment).map_err(|e| Error::serialization("template data", e))?;
        let upsert = StackUpsert::new(&env_stack, template)
            .data(data)
            .parameters(parameters)
            .tags(self.tags(&env_stack, StackType::Environment, environment)?)
            .role_arn(&state.cloud_formation_role);
        upsert_and_await(self.ctx.stacks.as_ref(), upsert).await?;
        info!("Environment '{}' is ready", environment.name);
        Ok(())
    }
}

struct EnvironmentTerminate {
    ctx: Arc<Context>,
    name: String,
}

/// Delete environment `name`: services and databases deployed into it, then the
/// cluster, load balancer and network stacks, then its IAM roles.
pub fn terminator(ctx: Arc<Context>, name: &str) -> Executor {
    let workflow = Arc::new(EnvironmentTerminate {
        ctx,
        name: name.to_string(),
    });
    sequence(vec![
        step(&workflow, |w| async move { w.terminate_tagged(StackType::Service).await }),
        step(&workflow, |w| async move { w.terminate_tagged(StackType::Schedule).await }),
        step(&workflow, |w| async move { w.terminate_tagged(StackType::Database).await }),
        warn_on_fail(
            any_error,
            step(&workflow, |w| async move { w.delete(StackType::Environment).await }),
        ),
        warn_on_fail(
            any_error,
            step(&workflow, |w| async move { w.delete(StackType::LoadBalancer).await }),
        ),
        warn_on_fail(any_error, step(&workflow, |w| async move { w.delete(StackType::Vpc).await })),
        warn_on_fail(
            any_error,
            step(&workflow, |w| async move { w.delete(StackType::Target).await }),
        ),
        warn_on_fail(
            any_error,
            step(&workflow, |w| async move { w.delete_rolesets().await }),
        ),
    ])
}

impl EnvironmentTerminate {
    fn stack(&self, stack_type: StackType) -> String {
        stack_name(self.ctx.namespace(), stack_type, &[&self.name])
    }

    /// Delete, in parallel, every stack of `stack_type` tagged with this environment.
    async fn terminate_tagged(&self, stack_type: StackType) -> Result<()> {
        let stacks = self.ctx.stacks.list_stacks(Some(stack_type), self.ctx.namespace()).await?;
        let deletes: Vec<Executor> = stacks
            .into_iter()
            .filter(|stack| stack.tag("environment") == self.name)
            .map(|stack| {
                info!("Terminating {stack_type} '{}' in environment '{}' ...", stack.tag("service"), self.name);
                let stacks = self.ctx.stacks.clone();
                Executor::new(move || async move { delete_and_await(stacks.as_ref(), &stack.name).await })
            })
            .collect();
        parallel(deletes).execute().await
    }

    async fn delete(&self, stack_type: StackType) -> Result<()> {
        let name = self.stack(stack_type);
        info!("Terminating {stack_type} stack '{name}' ...");
        delete_and_await(self.ctx.stacks.as_ref(), &name).await
    }

    async fn delete_rolesets(&self) -> Result<()> {
        let iam = self.ctx.stacks.list_stacks(Some(StackType::Iam), self.ctx.namespace()).await?;
        for stack in iam.iter().filter(|s| s.tag("environment") == self.name) {
            let service = stack.tag("service");
            if !service.is_empty() {
                self.ctx.rolesets.delete_service_roleset(&self.name, service).await?;
            }
        }
        self.ctx.rolesets.delete_environment_roleset(&self.name).await
    }
}

/// Environment stacks of the namespace.
pub async fn list(ctx: &Context) -> Result<Vec<StackSummary>> {
    let stacks = ctx
        .stacks
        .list_stacks(Some(StackType::Environment), ctx.namespace())
        .await?;
    Ok(stacks.iter().map(|stack| StackSummary::new(stack, "environment")).collect())
}

/// A service deployed into an environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployedService {
    pub name: String,
    pub image: String,
    pub status: String,
    pub last_update: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentView {
    pub name: String,
    pub provider: String,
    pub cluster_stack: Stack,
    /// Absent when the network is not managed by the tool.
    pub vpc_stack: Option<Stack>,
    pub base_url: String,
    pub bastion_host: String,
    pub instances: Vec<ContainerInstance>,
    pub services: Vec<DeployedService>,
}

/// Everything known about environment `name`.
pub async fn show(ctx: &Context, name: &str) -> Result<EnvironmentView> {
    let namespace = ctx.namespace();
    let cluster_stack = ctx
        .stacks
        .get_stack(&stack_name(namespace, StackType::Environment, &[name]))
        .await?;

    let mut vpc_stack = ctx
        .stacks
        .await_final_status(&stack_name(namespace, StackType::Vpc, &[name]))
        .await?;
    if vpc_stack.is_none() {
        vpc_stack = ctx
            .stacks
            .await_final_status(&stack_name(namespace, StackType::Target, &[name]))
            .await?;
    }
    let lb_stack = ctx
        .stacks
        .await_final_status(&stack_name(namespace, StackType::LoadBalancer, &[name]))
        .await?;

    let provider = match cluster_stack.output("provider") {
        "" => cluster_stack.tag("provider").to_string(),
        provider => provider.to_string(),
    };

    let instances = match cluster_stack.output("EcsCluster") {
        "" => Vec::new(),
        cluster => ctx.instances.list_instances(cluster).await?,
    };

    let services = ctx
        .stacks
        .list_stacks(Some(StackType::Service), namespace)
        .await?
        .into_iter()
        .filter(|stack| stack.tag("environment") == name)
        .map(|stack| DeployedService {
            name: stack.tag("service").to_string(),
            image: stack.parameters.get("ImageUrl").cloned().unwrap_or_default(),
            status: stack.status.clone(),
            last_update: stack.last_update,
            version: stack.tag("version").to_string(),
        })
        .collect();

    Ok(EnvironmentView {
        name: name.to_string(),
        provider,
        bastion_host: vpc_stack
            .as_ref()
            .map(|s| s.output("BastionHost").to_string())
            .unwrap_or_default(),
        base_url: lb_stack.as_ref().map(|s| s.output("BaseUrl").to_string()).unwrap_or_default(),
        cluster_stack,
        vpc_stack,
        instances,
        services,
    })
}
