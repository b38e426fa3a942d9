//! # Service Workflows
//!
//! Deploys the service of the current repository into an environment, and the
//! operational commands around a deployed service: push, restart, exec, undeploy.
//!
//! Deploy branches on the provider of the target environment:
//!
//! - **ecs / ecs-fargate**: roleset, image repository, `<ns>-service-<svc>-<env>`
//!   stack, then one schedule stack per configured schedule.
//! - **ec2**: code deploy bucket, roleset, CodeDeploy application, then the
//!   service stack pointing at the revision bundle in the bucket.
//! - **eks / eks-fargate**: roleset, image repository, then Kubernetes
//!   resources applied to the environment's cluster.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;
use serde_yaml::{Mapping, Value};
use tokio::sync::Mutex;

use crate::artifact::zip_directory;
use crate::config::{DeploymentStrategy, EnvProvider, Service};
use crate::executor::{Executor, conditional, parallel, sequence};
use crate::kernel::Context;
use crate::kernel::constants::tool_version;
use crate::kernel::error::{Error, Result};
use crate::provider::elb::max_priority;
use crate::provider::pipeline::StageState;
use crate::provider::{ListenerRule, Task};
use crate::stack::{Stack, StackType, StackUpsert, build_tags, stack_name, status};
use crate::templates;
use crate::workflows::{
    WorkflowError, database, delete_and_await, params, resolve_service_name, set_if, set_opt, step,
    upsert_and_await,
};

const DEFAULT_TAG: &str = "latest";
const DEFAULT_DOCKERFILE: &str = "Dockerfile";
const CODE_DEPLOY_BUCKET_PREFIX: &str = "codedeploy";
const REVISION_BUNDLE_TYPE: &str = "zip";
const DATABASE_OUTPUTS: [&str; 4] = [
    "DatabaseName",
    "DatabaseEndpointAddress",
    "DatabaseEndpointPort",
    "DatabaseMasterUsername",
];
const DEFAULT_K8S_PORT: u16 = 8080;
const DEFAULT_K8S_HEALTH_ENDPOINT: &str = "/health";

#[derive(Default)]
struct ServiceState {
    name: String,
    tag: String,
    image: String,
    provider: EnvProvider,
    env_stack: Option<Stack>,
    lb_stack: Option<Stack>,
    cloud_formation_role: String,
    code_deploy_bucket: String,
    app_name: String,
    params: BTreeMap<String, String>,
}

struct ServiceWorkflow {
    ctx: Arc<Context>,
    environment: String,
    state: Mutex<ServiceState>,
}

impl ServiceWorkflow {
    fn new(ctx: Arc<Context>, environment: &str) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            environment: environment.to_string(),
            state: Mutex::new(ServiceState::default()),
        })
    }

    fn namespace(&self) -> &str {
        self.ctx.namespace()
    }

    fn service(&self) -> &Service {
        &self.ctx.config.service
    }

    fn tags(&self, stack_type: StackType, state: &ServiceState) -> BTreeMap<String, String> {
        let repo = &self.ctx.config.repo;
        let mut pairs = vec![("service", state.name.as_str())];
        if matches!(stack_type, StackType::Service | StackType::Schedule) {
            pairs.push(("environment", self.environment.as_str()));
        }
        if stack_type == StackType::Service {
            pairs.push(("provider", state.provider.as_str()));
        }
        pairs.push(("revision", repo.revision.as_str()));
        pairs.push(("repo", repo.slug.as_str()));
        build_tags(stack_type, &pairs)
    }

    /// Resolve the service name and the image tag to deploy.
    async fn load_service(&self, name: &str, tag: &str) -> Result<()> {
        let config = &self.ctx.config;
        let mut state = self.state.lock().await;
        state.name = resolve_service_name(config, name)?;
        state.tag = match tag {
            "" if !config.repo.revision.is_empty() => config.repo.revision.clone(),
            "" => DEFAULT_TAG.to_string(),
            tag => tag.to_string(),
        };
        debug!("Loaded service '{}' at tag '{}'", state.name, state.tag);
        Ok(())
    }

    async fn load_common_role(&self) -> Result<()> {
        let common = self.ctx.rolesets.get_common_roleset().await?;
        self.state.lock().await.cloud_formation_role = common.get("CloudFormationRoleArn").cloned().unwrap_or_default();
        Ok(())
    }

    async fn load_environment(&self) -> Result<()> {
        let stacks = &self.ctx.stacks;
        let env_stack_name = stack_name(self.namespace(), StackType::Environment, &[&self.environment]);
        let env_stack = stacks
            .await_final_status(&env_stack_name)
            .await?
            .ok_or_else(|| WorkflowError::EnvironmentStackMissing {
                stack: env_stack_name.clone(),
                environment: self.environment.clone(),
            })?;
        let lb_stack_name = stack_name(self.namespace(), StackType::LoadBalancer, &[&self.environment]);
        let lb_stack = stacks.await_final_status(&lb_stack_name).await?;
        let provider = self.ctx.rolesets.get_environment_provider(&self.environment).await?;

        let mut state = self.state.lock().await;
        debug!("Deploying into environment '{}' with provider '{provider}'", self.environment);
        state.provider = provider;
        state.env_stack = Some(env_stack);
        state.lb_stack = lb_stack;
        drop(state);
        self.load_common_role().await
    }

    async fn upsert_roleset(&self) -> Result<()> {
        let state = self.state.lock().await;
        let rolesets = &self.ctx.rolesets;
        rolesets.upsert_common_roleset().await?;
        rolesets
            .upsert_service_roleset(
                &self.environment,
                &state.name,
                &state.code_deploy_bucket,
                &self.service().database.name,
            )
            .await
    }

    async fn upsert_repo(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let service = self.service();
        if !service.image_repository.is_empty() {
            info!("Using repo '{}' for service '{}'", service.image_repository, state.name);
            state.image = service.image_repository.clone();
            return Ok(());
        }

        let repo_stack = stack_name(self.namespace(), StackType::Repo, &[&state.name]);
        info!("Upserting repo for service '{}' ...", state.name);
        let upsert = StackUpsert::new(&repo_stack, templates::REPO)
            .parameters(params(&[("RepoName", state.name.as_str())]))
            .tags(self.tags(StackType::Repo, &state))
            .role_arn(&state.cloud_formation_role);
        let stack = upsert_and_await(self.ctx.stacks.as_ref(), upsert).await?;
        state.image = format!("{}:{}", stack.output("RepoUrl"), state.tag);
        Ok(())
    }

    async fn upsert_bucket(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let bucket_stack = stack_name(self.namespace(), StackType::Bucket, &[CODE_DEPLOY_BUCKET_PREFIX]);
        info!("Upserting bucket for CodeDeploy ...");
        let upsert = StackUpsert::new(&bucket_stack, templates::BUCKET)
            .parameters(params(&[
                ("Namespace", self.namespace()),
                ("BucketPrefix", CODE_DEPLOY_BUCKET_PREFIX),
            ]))
            .tags(build_tags(StackType::Bucket, &[]))
            .role_arn(&state.cloud_formation_role);
        let stack = upsert_and_await(self.ctx.stacks.as_ref(), upsert).await?;
        state.code_deploy_bucket = stack.output("Bucket").to_string();
        Ok(())
    }

    async fn upsert_app(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let app_stack = stack_name(self.namespace(), StackType::App, &[&state.name]);
        info!("Upserting CodeDeploy application for service '{}' ...", state.name);
        let upsert = StackUpsert::new(&app_stack, templates::APP)
            .tags(build_tags(StackType::App, &[("service", state.name.as_str())]))
            .role_arn(&state.cloud_formation_role);
        let stack = upsert_and_await(self.ctx.stacks.as_ref(), upsert).await?;
        state.app_name = stack.output("ApplicationName").to_string();
        Ok(())
    }

    /// Highest rule priority on `listener`, 0 when the rules cannot be listed.
    async fn max_priority(&self, listener: &str) -> u32 {
        match self.ctx.elb_rules.list_rules(listener).await {
            Ok(rules) => max_priority(&rules),
            Err(err) => {
                debug!("Unable to list rules of listener '{listener}': {err}");
                0
            }
        }
    }

    async fn check_priorities(&self, listener: &str, priorities: &[u32]) -> Result<()> {
        if listener.is_empty() {
            return Ok(());
        }
        let rules: Vec<ListenerRule> = self.ctx.elb_rules.list_rules(listener).await?;
        match priorities
            .iter()
            .find(|priority| rules.iter().any(|rule| rule.priority == Some(**priority)))
        {
            Some(priority) => Err(WorkflowError::PriorityInUse { priority: *priority }.into()),
            None => Ok(()),
        }
    }

    /// Parameters shared by the ecs and ec2 service templates.
    async fn apply_common_params(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let service = self.service();
        let namespace = self.namespace();
        let env_stack = state.env_stack.as_ref().map(|s| s.name.clone()).unwrap_or_default();

        let mut parameters = params(&[
            ("Namespace", namespace),
            ("EnvironmentName", self.environment.as_str()),
            ("ServiceName", state.name.as_str()),
        ]);
        parameters.insert("VpcId".to_string(), format!("{env_stack}-VpcId"));

        let mut next_priority = 0;
        let mut rule_listener = String::new();
        if let Some(lb) = &state.lb_stack {
            let http = lb.output("ElbHttpListenerArn");
            if !http.is_empty() {
                parameters.insert("ElbHttpListenerArn".to_string(), format!("{}-ElbHttpListenerArn", lb.name));
                next_priority = 1 + self.max_priority(http).await;
                rule_listener = http.to_string();
            }
            let https = lb.output("ElbHttpsListenerArn");
            if !https.is_empty() {
                parameters.insert("ElbHttpsListenerArn".to_string(), format!("{}-ElbHttpsListenerArn", lb.name));
                if rule_listener.is_empty() {
                    next_priority = 1 + self.max_priority(https).await;
                    rule_listener = https.to_string();
                }
            }
        }

        let svc_stack_name = stack_name(namespace, StackType::Service, &[&state.name, &self.environment]);
        let svc_stack = self.ctx.stacks.await_final_status(&svc_stack_name).await?;
        let (path_priority, host_priority) = match service.priority.filter(|p| *p > 0) {
            Some(priority) => {
                if svc_stack.is_none() {
                    self.check_priorities(&rule_listener, &[priority, priority + 1]).await?;
                }
                (priority.to_string(), (priority + 1).to_string())
            }
            // keep the priorities the live stack already holds
            None if svc_stack
                .as_ref()
                .is_some_and(|stack| stack.status != status::ROLLBACK_COMPLETE) =>
            {
                (String::new(), String::new())
            }
            None => (next_priority.to_string(), (next_priority + 1).to_string()),
        };
        parameters.insert("PathListenerRulePriority".to_string(), path_priority);
        parameters.insert("HostListenerRulePriority".to_string(), host_priority);

        set_opt(&mut parameters, "ServicePort", service.port);
        set_if(&mut parameters, "ServiceProtocol", &service.protocol);
        set_if(&mut parameters, "ServiceHealthEndpoint", &service.health_endpoint);
        set_opt(&mut parameters, "ServiceDesiredCount", service.desired_count);
        set_opt(&mut parameters, "ServiceMinSize", service.min_size);
        set_opt(&mut parameters, "ServiceMaxSize", service.max_size);
        set_opt(&mut parameters, "TargetCPUUtilization", service.target_cpu_utilization);
        set_if(&mut parameters, "PathPattern", &service.path_patterns.join(","));
        set_if(&mut parameters, "HostPattern", &service.host_patterns.join(","));

        let db_stack_name = stack_name(namespace, StackType::Database, &[&state.name, &self.environment]);
        if let Some(db_stack) = self.ctx.stacks.await_final_status(&db_stack_name).await? {
            for output in DATABASE_OUTPUTS {
                parameters.insert(output.to_string(), db_stack.output(output).to_string());
            }
            let param_name = database::password_param_name(&self.ctx.config, &db_stack_name);
            match self.ctx.params.get_param(&param_name).await {
                Ok(password) => {
                    parameters.insert("DatabaseMasterPassword".to_string(), password);
                }
                Err(err) => warn!("Unable to get db password: {err}"),
            }
        }

        state.params.extend(parameters);
        Ok(())
    }

    async fn apply_ecs_params(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let service = self.service();
        let roles = self
            .ctx
            .rolesets
            .get_service_roleset(&self.environment, &state.name)
            .await?;
        let role = |key: &str| roles.get(key).cloned().unwrap_or_default();
        let env_stack = state.env_stack.as_ref().map(|s| s.name.clone()).unwrap_or_default();
        let lb_stack = state.lb_stack.as_ref().map(|s| s.name.clone()).unwrap_or_default();
        let fargate = state.provider == EnvProvider::EcsFargate;
        let image = state.image.clone();

        let mut parameters = BTreeMap::new();
        parameters.insert("EcsCluster".to_string(), format!("{env_stack}-EcsCluster"));
        parameters.insert(
            "LaunchType".to_string(),
            if fargate { "FARGATE" } else { "EC2" }.to_string(),
        );
        parameters.insert("ServiceSubnetIds".to_string(), format!("{env_stack}-InstanceSubnetIds"));
        parameters.insert("ServiceSecurityGroup".to_string(), format!("{env_stack}-InstanceSecurityGroup"));
        if !lb_stack.is_empty() {
            parameters.insert("ElbSecurityGroup".to_string(), format!("{lb_stack}-InstanceSecurityGroup"));
            parameters.insert("ServiceDiscoveryId".to_string(), format!("{lb_stack}-ServiceDiscoveryId"));
            parameters.insert("ServiceDiscoveryName".to_string(), format!("{lb_stack}-ServiceDiscoveryName"));
        }
        set_if(&mut parameters, "ServiceDiscoveryTTL", &service.discovery_ttl);
        parameters.insert("ImageUrl".to_string(), image);
        set_opt(&mut parameters, "ServiceCpu", service.cpu);
        set_opt(&mut parameters, "ServiceMemory", service.memory);
        if fargate {
            set_opt(&mut parameters, "TaskCpu", service.cpu);
            set_opt(&mut parameters, "TaskMemory", service.memory);
            parameters.insert("TaskNetworkMode".to_string(), "awsvpc".to_string());
        } else {
            set_if(&mut parameters, "TaskNetworkMode", &service.network_mode);
        }
        set_if(&mut parameters, "Links", &service.links.join(","));
        parameters.insert("AssignPublicIp".to_string(), service.assign_public_ip.to_string());
        set_if(&mut parameters, "EcsServiceRoleArn", &role("EcsServiceRoleArn"));
        set_if(&mut parameters, "EcsTaskRoleArn", &role("EcsTaskRoleArn"));
        set_if(
            &mut parameters,
            "ApplicationAutoScalingRoleArn",
            &role("ApplicationAutoScalingRoleArn"),
        );

        let (min_healthy, max_percent) = match service.deployment_strategy {
            DeploymentStrategy::BlueGreen => ("100", "200"),
            DeploymentStrategy::Replace => ("0", "100"),
            DeploymentStrategy::Rolling => ("50", "100"),
        };
        parameters.insert("MinimumHealthyPercent".to_string(), min_healthy.to_string());
        parameters.insert("MaximumPercent".to_string(), max_percent.to_string());

        state.params.extend(parameters);
        Ok(())
    }

    async fn apply_ec2_params(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let roles = self
            .ctx
            .rolesets
            .get_service_roleset(&self.environment, &state.name)
            .await?;
        let env_roles = self.ctx.rolesets.get_environment_roleset(&self.environment).await?;
        let Some(env_stack) = state.env_stack.clone() else {
            return Ok(());
        };

        let mut parameters = BTreeMap::new();
        for output in [
            "SshAllow",
            "InstanceType",
            "ImageId",
            "ImageOsType",
            "KeyName",
            "HttpProxy",
            "ElbSecurityGroup",
            "InstanceSecurityGroup",
        ] {
            set_if(&mut parameters, output, env_stack.output(output));
        }
        if let Some(subnets) = env_stack.parameters.get("InstanceSubnetIds") {
            set_if(&mut parameters, "InstanceSubnetIds", subnets);
        }
        parameters.insert("AppName".to_string(), state.app_name.clone());
        parameters.insert("RevisionBucket".to_string(), state.code_deploy_bucket.clone());
        parameters.insert("RevisionKey".to_string(), format!("{}/{}.zip", state.name, state.tag));
        parameters.insert("RevisionBundleType".to_string(), REVISION_BUNDLE_TYPE.to_string());
        set_if(
            &mut parameters,
            "CodeDeployRoleArn",
            roles.get("CodeDeployRoleArn").map(String::as_str).unwrap_or_default(),
        );
        set_if(
            &mut parameters,
            "EC2InstanceProfileArn",
            env_roles.get("EC2InstanceProfileArn").map(String::as_str).unwrap_or_default(),
        );

        state.params.extend(parameters);
        Ok(())
    }

    async fn upsert_service(&self, template: &str) -> Result<()> {
        let state = self.state.lock().await;
        let svc_stack = stack_name(self.namespace(), StackType::Service, &[&state.name, &self.environment]);
        info!(
            "Deploying service '{}' to '{}' from '{}'",
            state.name,
            self.environment,
            if state.image.is_empty() { &state.tag } else { &state.image }
        );
        let data = json!({ "environment": self.service().environment_for(&self.environment) });
        let upsert = StackUpsert::new(&svc_stack, template)
            .data(data)
            .parameters(state.params.clone())
            .tags(self.tags(StackType::Service, &state))
            .role_arn(&state.cloud_formation_role);
        upsert_and_await(self.ctx.stacks.as_ref(), upsert).await?;
        Ok(())
    }

    async fn upsert_schedules(&self) -> Result<()> {
        let state = self.state.lock().await;
        let schedules = &self.service().schedule;
        if schedules.is_empty() {
            return Ok(());
        }

        let svc_stack_name = stack_name(self.namespace(), StackType::Service, &[&state.name, &self.environment]);
        let svc_stack = self.ctx.stacks.get_stack(&svc_stack_name).await?;
        let roles = self
            .ctx
            .rolesets
            .get_service_roleset(&self.environment, &state.name)
            .await?;
        let env_stack = state.env_stack.as_ref().map(|s| s.name.clone()).unwrap_or_default();

        let mut upserts = Vec::with_capacity(schedules.len());
        for schedule in schedules {
            let name = stack_name(
                self.namespace(),
                StackType::Schedule,
                &[&state.name, &schedule.name.to_lowercase(), &self.environment],
            );
            let command = serde_json::to_string(&schedule.command)
                .map_err(|e| Error::serialization("schedule command", e))?;
            let mut parameters = params(&[
                ("ServiceName", state.name.as_str()),
                ("MicroserviceTaskDefinitionArn", svc_stack.output("MicroserviceTaskDefinitionArn")),
                ("ScheduleExpression", schedule.expression.as_str()),
                ("ScheduleCommand", command.as_str()),
            ]);
            parameters.insert("EcsCluster".to_string(), format!("{env_stack}-EcsCluster"));
            set_if(
                &mut parameters,
                "EcsEventsRoleArn",
                roles.get("EcsEventsRoleArn").map(String::as_str).unwrap_or_default(),
            );

            info!("Upserting schedule '{}' for service '{}' ...", schedule.name, state.name);
            let upsert = StackUpsert::new(&name, templates::SCHEDULE)
                .parameters(parameters)
                .tags(self.tags(StackType::Schedule, &state))
                .role_arn(&state.cloud_formation_role);
            let stacks = self.ctx.stacks.clone();
            upserts.push(Executor::new(move || async move {
                upsert_and_await(stacks.as_ref(), upsert).await.map(|_| ())
            }));
        }
        drop(state);
        parallel(upserts).execute().await
    }

    async fn deploy_kubernetes(&self) -> Result<()> {
        let state = self.state.lock().await;
        let service = self.service();
        let Some(env_stack) = &state.env_stack else {
            return Ok(());
        };
        let cluster = env_stack.output("EksCluster");
        let namespace = stack_name(self.namespace(), StackType::Service, &[&state.name]);

        let mut secret_name = String::new();
        let db_stack_name = stack_name(self.namespace(), StackType::Database, &[&state.name, &self.environment]);
        if let Some(db_stack) = self.ctx.stacks.await_final_status(&db_stack_name).await? {
            secret_name = format!("{}-database", state.name);
            let mut secret = BTreeMap::new();
            for output in DATABASE_OUTPUTS {
                secret.insert(output.to_string(), STANDARD.encode(db_stack.output(output)));
            }
            let param_name = database::password_param_name(&self.ctx.config, &db_stack_name);
            match self.ctx.params.get_param(&param_name).await {
                Ok(password) => {
                    secret.insert("DatabaseMasterPassword".to_string(), STANDARD.encode(password));
                }
                Err(err) => warn!("Unable to get db password: {err}"),
            }
            let manifest = templates::render(
                templates::KUBERNETES_DATABASE,
                &json!({ "Namespace": namespace, "SecretName": secret_name, "Data": secret }),
            )?;
            self.apply_manifest(cluster, &manifest).await?;
        }

        let (max_unavailable, max_surge) = match service.deployment_strategy {
            DeploymentStrategy::BlueGreen => (0, 100),
            DeploymentStrategy::Rolling => (50, 0),
            DeploymentStrategy::Replace => (100, 0),
        };
        let path_patterns: Vec<String> = service
            .path_patterns
            .iter()
            .map(|p| p.trim_end_matches('*').to_string())
            .collect();
        let health_endpoint = match service.health_endpoint.as_str() {
            "" => DEFAULT_K8S_HEALTH_ENDPOINT,
            endpoint => endpoint,
        };
        let health_proto = match service.protocol.as_str() {
            "" => "HTTP",
            protocol => protocol,
        };
        let mut data = json!({
            "Namespace": namespace,
            "ServiceName": state.name,
            "Revision": self.ctx.config.repo.revision,
            "MuVersion": tool_version(),
            "MaxUnavailable": max_unavailable,
            "MaxSurge": max_surge,
            "ImageUrl": state.image,
            "ServicePort": service.port.unwrap_or(DEFAULT_K8S_PORT),
            "ServiceHealthEndpoint": health_endpoint,
            "ServiceHealthProto": health_proto,
            "EnvVariables": service.environment_for(&self.environment),
            "DatabaseSecretName": secret_name,
            "PathPatterns": path_patterns,
            "HostPatterns": service.host_patterns,
        });
        if let Some(count) = service.desired_count {
            data["DesiredCount"] = json!(count);
        }

        info!(
            "Deploying service '{}' to '{}' from '{}'",
            state.name, self.environment, state.image
        );
        let manifest = templates::render(templates::KUBERNETES_DEPLOYMENT, &data)?;
        self.apply_manifest(cluster, &manifest).await
    }

    async fn apply_manifest(&self, cluster: &str, manifest: &str) -> Result<()> {
        if self.ctx.dryrun {
            info!("  DRYRUN: Skipping apply of kubernetes resources to cluster '{cluster}'");
            debug!("{manifest}");
            return Ok(());
        }
        self.ctx.kubernetes.upsert_resources(cluster, manifest).await
    }

    async fn undeploy(&self) -> Result<()> {
        let state = self.state.lock().await;
        let namespace = self.namespace();
        let provider = match self.ctx.rolesets.get_environment_provider(&self.environment).await {
            Ok(provider) => provider,
            Err(err) => {
                debug!("Unable to determine provider of environment '{}': {err}", self.environment);
                EnvProvider::default()
            }
        };

        if provider.is_eks() {
            let env_stack_name = stack_name(namespace, StackType::Environment, &[&self.environment]);
            let env_stack = self.ctx.stacks.get_stack(&env_stack_name).await?;
            let k8s_namespace = stack_name(namespace, StackType::Service, &[&state.name]);
            info!("Undeploying service '{}' from '{}' ...", state.name, self.environment);
            if self.ctx.dryrun {
                info!("  DRYRUN: Skipping delete of kubernetes namespace '{k8s_namespace}'");
                return Ok(());
            }
            return self
                .ctx
                .kubernetes
                .delete_namespace(env_stack.output("EksCluster"), &k8s_namespace)
                .await;
        }

        let schedules = self
            .ctx
            .stacks
            .list_stacks(Some(StackType::Schedule), namespace)
            .await?;
        for schedule in schedules
            .iter()
            .filter(|s| s.tag("service") == state.name && s.tag("environment") == self.environment)
        {
            info!("Deleting schedule stack '{}' ...", schedule.name);
            delete_and_await(self.ctx.stacks.as_ref(), &schedule.name).await?;
        }

        let svc_stack = stack_name(namespace, StackType::Service, &[&state.name, &self.environment]);
        info!("Undeploying service '{}' from '{}' ...", state.name, self.environment);
        delete_and_await(self.ctx.stacks.as_ref(), &svc_stack).await
    }

    fn dockerfile(&self) -> &str {
        match self.service().dockerfile.as_str() {
            "" => DEFAULT_DOCKERFILE,
            dockerfile => dockerfile,
        }
    }

    /// Whether `service push` builds an image rather than an archive.
    fn pushes_image(&self) -> bool {
        match self.service().provider.as_str() {
            "ecr" => true,
            "s3" => false,
            _ => self.ctx.config.basedir.join(self.dockerfile()).exists(),
        }
    }

    async fn push_image(&self) -> Result<()> {
        let state = self.state.lock().await;
        let basedir = &self.ctx.config.basedir;
        if self.ctx.dryrun {
            info!("  DRYRUN: Skipping build and push of image '{}'", state.image);
            return Ok(());
        }
        info!("Building image '{}' from '{}' ...", state.image, basedir.display());
        self.ctx
            .images
            .build_image(basedir, self.dockerfile(), std::slice::from_ref(&state.image))
            .await?;
        let auth = self.ctx.repositories.authenticate_repository(&state.image).await?;
        info!("Pushing image '{}' ...", state.image);
        self.ctx.images.push_image(&state.image, &auth).await
    }

    async fn push_bundle(&self) -> Result<()> {
        let state = self.state.lock().await;
        let bundle = zip_directory(&self.ctx.config.basedir)?;
        let uri = format!("s3://{}/{}/{}.zip", state.code_deploy_bucket, state.name, state.tag);
        info!("Pushing archive '{uri}' ...");
        self.ctx
            .artifacts
            .create_artifact(bundle, &uri, &self.service().pipeline.kms_key)
            .await
    }

    async fn running_tasks(&self, name: &str) -> Result<Vec<Task>> {
        self.ctx
            .tasks
            .list_tasks(self.namespace(), &self.environment, name)
            .await
    }

    /// Stop tasks `batch_size` at a time, waiting for the service to replace each batch.
    async fn restart(&self, batch_size: usize) -> Result<()> {
        let name = self.state.lock().await.name.clone();
        let tasks = self.running_tasks(&name).await?;
        let total = tasks.len();
        let batch_size = batch_size.max(1);
        info!("Restarting {total} tasks of service '{name}' in '{}' ...", self.environment);

        for (index, task) in tasks.iter().enumerate() {
            info!("  Stopping task '{}'", task.name);
            if let Err(err) = self
                .ctx
                .tasks
                .stop_task(self.namespace(), &self.environment, &task.name)
                .await
            {
                warn!("Unable to stop task '{}': {err}", task.name);
            }
            if (index + 1) % batch_size == 0 || index + 1 == total {
                self.await_task_count(&name, total).await?;
            }
        }
        Ok(())
    }

    async fn await_task_count(&self, name: &str, expected: usize) -> Result<()> {
        loop {
            let running = self.running_tasks(name).await?.len();
            if running >= expected {
                return Ok(());
            }
            debug!("Waiting for service '{name}' to reach {expected} tasks, {running} running");
            tokio::time::sleep(self.ctx.poll_interval).await;
        }
    }

    async fn exec(&self, command: Vec<String>) -> Result<()> {
        let name = self.state.lock().await.name.clone();
        let task = Task {
            environment: self.environment.clone(),
            service: name.clone(),
            command,
            ..Task::default()
        };
        info!("Running command for service '{name}' in '{}' ...", self.environment);
        let result = self.ctx.tasks.execute_command(self.namespace(), task).await?;
        for arn in &result.task_arns {
            info!("  Started task '{arn}'");
        }
        if !result.failures.is_empty() {
            return Err(Error::Other(format!(
                "Unable to run command for service '{name}': {}",
                result.failures.join(", ")
            )));
        }
        Ok(())
    }
}

/// Deploy the service of the current config into `environment` at image `tag`.
/// An empty tag resolves to the repository revision, else `latest`.
pub fn deployer(ctx: Arc<Context>, environment: &str, tag: &str) -> Executor {
    let workflow = ServiceWorkflow::new(ctx, environment);
    let tag = tag.to_string();

    let ecs = sequence(vec![
        step(&workflow, |w| async move { w.upsert_roleset().await }),
        step(&workflow, |w| async move { w.upsert_repo().await }),
        step(&workflow, |w| async move { w.apply_common_params().await }),
        step(&workflow, |w| async move { w.apply_ecs_params().await }),
        step(&workflow, |w| async move { w.upsert_service(templates::SERVICE_ECS).await }),
        step(&workflow, |w| async move { w.upsert_schedules().await }),
    ]);
    let ec2 = sequence(vec![
        step(&workflow, |w| async move { w.upsert_bucket().await }),
        step(&workflow, |w| async move { w.upsert_roleset().await }),
        step(&workflow, |w| async move { w.upsert_app().await }),
        step(&workflow, |w| async move { w.apply_common_params().await }),
        step(&workflow, |w| async move { w.apply_ec2_params().await }),
        step(&workflow, |w| async move { w.upsert_service(templates::SERVICE_EC2).await }),
    ]);
    let eks = sequence(vec![
        step(&workflow, |w| async move { w.upsert_roleset().await }),
        step(&workflow, |w| async move { w.upsert_repo().await }),
        step(&workflow, |w| async move { w.deploy_kubernetes().await }),
    ]);

    let is_eks = {
        let w = workflow.clone();
        move || async move { w.state.lock().await.provider.is_eks() }
    };
    let is_ec2 = {
        let w = workflow.clone();
        move || async move { w.state.lock().await.provider == EnvProvider::Ec2 }
    };

    sequence(vec![
        step(&workflow, move |w| async move { w.load_service("", &tag).await }),
        step(&workflow, |w| async move { w.load_environment().await }),
        conditional(is_eks, eks, Some(conditional(is_ec2, ec2, Some(ecs)))),
    ])
}

/// Remove service `name` (empty for the config's service) from `environment`.
pub fn undeployer(ctx: Arc<Context>, environment: &str, name: &str) -> Executor {
    let workflow = ServiceWorkflow::new(ctx, environment);
    let name = name.to_string();
    sequence(vec![
        step(&workflow, move |w| async move { w.load_service(&name, "").await }),
        step(&workflow, |w| async move { w.undeploy().await }),
    ])
}

/// Build and publish the service artifact at `tag`: an image when the service
/// has a Dockerfile (or provider `ecr`), otherwise a zip of the source tree.
pub fn pusher(ctx: Arc<Context>, tag: &str) -> Executor {
    let workflow = ServiceWorkflow::new(ctx, "");
    let tag = tag.to_string();

    let image = sequence(vec![
        step(&workflow, |w| async move { w.upsert_repo().await }),
        step(&workflow, |w| async move { w.push_image().await }),
    ]);
    let bundle = sequence(vec![
        step(&workflow, |w| async move { w.upsert_bucket().await }),
        step(&workflow, |w| async move { w.push_bundle().await }),
    ]);
    let pushes_image = {
        let w = workflow.clone();
        move || async move { w.pushes_image() }
    };

    sequence(vec![
        step(&workflow, move |w| async move { w.load_service("", &tag).await }),
        step(&workflow, |w| async move { w.load_common_role().await }),
        conditional(pushes_image, image, Some(bundle)),
    ])
}

/// Restart the running tasks of service `name` in `environment`, `batch_size` at a time.
pub fn restarter(ctx: Arc<Context>, environment: &str, name: &str, batch_size: usize) -> Executor {
    let workflow = ServiceWorkflow::new(ctx, environment);
    let name = name.to_string();
    sequence(vec![
        step(&workflow, move |w| async move { w.load_service(&name, "").await }),
        step(&workflow, move |w| async move { w.restart(batch_size).await }),
    ])
}

/// Run `command` as a one-off task of service `name` in `environment`.
pub fn executor(ctx: Arc<Context>, environment: &str, name: &str, command: Vec<String>) -> Executor {
    let workflow = ServiceWorkflow::new(ctx, environment);
    let name = name.to_string();
    sequence(vec![
        step(&workflow, move |w| async move { w.load_service(&name, "").await }),
        step(&workflow, move |w| async move { w.exec(command).await }),
    ])
}

/// Write `KEY=VALUE` settings into `service.environment` of the config file at
/// `path`, scoped to `environment`.
pub fn setenv(path: &Path, environment: &str, settings: &[String]) -> Result<()> {
    let body = fs::read_to_string(path).map_err(|e| Error::io(e, "read config", path))?;
    let mut root: Value = serde_yaml::from_str(&body).map_err(|e| Error::serialization("YAML config", e))?;

    let mut updates = Vec::with_capacity(settings.len());
    for setting in settings {
        let (key, value) = setting
            .split_once('=')
            .filter(|(key, _)| !key.trim().is_empty())
            .ok_or_else(|| WorkflowError::InvalidSetting {
                setting: setting.clone(),
            })?;
        updates.push((key.trim().to_string(), value.to_string()));
    }

    let variables = mapping_entry(mapping_entry(&mut root, "service"), "environment");
    for (key, value) in updates {
        let entry = mapping_entry(variables, &key);
        if let Value::Mapping(values) = entry {
            values.insert(Value::from(environment), Value::from(value));
        }
        info!("Set '{key}' for environment '{environment}'");
    }

    let body = serde_yaml::to_string(&root).map_err(|e| Error::serialization("YAML config", e))?;
    fs::write(path, body).map_err(|e| Error::io(e, "write config", path))
}

/// The mapping under `key`, replacing whatever non-mapping value is there.
fn mapping_entry<'a>(value: &'a mut Value, key: &str) -> &'a mut Value {
    if !value.is_mapping() {
        *value = Value::Mapping(Mapping::new());
    }
    let entry = &mut value[key];
    if !entry.is_mapping() {
        *entry = Value::Mapping(Mapping::new());
    }
    entry
}

/// One environment a service is deployed into.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceDeployment {
    pub environment: String,
    pub stack: String,
    pub image: String,
    pub status: String,
    pub status_reason: String,
    pub last_update: DateTime<Utc>,
    pub version: String,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceView {
    pub name: String,
    pub pipeline_url: String,
    pub pipeline_stages: Vec<StageState>,
    pub deployments: Vec<ServiceDeployment>,
}

/// Pipeline state and deployments of service `name` (empty for the config's service).
pub async fn show(ctx: &Context, name: &str) -> Result<ServiceView> {
    let name = resolve_service_name(&ctx.config, name)?;
    let namespace = ctx.namespace();

    let pipeline_stack = ctx
        .stacks
        .await_final_status(&stack_name(namespace, StackType::Pipeline, &[&name]))
        .await?;
    let (pipeline_url, pipeline_stages) = match pipeline_stack {
        Some(stack) => {
            let stages = ctx.pipelines.list_state(&stack.name).await.unwrap_or_else(|err| {
                debug!("Unable to get state of pipeline '{}': {err}", stack.name);
                Vec::new()
            });
            (stack.output("CodePipelineUrl").to_string(), stages)
        }
        None => (String::new(), Vec::new()),
    };

    let stacks = ctx.stacks.list_stacks(Some(StackType::Service), namespace).await?;
    let mut deployments = Vec::new();
    for stack in stacks.iter().filter(|s| s.tag("service") == name) {
        let environment = stack.tag("environment").to_string();
        let tasks = ctx
            .tasks
            .list_tasks(namespace, &environment, &name)
            .await
            .unwrap_or_else(|err| {
                debug!("Unable to list tasks of service '{name}' in '{environment}': {err}");
                Vec::new()
            });
        deployments.push(ServiceDeployment {
            stack: stack.name.clone(),
            image: stack.parameters.get("ImageUrl").cloned().unwrap_or_default(),
            status: stack.status.clone(),
            status_reason: stack.status_reason.clone(),
            last_update: stack.last_update,
            version: stack.tag("version").to_string(),
            environment,
            tasks,
        });
    }

    Ok(ServiceView {
        name,
        pipeline_url,
        pipeline_stages,
        deployments,
    })
}
