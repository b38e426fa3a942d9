//! # Roleset Manager
//!
//! Access roles are provisioned by four IAM stacks, one per scope:
//!
//! | scope       | stack                                | template       |
//! |-------------|--------------------------------------|----------------|
//! | common      | `<ns>-iam-common`                    | `common-iam`   |
//! | environment | `<ns>-iam-environment-<env>`         | `env-iam`      |
//! | service     | `<ns>-iam-service-<svc>-<env>`       | `service-iam`  |
//! | pipeline    | `<ns>-iam-pipeline-<svc>`            | `pipeline-iam` |
//!
//! A [`Roleset`] is the outputs map of one of those stacks, with any role ARN
//! named in the config layered on top. When IAM management is disabled in the
//! config, upserts and deletes do nothing and getters only return the overrides.
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::config::{Config, EnvProvider};
use crate::kernel::error::{Error, Result};
use crate::stack::{
    StackManager, StackSystemError, StackType, StackUpsert, build_tags, check_deleted, check_upserted, stack_name,
};
use crate::templates;

/// Role purpose (output name) to role ARN.
pub type Roleset = BTreeMap<String, String>;

const IN_PROGRESS_UPDATE: &str = "_IN_PROGRESS state and can not be updated";

#[async_trait]
pub trait RolesetManager: Send + Sync {
    async fn get_common_roleset(&self) -> Result<Roleset>;

    async fn get_environment_roleset(&self, environment: &str) -> Result<Roleset>;

    async fn get_service_roleset(&self, environment: &str, service: &str) -> Result<Roleset>;

    async fn get_pipeline_roleset(&self, service: &str) -> Result<Roleset>;

    async fn upsert_common_roleset(&self) -> Result<()>;

    async fn upsert_environment_roleset(&self, environment: &str) -> Result<()>;

    async fn upsert_service_roleset(
        &self,
        environment: &str,
        service: &str,
        code_deploy_bucket: &str,
        database_name: &str,
    ) -> Result<()>;

    async fn upsert_pipeline_roleset(&self, service: &str, pipeline_bucket: &str, code_deploy_bucket: &str)
    -> Result<()>;

    async fn delete_common_roleset(&self) -> Result<()>;

    async fn delete_environment_roleset(&self, environment: &str) -> Result<()>;

    async fn delete_service_roleset(&self, environment: &str, service: &str) -> Result<()>;

    async fn delete_pipeline_roleset(&self, service: &str) -> Result<()>;

    /// Provider of `environment`, from the config or else the `provider` tag of its stack.
    async fn get_environment_provider(&self, environment: &str) -> Result<EnvProvider>;
}

/// Roleset manager backed by IAM stacks.
pub struct StackRolesetManager {
    config: Arc<Config>,
    stacks: Arc<dyn StackManager>,
}

fn override_role(roleset: &mut Roleset, role: &str, arn: &str) {
    if !arn.is_empty() {
        roleset.insert(role.to_string(), arn.to_string());
    }
}

fn params(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

impl StackRolesetManager {
    pub fn new(config: Arc<Config>, stacks: Arc<dyn StackManager>) -> Self {
        Self { config, stacks }
    }

    fn iam_stack_name(&self, parts: &[&str]) -> String {
        stack_name(&self.config.namespace, StackType::Iam, parts)
    }

    async fn roleset_from_stack(&self, parts: &[&str]) -> Result<Roleset> {
        let name = self.iam_stack_name(parts);
        Ok(self
            .stacks
            .await_final_status(&name)
            .await?
            .map(|stack| stack.outputs)
            .unwrap_or_default())
    }

    async fn upsert_and_await(&self, upsert: StackUpsert) -> Result<()> {
        let name = upsert.name.clone();
        self.stacks.upsert_stack(upsert).await?;
        debug!("Waiting for stack '{name}' to complete");
        let stack = self.stacks.await_final_status(&name).await?;
        check_upserted(&name, stack).map(|_| ())
    }

    async fn delete_and_await(&self, name: &str) -> Result<()> {
        self.stacks.delete_stack(name).await?;
        debug!("Waiting for stack '{name}' to complete");
        let stack = self.stacks.await_final_status(name).await?;
        check_deleted(stack)
    }

    fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
        serde_json::to_value(value).map_err(|e| Error::serialization("template data", e))
    }
}

#[async_trait]
impl RolesetManager for StackRolesetManager {
    async fn get_common_roleset(&self) -> Result<Roleset> {
        let mut roleset = self.roleset_from_stack(&["common"]).await?;
        override_role(&mut roleset, "CloudFormationRoleArn", &self.config.roles.cloud_formation);
        Ok(roleset)
    }

    async fn get_environment_roleset(&self, environment: &str) -> Result<Roleset> {
        let mut roleset = self.roleset_from_stack(&["environment", environment]).await?;
        if let Ok(env) = self.config.environment(environment) {
            override_role(&mut roleset, "EC2InstanceProfileArn", &env.roles.ecs_instance);
            override_role(&mut roleset, "EksServiceRoleArn", &env.roles.eks_service);
        }
        Ok(roleset)
    }

    async fn get_service_roleset(&self, environment: &str, service: &str) -> Result<Roleset> {
        let mut roleset = self.roleset_from_stack(&["service", service, environment]).await?;
        let svc = &self.config.service;
        override_role(&mut roleset, "DatabaseKeyArn", &svc.database.kms_key);
        override_role(&mut roleset, "EC2InstanceProfileArn", &svc.roles.ec2_instance);
        override_role(&mut roleset, "CodeDeployRoleArn", &svc.roles.code_deploy);
        override_role(&mut roleset, "EcsEventsRoleArn", &svc.roles.ecs_events);
        override_role(&mut roleset, "EcsServiceRoleArn", &svc.roles.ecs_service);
        override_role(&mut roleset, "EcsTaskRoleArn", &svc.roles.ecs_task);
        override_role(
            &mut roleset,
            "ApplicationAutoScalingRoleArn",
            &svc.roles.application_auto_scaling,
        );
        Ok(roleset)
    }

    async fn get_pipeline_roleset(&self, service: &str) -> Result<Roleset> {
        let mut roleset = self.roleset_from_stack(&["pipeline", service]).await?;
        let pipeline = &self.config.service.pipeline;
        override_role(&mut roleset, "CodePipelineKeyArn", &pipeline.kms_key);
        override_role(&mut roleset, "CodePipelineRoleArn", &pipeline.roles.pipeline);
        override_role(&mut roleset, "CodeBuildCIRoleArn", &pipeline.roles.build);
        override_role(&mut roleset, "CodeBuildCDAcptRoleArn", &pipeline.acceptance.roles.code_build);
        override_role(&mut roleset, "CodeBuildCDProdRoleArn", &pipeline.production.roles.code_build);
        override_role(&mut roleset, "MuAcptRoleArn", &pipeline.acceptance.roles.mu);
        override_role(&mut roleset, "MuProdRoleArn", &pipeline.production.roles.mu);
        Ok(roleset)
    }

    async fn upsert_common_roleset(&self) -> Result<()> {
        if self.config.disable_iam {
            info!("Skipping upsert of common IAM roles.");
            return Ok(());
        }
        info!("Upserting IAM resources");
        let name = self.iam_stack_name(&["common"]);
        let upsert = StackUpsert::new(&name, templates::COMMON_IAM)
            .parameters(params(&[("Namespace", self.config.namespace.as_str())]))
            .tags(build_tags(StackType::Iam, &[]));

        if let Err(err) = self.stacks.upsert_stack(upsert).await {
            if !err.to_string().contains(IN_PROGRESS_UPDATE) {
                return Err(err);
            }
            debug!("Stack '{name}' is already being updated");
        }

        debug!("Waiting for stack '{name}' to complete");
        let stack = self.stacks.await_final_status(&name).await?;
        check_upserted(&name, stack)?;
        self.stacks.set_termination_protection(&name, true).await
    }

    async fn upsert_environment_roleset(&self, environment: &str) -> Result<()> {
        if self.config.disable_iam {
            info!("Skipping upsert of environment IAM roles.");
            return Ok(());
        }
        let Ok(env) = self.config.environment(environment) else {
            warn!("unable to find environment named '{environment}' in configuration...skipping IAM roles");
            return Ok(());
        };

        let provider = env.provider.as_str();
        let config = &self.config;
        let upsert = StackUpsert::new(self.iam_stack_name(&["environment", environment]), templates::ENV_IAM)
            .data(Self::to_json(env)?)
            .parameters(params(&[
                ("Namespace", config.namespace.as_str()),
                ("EnvironmentName", environment),
                ("Provider", provider),
            ]))
            .tags(build_tags(
                StackType::Iam,
                &[
                    ("environment", environment),
                    ("provider", provider),
                    ("revision", config.repo.revision.as_str()),
                    ("repo", config.repo.name.as_str()),
                ],
            ));
        self.upsert_and_await(upsert).await
    }

    async fn upsert_service_roleset(
        &self,
        environment: &str,
        service: &str,
        code_deploy_bucket: &str,
        database_name: &str,
    ) -> Result<()> {
        if self.config.disable_iam {
            info!("Skipping upsert of service IAM roles.");
            return Ok(());
        }
        let provider = self.get_environment_provider(environment).await?;
        let config = &self.config;

        let mut parameters = params(&[
            ("Namespace", config.namespace.as_str()),
            ("EnvironmentName", environment),
            ("ServiceName", service),
            ("Provider", provider.as_str()),
            ("CodeDeployBucket", code_deploy_bucket),
        ]);
        if !database_name.is_empty() {
            parameters.insert("DatabaseName".to_string(), database_name.to_string());
        }

        let upsert = StackUpsert::new(self.iam_stack_name(&["service", service, environment]), templates::SERVICE_IAM)
            .data(Self::to_json(&config.service)?)
            .parameters(parameters)
            .tags(build_tags(
                StackType::Iam,
                &[
                    ("environment", environment),
                    ("provider", provider.as_str()),
                    ("service", service),
                    ("revision", config.repo.revision.as_str()),
                    ("repo", config.repo.name.as_str()),
                ],
            ))
            .policy(templates::policy(templates::POLICY_DEFAULT)?);
        self.upsert_and_await(upsert).await
    }

    async fn upsert_pipeline_roleset(
        &self,
        service: &str,
        pipeline_bucket: &str,
        code_deploy_bucket: &str,
    ) -> Result<()> {
        if self.config.disable_iam {
            info!("Skipping upsert of pipeline IAM roles.");
            return Ok(());
        }
        let config = &self.config;
        let pipeline = &config.service.pipeline;

        let mut parameters = params(&[
            ("Namespace", config.namespace.as_str()),
            ("ServiceName", service),
            ("SourceProvider", pipeline.source.provider.as_str()),
            ("SourceRepo", pipeline.source.repo.as_str()),
            ("PipelineBucket", pipeline_bucket),
            ("CodeDeployBucket", code_deploy_bucket),
        ]);
        if pipeline.source.provider == "S3" {
            let (bucket, key) = pipeline.source.repo.split_once('/').unwrap_or((pipeline.source.repo.as_str(), ""));
            parameters.insert("SourceBucket".to_string(), bucket.to_string());
            parameters.insert("SourceObjectKey".to_string(), key.to_string());
        }
        if !pipeline.acceptance.environment.is_empty() {
            parameters.insert("AcptEnv".to_string(), pipeline.acceptance.environment.clone());
        }
        if !pipeline.production.environment.is_empty() {
            parameters.insert("ProdEnv".to_string(), pipeline.production.environment.clone());
        }
        parameters.insert("EnableBuildStage".to_string(), (!pipeline.build.disabled).to_string());
        parameters.insert("EnableAcptStage".to_string(), (!pipeline.acceptance.disabled).to_string());
        parameters.insert("EnableProdStage".to_string(), (!pipeline.production.disabled).to_string());

        let common = self.get_common_roleset().await?;
        let cfn_role = common.get("CloudFormationRoleArn").cloned().unwrap_or_default();
        parameters.insert("AcptCloudFormationRoleArn".to_string(), cfn_role.clone());
        parameters.insert("ProdCloudFormationRoleArn".to_string(), cfn_role);

        let upsert = StackUpsert::new(self.iam_stack_name(&["pipeline", service]), templates::PIPELINE_IAM)
            .data(Self::to_json(pipeline)?)
            .parameters(parameters)
            .tags(build_tags(
                StackType::Iam,
                &[
                    ("service", service),
                    ("revision", config.repo.revision.as_str()),
                    ("repo", config.repo.name.as_str()),
                ],
            ))
            .policy(templates::policy(templates::POLICY_DEFAULT)?);
        self.upsert_and_await(upsert).await
    }

    async fn delete_common_roleset(&self) -> Result<()> {
        if self.config.disable_iam {
            info!("Skipping delete of common IAM roles.");
            return Ok(());
        }
        let name = self.iam_stack_name(&["common"]);
        if self.stacks.await_final_status(&name).await?.is_none() {
            debug!("Common IAM stack '{name}' is already absent");
            return Ok(());
        }
        self.stacks.set_termination_protection(&name, false).await?;
        self.delete_and_await(&name).await
    }

    async fn delete_environment_roleset(&self, environment: &str) -> Result<()> {
        if self.config.disable_iam {
            info!("Skipping delete of environment IAM roles.");
            return Ok(());
        }
        self.delete_and_await(&self.iam_stack_name(&["environment", environment]))
            .await
    }

    async fn delete_service_roleset(&self, environment: &str, service: &str) -> Result<()> {
        if self.config.disable_iam {
            info!("Skipping delete of service IAM roles.");
            return Ok(());
        }
        self.delete_and_await(&self.iam_stack_name(&["service", service, environment]))
            .await
    }

    async fn delete_pipeline_roleset(&self, service: &str) -> Result<()> {
        if self.config.disable_iam {
            info!("Skipping delete of pipeline IAM roles.");
            return Ok(());
        }
        self.delete_and_await(&self.iam_stack_name(&["pipeline", service])).await
    }

    async fn get_environment_provider(&self, environment: &str) -> Result<EnvProvider> {
        if let Ok(env) = self.config.environment(environment) {
            return Ok(env.provider);
        }
        debug!("unable to find environment named '{environment}' in configuration...checking for existing stack");
        let env_stack_name = stack_name(&self.config.namespace, StackType::Environment, &[environment]);
        let stack = self
            .stacks
            .await_final_status(&env_stack_name)
            .await?
            .ok_or(StackSystemError::StackNotFound { stack: env_stack_name })?;
        match stack.tag("provider") {
            "" => Ok(EnvProvider::default()),
            provider => provider.parse(),
        }
    }
}
