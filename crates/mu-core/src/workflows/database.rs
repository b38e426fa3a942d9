//! # Database Workflows
//!
//! One `<ns>-database-<svc>-<env>` stack per service and environment. The
//! master password lives in the parameter store under
//! `<stack>-DatabaseMasterPassword` (or the name configured in
//! `service.database.masterPasswordSSMParam`), encrypted with the key of the
//! service roleset.
use std::sync::Arc;

use log::{debug, info};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::executor::{Executor, sequence};
use crate::kernel::Context;
use crate::kernel::error::Result;
use crate::stack::{StackType, StackUpsert, build_tags, stack_name};
use crate::templates;
use crate::workflows::{
    StackSummary, WorkflowError, delete_and_await, params, resolve_service_name, set_if, step, upsert_and_await,
};

const PASSWORD_LENGTH: usize = 32;

/// Parameter holding the master password of database stack `db_stack`.
pub fn password_param_name(config: &Config, db_stack: &str) -> String {
    match config.service.database.master_password_ssm_param.as_str() {
        "" => format!("{db_stack}-DatabaseMasterPassword"),
        name => name.to_string(),
    }
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

#[derive(Default)]
struct DatabaseState {
    service: String,
    cloud_formation_role: String,
    key_arn: String,
}

struct DatabaseWorkflow {
    ctx: Arc<Context>,
    environment: String,
    state: Mutex<DatabaseState>,
}

impl DatabaseWorkflow {
    fn new(ctx: Arc<Context>, environment: &str) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            environment: environment.to_string(),
            state: Mutex::new(DatabaseState::default()),
        })
    }

    fn db_stack(&self, service: &str) -> String {
        stack_name(self.ctx.namespace(), StackType::Database, &[service, &self.environment])
    }

    async fn load_service(&self, name: &str) -> Result<()> {
        self.state.lock().await.service = resolve_service_name(&self.ctx.config, name)?;
        Ok(())
    }

    async fn upsert_roleset(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let rolesets = &self.ctx.rolesets;
        rolesets.upsert_common_roleset().await?;
        rolesets
            .upsert_service_roleset(&self.environment, &state.service, "", &self.ctx.config.service.database.name)
            .await?;

        let common = rolesets.get_common_roleset().await?;
        let roles = rolesets.get_service_roleset(&self.environment, &state.service).await?;
        state.cloud_formation_role = common.get("CloudFormationRoleArn").cloned().unwrap_or_default();
        state.key_arn = roles.get("DatabaseKeyArn").cloned().unwrap_or_default();
        Ok(())
    }

    async fn upsert_database(&self) -> Result<()> {
        let state = self.state.lock().await;
        let database = &self.ctx.config.service.database;
        let namespace = self.ctx.namespace();
        let db_stack = self.db_stack(&state.service);

        let env_stack = stack_name(namespace, StackType::Environment, &[&self.environment]);
        if self.ctx.stacks.await_final_status(&env_stack).await?.is_none() {
            return Err(WorkflowError::EnvironmentStackMissing {
                stack: env_stack,
                environment: self.environment.clone(),
            }
            .into());
        }

        let mut parameters = params(&[
            ("Namespace", namespace),
            ("EnvironmentName", self.environment.as_str()),
            ("ServiceName", state.service.as_str()),
            ("DatabaseName", database.name.as_str()),
        ]);
        for export in ["VpcId", "InstanceSubnetIds", "InstanceSecurityGroup"] {
            parameters.insert(export.to_string(), format!("{env_stack}-{export}"));
        }
        set_if(&mut parameters, "DatabaseEngine", &database.engine);
        set_if(&mut parameters, "DatabaseEngineMode", &database.engine_mode);
        set_if(&mut parameters, "DatabaseInstanceClass", &database.instance_class);
        set_if(&mut parameters, "DatabaseStorage", &database.allocated_storage);
        set_if(&mut parameters, "DatabaseMasterUsername", &database.master_username);
        set_if(&mut parameters, "MinSize", &database.min_size);
        set_if(&mut parameters, "MaxSize", &database.max_size);
        set_if(&mut parameters, "SecondsUntilAutoPause", &database.seconds_until_auto_pause);
        set_if(&mut parameters, "DatabaseKeyArn", &state.key_arn);

        let param_name = password_param_name(&self.ctx.config, &db_stack);
        let mut password = self.ctx.params.get_param(&param_name).await?;
        if password.is_empty() {
            debug!("No password in param '{param_name}', generating one");
            password = generate_password();
            self.ctx.params.set_param(&param_name, &password, &state.key_arn).await?;
        }
        parameters.insert("DatabaseMasterPassword".to_string(), password);

        let repo = &self.ctx.config.repo;
        let tags = build_tags(
            StackType::Database,
            &[
                ("environment", self.environment.as_str()),
                ("service", state.service.as_str()),
                ("revision", repo.revision.as_str()),
                ("repo", repo.slug.as_str()),
            ],
        );

        info!("Upserting database '{}' for service '{}' in '{}' ...", database.name, state.service, self.environment);
        let upsert = StackUpsert::new(&db_stack, templates::DATABASE)
            .parameters(parameters)
            .tags(tags)
            .role_arn(&state.cloud_formation_role);
        upsert_and_await(self.ctx.stacks.as_ref(), upsert).await?;
        Ok(())
    }

    async fn terminate_database(&self) -> Result<()> {
        let state = self.state.lock().await;
        let db_stack = self.db_stack(&state.service);
        info!("Terminating database for service '{}' in '{}' ...", state.service, self.environment);
        delete_and_await(self.ctx.stacks.as_ref(), &db_stack).await?;

        // an externally managed parameter outlives the stack
        if self.ctx.config.service.database.master_password_ssm_param.is_empty() {
            self.ctx
                .params
                .delete_param(&password_param_name(&self.ctx.config, &db_stack))
                .await?;
        }
        Ok(())
    }
}

/// Create or update the database of the config's service in `environment`.
/// Does nothing when the service declares no database.
pub fn upserter(ctx: Arc<Context>, environment: &str) -> Executor {
    if ctx.config.service.database.name.is_empty() {
        return Executor::new(|| async {
            info!("No database declared for service, skipping");
            Ok(())
        });
    }
    let workflow = DatabaseWorkflow::new(ctx, environment);
    sequence(vec![
        step(&workflow, |w| async move { w.load_service("").await }),
        step(&workflow, |w| async move { w.upsert_roleset().await }),
        step(&workflow, |w| async move { w.upsert_database().await }),
    ])
}

/// Delete the database of service `name` (empty for the config's service) in
/// `environment`, then its password parameter.
pub fn terminator(ctx: Arc<Context>, environment: &str, name: &str) -> Executor {
    let workflow = DatabaseWorkflow::new(ctx, environment);
    let name = name.to_string();
    sequence(vec![
        step(&workflow, move |w| async move { w.load_service(&name).await }),
        step(&workflow, |w| async move { w.terminate_database().await }),
    ])
}

/// Database stacks of the namespace, keyed by service.
pub async fn list(ctx: &Context) -> Result<Vec<StackSummary>> {
    let stacks = ctx
        .stacks
        .list_stacks(Some(StackType::Database), ctx.namespace())
        .await?;
    Ok(stacks.iter().map(|stack| StackSummary::new(stack, "service")).collect())
}

/// Master password of the database of service `name` in `environment`.
pub async fn get_password(ctx: &Context, environment: &str, name: &str) -> Result<String> {
    let service = resolve_service_name(&ctx.config, name)?;
    let db_stack = stack_name(ctx.namespace(), StackType::Database, &[&service, environment]);
    ctx.params.get_param(&password_param_name(&ctx.config, &db_stack)).await
}

/// Replace the stored master password; the next `database upsert` applies it.
pub async fn set_password(ctx: &Context, environment: &str, name: &str, password: &str) -> Result<()> {
    let service = resolve_service_name(&ctx.config, name)?;
    let db_stack = stack_name(ctx.namespace(), StackType::Database, &[&service, environment]);
    let roles = ctx.rolesets.get_service_roleset(environment, &service).await?;
    let key_arn = roles.get("DatabaseKeyArn").cloned().unwrap_or_default();
    info!("Setting database password for service '{service}' in '{environment}'");
    ctx.params
        .set_param(&password_param_name(&ctx.config, &db_stack), password, &key_arn)
        .await
}
