//! # Pipeline Workflows
//!
//! A service pipeline is the `<ns>-pipeline-<svc>` stack plus its IAM roles and
//! the shared `codepipeline` artifact bucket. The pipeline resource is named
//! after its stack, so the stack name doubles as the pipeline name.
use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::Pipeline;
use crate::executor::{Executor, sequence};
use crate::kernel::Context;
use crate::kernel::constants::tool_version;
use crate::kernel::error::Result;
use crate::provider::{GitInfo, pipeline::StageState};
use crate::stack::{Stack, StackType, StackUpsert, build_tags, stack_name};
use crate::templates;
use crate::workflows::{
    StackSummary, WorkflowError, delete_and_await, params, resolve_service_name, set_if, step, upsert_and_await,
};

const PIPELINE_BUCKET_PREFIX: &str = "codepipeline";
const CODE_DEPLOY_BUCKET_PREFIX: &str = "codedeploy";
const GITHUB: &str = "GitHub";
const S3: &str = "S3";

/// Build and test stage settings of `pipeline` as template parameters.
pub(crate) fn stage_params(pipeline: &Pipeline) -> BTreeMap<String, String> {
    let mut parameters = BTreeMap::new();
    set_if(&mut parameters, "BuildType", &pipeline.build.build_type);
    set_if(&mut parameters, "BuildComputeType", &pipeline.build.compute_type);
    set_if(&mut parameters, "BuildImage", &pipeline.build.image);
    set_if(&mut parameters, "TestType", &pipeline.acceptance.build_type);
    set_if(&mut parameters, "TestComputeType", &pipeline.acceptance.compute_type);
    set_if(&mut parameters, "TestImage", &pipeline.acceptance.image);
    parameters.insert("EnableAcptStage".to_string(), (!pipeline.acceptance.disabled).to_string());
    parameters.insert("EnableProdStage".to_string(), (!pipeline.production.disabled).to_string());
    set_if(&mut parameters, "MuDownloadBaseurl", &pipeline.mu_baseurl);
    parameters
}

#[derive(Default)]
struct PipelineState {
    service: String,
    pipeline_bucket: String,
    code_deploy_bucket: String,
}

struct PipelineWorkflow {
    ctx: Arc<Context>,
    state: Mutex<PipelineState>,
}

impl PipelineWorkflow {
    fn new(ctx: Arc<Context>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            state: Mutex::new(PipelineState::default()),
        })
    }

    fn tags(&self, stack_type: StackType, service: &str) -> BTreeMap<String, String> {
        let repo = &self.ctx.config.repo;
        build_tags(
            stack_type,
            &[
                ("service", service),
                ("revision", repo.revision.as_str()),
                ("repo", repo.slug.as_str()),
            ],
        )
    }

    async fn load_service(&self, name: &str) -> Result<()> {
        self.state.lock().await.service = resolve_service_name(&self.ctx.config, name)?;
        Ok(())
    }

    async fn upsert_bucket(&self, prefix: &str) -> Result<String> {
        let service = self.state.lock().await.service.clone();
        let bucket_stack = stack_name(self.ctx.namespace(), StackType::Bucket, &[prefix]);
        info!("Upserting bucket for {prefix} ...");
        let upsert = StackUpsert::new(&bucket_stack, templates::BUCKET)
            .parameters(params(&[("Namespace", self.ctx.namespace()), ("BucketPrefix", prefix)]))
            .tags(self.tags(StackType::Bucket, &service));
        let stack = upsert_and_await(self.ctx.stacks.as_ref(), upsert).await?;
        Ok(stack.output("Bucket").to_string())
    }

    async fn upsert_buckets(&self) -> Result<()> {
        let pipeline_bucket = self.upsert_bucket(PIPELINE_BUCKET_PREFIX).await?;
        let code_deploy_bucket = self.upsert_bucket(CODE_DEPLOY_BUCKET_PREFIX).await?;
        let mut state = self.state.lock().await;
        state.pipeline_bucket = pipeline_bucket;
        state.code_deploy_bucket = code_deploy_bucket;
        Ok(())
    }

    async fn upsert_roleset(&self) -> Result<()> {
        let state = self.state.lock().await;
        self.ctx.rolesets.upsert_common_roleset().await?;
        self.ctx
            .rolesets
            .upsert_pipeline_roleset(&state.service, &state.pipeline_bucket, &state.code_deploy_bucket)
            .await
    }

    async fn upsert_pipeline<F>(&self, token_provider: F) -> Result<()>
    where
        F: FnOnce(bool) -> String + Send,
    {
        let state = self.state.lock().await;
        let config = &self.ctx.config;
        let pipeline = &config.service.pipeline;
        let pipeline_stack = stack_name(self.ctx.namespace(), StackType::Pipeline, &[&state.service]);
        let existing = self.ctx.stacks.await_final_status(&pipeline_stack).await?;

        let mut parameters = params(&[
            ("Namespace", self.ctx.namespace()),
            ("ServiceName", state.service.as_str()),
            ("PipelineBucket", state.pipeline_bucket.as_str()),
        ]);
        let provider = match pipeline.source.provider.as_str() {
            "" => GITHUB,
            provider => provider,
        };
        parameters.insert("SourceProvider".to_string(), provider.to_string());
        set_if(&mut parameters, "SourceRepo", &pipeline.source.repo);
        set_if(&mut parameters, "SourceBranch", &pipeline.source.branch);
        if provider == S3 {
            let (bucket, key) = pipeline
                .source
                .repo
                .split_once('/')
                .unwrap_or((pipeline.source.repo.as_str(), ""));
            let bucket = if pipeline.source.bucket.is_empty() { bucket } else { pipeline.source.bucket.as_str() };
            let key = if pipeline.source.object_key.is_empty() { key } else { pipeline.source.object_key.as_str() };
            set_if(&mut parameters, "SourceBucket", bucket);
            set_if(&mut parameters, "SourceObjectKey", key);
        }
        if provider == GITHUB {
            let token = token_provider(existing.is_none());
            if token.is_empty() && existing.is_none() {
                return Err(WorkflowError::MissingToken { stack: pipeline_stack }.into());
            }
            // empty keeps the token the stack already has
            parameters.insert("GitHubToken".to_string(), token);
        }

        parameters.extend(stage_params(pipeline));
        set_if(&mut parameters, "AcptEnv", &pipeline.acceptance.environment);
        set_if(&mut parameters, "ProdEnv", &pipeline.production.environment);
        let version = match pipeline.mu_version.as_str() {
            "" => tool_version(),
            version => version,
        };
        set_if(&mut parameters, "MuDownloadVersion", version);
        set_if(&mut parameters, "MuFile", &config.rel_mu_file);

        let buildspec = templates::asset(templates::BUILDSPEC)?;
        parameters.insert("DefaultBuildspec".to_string(), buildspec.replace("\r\n", "\\n").replace('\n', "\\n"));

        let roles = self.ctx.rolesets.get_pipeline_roleset(&state.service).await?;
        for role in [
            "CodePipelineRoleArn",
            "CodeBuildCIRoleArn",
            "CodeBuildCDAcptRoleArn",
            "CodeBuildCDProdRoleArn",
        ] {
            set_if(&mut parameters, role, roles.get(role).map(String::as_str).unwrap_or_default());
        }

        info!("Upserting Pipeline for service '{}' ...", state.service);
        let upsert = StackUpsert::new(&pipeline_stack, templates::PIPELINE)
            .parameters(parameters)
            .tags(self.tags(StackType::Pipeline, &state.service));
        upsert_and_await(self.ctx.stacks.as_ref(), upsert).await?;
        Ok(())
    }

    async fn terminate_pipeline(&self) -> Result<()> {
        let service = self.state.lock().await.service.clone();
        let pipeline_stack = stack_name(self.ctx.namespace(), StackType::Pipeline, &[&service]);
        info!("Terminating Pipeline for service '{service}' ...");
        delete_and_await(self.ctx.stacks.as_ref(), &pipeline_stack).await?;
        self.ctx.rolesets.delete_pipeline_roleset(&service).await
    }
}

/// Create or update the pipeline of the config's service.
///
/// Buckets are upserted before the pipeline roleset because the pipeline IAM
/// policies name the artifact and codedeploy buckets; the pipeline stack comes last.
///
/// `token_provider` is asked for the source token with `true` when the pipeline
/// does not exist yet; a first-time upsert from GitHub fails without one.
pub fn upserter<F>(ctx: Arc<Context>, token_provider: F) -> Executor
where
    F: FnOnce(bool) -> String + Send + 'static,
{
    let workflow = PipelineWorkflow::new(ctx);
    sequence(vec![
        step(&workflow, |w| async move { w.load_service("").await }),
        step(&workflow, |w| async move { w.upsert_buckets().await }),
        step(&workflow, |w| async move { w.upsert_roleset().await }),
        step(&workflow, move |w| async move { w.upsert_pipeline(token_provider).await }),
    ])
}

/// Delete the pipeline of service `name` (empty for the config's service) and its roles.
pub fn terminator(ctx: Arc<Context>, name: &str) -> Executor {
    let workflow = PipelineWorkflow::new(ctx);
    let name = name.to_string();
    sequence(vec![
        step(&workflow, move |w| async move { w.load_service(&name).await }),
        step(&workflow, |w| async move { w.terminate_pipeline().await }),
    ])
}

/// Pipeline stacks of the namespace, keyed by service.
pub async fn list(ctx: &Context) -> Result<Vec<StackSummary>> {
    let stacks = ctx
        .stacks
        .list_stacks(Some(StackType::Pipeline), ctx.namespace())
        .await?;
    Ok(stacks.iter().map(|stack| StackSummary::new(stack, "service")).collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineView {
    pub service: String,
    pub stack: Stack,
    pub url: String,
    pub stages: Vec<StageState>,
    /// Absent until the source stage has run once.
    pub git_info: Option<GitInfo>,
}

/// Stage states and source revision of the pipeline of service `name`.
pub async fn show(ctx: &Context, name: &str) -> Result<PipelineView> {
    let service = resolve_service_name(&ctx.config, name)?;
    let pipeline_stack = stack_name(ctx.namespace(), StackType::Pipeline, &[&service]);
    let stack = ctx
        .stacks
        .await_final_status(&pipeline_stack)
        .await?
        .ok_or_else(|| WorkflowError::PipelineNotFound {
            service: service.clone(),
        })?;

    let stages = ctx.pipelines.list_state(&stack.name).await?;
    let git_info = match ctx.pipelines.get_git_info(&stack.name).await {
        Ok(info) => Some(info),
        Err(err) => {
            debug!("No git information for pipeline '{}': {err}", stack.name);
            None
        }
    };

    Ok(PipelineView {
        service,
        url: stack.output("CodePipelineUrl").to_string(),
        stack,
        stages,
        git_info,
    })
}
