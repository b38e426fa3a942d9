use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{harness, writes_of};
use crate::config::Pipeline;
use crate::kernel::Error;
use crate::stack::status;
use crate::workflows::pipeline::{self, stage_params};
use crate::workflows::WorkflowError;

const GITHUB_CONFIG: &str = r#"
namespace: mu
service:
  name: web
  pipeline:
    source:
      provider: GitHub
      repo: acme/web
    acceptance:
      environment: dev
    production:
      environment: prod
"#;

#[tokio::test]
async fn test_first_github_upsert_requires_token() {
    let h = harness(GITHUB_CONFIG).await;
    let asked_new = Arc::new(AtomicBool::new(false));
    let flag = asked_new.clone();

    let err = pipeline::upserter(h.ctx.clone(), move |is_new| {
        flag.store(is_new, Ordering::SeqCst);
        String::new()
    })
    .execute()
    .await
    .unwrap_err();

    assert!(asked_new.load(Ordering::SeqCst));
    assert!(matches!(
        err,
        Error::Workflow(WorkflowError::MissingToken { ref stack }) if stack == "mu-pipeline-web"
    ));
    assert!(h.cloud.peek_stack("mu-pipeline-web").is_none());
}

#[tokio::test]
async fn test_upsert_creates_buckets_roles_then_pipeline() {
    let h = harness(GITHUB_CONFIG).await;

    pipeline::upserter(h.ctx.clone(), |_| "gh-token".to_string())
        .execute()
        .await
        .unwrap();

    let created = writes_of(&h.cloud, "CreateStack");
    assert_eq!(
        created,
        vec![
            "CreateStack mu-bucket-codepipeline",
            "CreateStack mu-bucket-codedeploy",
            "CreateStack mu-iam-common",
            "CreateStack mu-iam-pipeline-web",
            "CreateStack mu-pipeline-web",
        ]
    );
    let stack = h.cloud.peek_stack("mu-pipeline-web").unwrap();
    assert_eq!(stack.status, status::CREATE_COMPLETE, "{:?}", stack.status_reason);
    assert_eq!(stack.parameters["SourceRepo"], "acme/web");
    assert_eq!(stack.parameters["AcptEnv"], "dev");
    assert_eq!(stack.parameters["ProdEnv"], "prod");
    assert_eq!(stack.tags["mu:service"], "web");
}

#[tokio::test]
async fn test_update_without_token_keeps_existing() {
    let h = harness(GITHUB_CONFIG).await;
    pipeline::upserter(h.ctx.clone(), |_| "gh-token".to_string())
        .execute()
        .await
        .unwrap();

    pipeline::upserter(h.ctx.clone(), |is_new| {
        assert!(!is_new);
        String::new()
    })
    .execute()
    .await
    .unwrap();

    let stack = h.cloud.peek_stack("mu-pipeline-web").unwrap();
    assert_eq!(stack.parameters["GitHubToken"], "gh-token");
}

#[tokio::test]
async fn test_show_reports_stages() {
    let h = harness(GITHUB_CONFIG).await;
    pipeline::upserter(h.ctx.clone(), |_| "gh-token".to_string())
        .execute()
        .await
        .unwrap();

    let view = pipeline::show(&h.ctx, "").await.unwrap();

    assert_eq!(view.service, "web");
    assert!(view.url.ends_with("mu-pipeline-web"), "{}", view.url);
    let names: Vec<&str> = view.stages.iter().map(|stage| stage.name.as_str()).collect();
    assert_eq!(&names[..2], ["Source", "Build"]);
}

#[tokio::test]
async fn test_show_without_pipeline_fails() {
    let h = harness(GITHUB_CONFIG).await;

    let err = pipeline::show(&h.ctx, "").await.unwrap_err();

    assert!(matches!(
        err,
        Error::Workflow(WorkflowError::PipelineNotFound { ref service }) if service == "web"
    ));
}

#[tokio::test]
async fn test_terminate_deletes_pipeline_and_roles() {
    let h = harness(GITHUB_CONFIG).await;
    pipeline::upserter(h.ctx.clone(), |_| "gh-token".to_string())
        .execute()
        .await
        .unwrap();

    pipeline::terminator(h.ctx.clone(), "").execute().await.unwrap();

    assert_eq!(
        writes_of(&h.cloud, "DeleteStack"),
        vec!["DeleteStack mu-pipeline-web", "DeleteStack mu-iam-pipeline-web"]
    );
    let summaries = pipeline::list(&h.ctx).await.unwrap();
    assert!(summaries.is_empty());
}

#[test]
fn test_stage_params_follow_disabled_flags() {
    let mut config = Pipeline::default();
    config.build.image = "custom/image:1".to_string();
    config.production.disabled = true;

    let parameters = stage_params(&config);

    assert_eq!(parameters["BuildImage"], "custom/image:1");
    assert_eq!(parameters["EnableAcptStage"], "true");
    assert_eq!(parameters["EnableProdStage"], "false");
    assert!(!parameters.contains_key("BuildType"));
}
