use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use super::{DEV_CONFIG, config, harness, harness_on, local_cloud, writes_of};
use crate::kernel::Error;
use crate::local::LocalCloud;
use crate::stack::api::StackDescription;
use crate::stack::{StackSystemError, status};
use crate::workflows::{WorkflowError, environment};

fn seeded_environment(version: &str) -> StackDescription {
    let mut tags = BTreeMap::new();
    tags.insert("mu:type".to_string(), "environment".to_string());
    tags.insert("mu:environment".to_string(), "dev".to_string());
    tags.insert("mu:version".to_string(), version.to_string());
    StackDescription {
        stack_id: "arn:aws:cloudformation:local-1:000000000000:stack/mu-environment-dev/1".to_string(),
        stack_name: "mu-environment-dev".to_string(),
        status: status::CREATE_COMPLETE.to_string(),
        creation_time: Utc::now(),
        tags,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_first_upsert_creates_stacks_in_order() {
    let h = harness(DEV_CONFIG).await;
    environment::upserter(h.ctx.clone(), "dev").execute().await.unwrap();

    assert_eq!(
        writes_of(&h.cloud, "CreateStack"),
        vec![
            "CreateStack mu-iam-common",
            "CreateStack mu-iam-environment-dev",
            "CreateStack mu-vpc-dev",
            "CreateStack mu-loadbalancer-dev",
            "CreateStack mu-environment-dev",
        ]
    );
    for name in [
        "mu-iam-common",
        "mu-iam-environment-dev",
        "mu-vpc-dev",
        "mu-loadbalancer-dev",
        "mu-environment-dev",
    ] {
        let stack = h.cloud.peek_stack(name).unwrap();
        assert_eq!(stack.status, status::CREATE_COMPLETE, "{name}: {:?}", stack.status_reason);
    }
}

#[tokio::test]
async fn test_repeated_upsert_writes_nothing() {
    let h = harness(DEV_CONFIG).await;
    environment::upserter(h.ctx.clone(), "dev").execute().await.unwrap();
    let writes = h.cloud.write_count();

    environment::upserter(h.ctx.clone(), "dev").execute().await.unwrap();

    assert_eq!(h.cloud.write_count(), writes, "{:?}", h.cloud.history());
}

#[tokio::test]
async fn test_unknown_environment_fails() {
    let h = harness(DEV_CONFIG).await;
    let err = environment::upserter(h.ctx.clone(), "qa").execute().await.unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
    assert_eq!(h.cloud.write_count(), 0);
}

#[tokio::test]
async fn test_major_version_mismatch_fails_before_writes() {
    let cloud = local_cloud();
    cloud.seed_stack(seeded_environment("1.4.0"));
    let h = harness_on(cloud, config(DEV_CONFIG), |builder| builder.tool_version("2.0.0")).await;

    let err = environment::upserter(h.ctx.clone(), "dev").execute().await.unwrap_err();

    assert!(matches!(err, Error::StackSystem(StackSystemError::VersionIncompatible { .. })));
    let message = err.to_string();
    assert!(message.contains("1.4.0") && message.contains("2.0.0"), "{message}");
    assert_eq!(h.cloud.write_count(), 0);
}

#[tokio::test]
async fn test_skip_version_check_proceeds() {
    let cloud = local_cloud();
    cloud.seed_stack(seeded_environment("1.4.0"));
    let h = harness_on(cloud, config(DEV_CONFIG), |builder| {
        builder.tool_version("2.0.0").skip_version_check(true)
    })
    .await;

    environment::upserter(h.ctx.clone(), "dev").execute().await.unwrap();

    assert_eq!(writes_of(&h.cloud, "UpdateStack"), vec!["UpdateStack mu-environment-dev"]);
    let stack = h.cloud.peek_stack("mu-environment-dev").unwrap();
    assert_eq!(stack.tags["mu:version"], "2.0.0");
}

#[tokio::test]
async fn test_list_reports_environments() {
    let h = harness(DEV_CONFIG).await;
    environment::upserter(h.ctx.clone(), "dev").execute().await.unwrap();

    let summaries = environment::list(&h.ctx).await.unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].subject, "dev");
    assert_eq!(summaries[0].stack, "mu-environment-dev");
    assert_eq!(summaries[0].status, status::CREATE_COMPLETE);
}

#[tokio::test]
async fn test_terminate_removes_every_stack() {
    let h = harness(DEV_CONFIG).await;
    environment::upserter(h.ctx.clone(), "dev").execute().await.unwrap();

    environment::terminator(h.ctx.clone(), "dev").execute().await.unwrap();

    assert_eq!(
        writes_of(&h.cloud, "DeleteStack"),
        vec![
            "DeleteStack mu-environment-dev",
            "DeleteStack mu-loadbalancer-dev",
            "DeleteStack mu-vpc-dev",
            "DeleteStack mu-iam-environment-dev",
        ]
    );
    assert!(h.cloud.peek_stack("mu-iam-common").is_some());
}

#[tokio::test]
async fn test_single_availability_zone_is_rejected() {
    let cloud = Arc::new(LocalCloud::new().with_settle_polls(0).with_availability_zones(&["local-1a"]));
    let h = harness_on(cloud, config(DEV_CONFIG), |builder| builder).await;

    let err = environment::upserter(h.ctx.clone(), "dev").execute().await.unwrap_err();

    assert!(matches!(err, Error::Workflow(WorkflowError::InsufficientZones { count: 1 })), "{err}");
    assert!(err.to_string().contains("found 1"), "{err}");
    let created = writes_of(&h.cloud, "CreateStack");
    assert!(!created.iter().any(|w| w.ends_with("mu-vpc-dev")), "{created:?}");
    assert!(!created.iter().any(|w| w.ends_with("mu-environment-dev")), "{created:?}");
}
