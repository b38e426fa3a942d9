use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as TimeDelta, TimeZone, Utc};
use log::Level;
use tempfile::TempDir;

use crate::config::load_config_str;
use crate::kernel::error::Error;
use crate::kernel::{Context, ContextBuilder, ProviderApis};
use crate::local::LocalCloud;
use crate::stack::api::{ImageDescription, ProvisioningApi, StackDescription, StackEvent};
use crate::stack::manager::{EventCursor, event_log_level, first_new_event_index};
use crate::stack::{StackSystemError, StackType, StackUpsert, build_tags, status};
use crate::templates;

struct Fixture {
    cloud: Arc<LocalCloud>,
    ctx: Context,
    _dir: TempDir,
}

async fn fixture(tool_version: &str) -> Fixture {
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(LocalCloud::new().with_settle_polls(1));
    let config = load_config_str("namespace: mu\n", Path::new("mu.yml")).unwrap();
    let ctx = ContextBuilder::new(config)
        .poll_interval(Duration::ZERO)
        .extensions_dir(dir.path().join("extensions"))
        .tool_version(tool_version)
        .build(ProviderApis::local(cloud.clone()))
        .await
        .unwrap();
    Fixture { cloud, ctx, _dir: dir }
}

fn bucket_upsert(prefix: &str) -> StackUpsert {
    let parameters: BTreeMap<String, String> = [("Namespace", "mu"), ("BucketPrefix", prefix)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    StackUpsert::new(format!("mu-bucket-{prefix}"), templates::BUCKET)
        .parameters(parameters)
        .tags(build_tags(StackType::Bucket, &[]))
}

fn seeded(name: &str, stack_status: &str, version: &str) -> StackDescription {
    let mut tags = BTreeMap::new();
    tags.insert("mu:type".to_string(), "bucket".to_string());
    tags.insert("mu:version".to_string(), version.to_string());
    StackDescription {
        stack_id: format!("arn:aws:cloudformation:local-1:000000000000:stack/{name}/1"),
        stack_name: name.to_string(),
        status: stack_status.to_string(),
        creation_time: Utc::now(),
        tags,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_upsert_creates_then_waits_for_completion() {
    let f = fixture("1.2.0").await;

    f.ctx.stacks.upsert_stack(bucket_upsert("artifacts")).await.unwrap();
    let stack = f.ctx.stacks.await_final_status("mu-bucket-artifacts").await.unwrap().unwrap();

    assert_eq!(stack.status, status::CREATE_COMPLETE);
    assert_eq!(stack.output("Bucket"), "artifacts-local-1-000000000000");
    assert_eq!(stack.tag("type"), "bucket");
    assert_eq!(stack.tag("version"), "1.2.0");
    assert_eq!(stack.stack_type(), Some(StackType::Bucket));
    assert_eq!(f.cloud.history(), vec!["CreateStack mu-bucket-artifacts"]);
}

#[tokio::test]
async fn test_unchanged_upsert_is_not_an_error() {
    let f = fixture("1.2.0").await;
    f.ctx.stacks.upsert_stack(bucket_upsert("artifacts")).await.unwrap();
    f.ctx.stacks.await_final_status("mu-bucket-artifacts").await.unwrap();

    f.ctx.stacks.upsert_stack(bucket_upsert("artifacts")).await.unwrap();

    assert_eq!(f.cloud.write_count(), 1);
}

#[tokio::test]
async fn test_rolled_back_stack_is_replaced() {
    let f = fixture("1.2.0").await;
    f.cloud.seed_stack(seeded("mu-bucket-artifacts", status::ROLLBACK_COMPLETE, "1.2.0"));

    f.ctx.stacks.upsert_stack(bucket_upsert("artifacts")).await.unwrap();

    assert_eq!(
        f.cloud.history(),
        vec!["DeleteStack mu-bucket-artifacts", "CreateStack mu-bucket-artifacts"]
    );
}

#[tokio::test]
async fn test_upsert_refuses_major_version_change() {
    let f = fixture("2.0.0").await;
    f.cloud.seed_stack(seeded("mu-bucket-artifacts", status::CREATE_COMPLETE, "1.0.0"));

    let err = f.ctx.stacks.upsert_stack(bucket_upsert("artifacts")).await.unwrap_err();

    assert!(matches!(err, Error::StackSystem(StackSystemError::VersionIncompatible { .. })));
    assert_eq!(f.cloud.write_count(), 0);
}

#[tokio::test]
async fn test_get_stack_and_missing_stack() {
    let f = fixture("1.2.0").await;

    assert!(f.ctx.stacks.await_final_status("mu-bucket-none").await.unwrap().is_none());
    let err = f.ctx.stacks.get_stack("mu-bucket-none").await.unwrap_err();
    assert!(matches!(err, Error::StackSystem(StackSystemError::StackNotFound { .. })));
}

#[tokio::test]
async fn test_list_stacks_filters_namespace_and_type() {
    let f = fixture("1.2.0").await;
    f.cloud.seed_stack(seeded("mu-bucket-a", status::CREATE_COMPLETE, "1.2.0"));
    f.cloud.seed_stack(seeded("other-bucket-b", status::CREATE_COMPLETE, "1.2.0"));
    let mut untyped = seeded("mu-untyped", status::CREATE_COMPLETE, "1.2.0");
    untyped.tags.remove("mu:type");
    f.cloud.seed_stack(untyped);

    let all = f.ctx.stacks.list_stacks(None, "mu").await.unwrap();
    let names: Vec<&str> = all.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["mu-bucket-a"]);

    assert!(f.ctx.stacks.list_stacks(Some(StackType::Vpc), "mu").await.unwrap().is_empty());
    assert_eq!(f.ctx.stacks.list_stacks(Some(StackType::Bucket), "other").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_empties_owned_bucket() {
    let f = fixture("1.2.0").await;
    f.ctx.stacks.upsert_stack(bucket_upsert("artifacts")).await.unwrap();
    let stack = f.ctx.stacks.await_final_status("mu-bucket-artifacts").await.unwrap().unwrap();
    let bucket = stack.output("Bucket").to_string();
    f.ctx
        .artifacts
        .create_artifact(b"bundle".to_vec(), &format!("s3://{bucket}/web/1.zip"), "")
        .await
        .unwrap();

    f.ctx.stacks.delete_stack("mu-bucket-artifacts").await.unwrap();
    let deleted = f.ctx.stacks.await_final_status("mu-bucket-artifacts").await.unwrap();

    assert!(deleted.is_none_or(|s| s.status == status::DELETE_COMPLETE));
    assert!(f.cloud.bucket_keys(&bucket).is_none_or(|keys| keys.is_empty()));
}

#[tokio::test]
async fn test_delete_of_missing_stack_is_a_no_op() {
    let f = fixture("1.2.0").await;
    f.ctx.stacks.delete_stack("mu-vpc-gone").await.unwrap();
    assert_eq!(f.cloud.write_count(), 0);
}

#[tokio::test]
async fn test_find_latest_image_id() {
    let f = fixture("1.2.0").await;
    for (id, date) in [
        ("ami-old", "2023-01-01T00:00:00Z"),
        ("ami-new", "2024-06-01T00:00:00Z"),
        ("ami-mid", "2023-09-01T00:00:00Z"),
    ] {
        f.cloud.add_image(ImageDescription {
            image_id: id.to_string(),
            name: format!("custom-node-{id}"),
            creation_date: date.to_string(),
        });
    }

    assert_eq!(f.ctx.stacks.find_latest_image_id("custom-node-*").await.unwrap(), "ami-new");
    let err = f.ctx.stacks.find_latest_image_id("nothing-*").await.unwrap_err();
    assert!(matches!(err, Error::StackSystem(StackSystemError::ImageNotFound { .. })));
}

#[tokio::test]
async fn test_availability_zones() {
    let f = fixture("1.2.0").await;
    assert_eq!(
        f.ctx.stacks.availability_zones().await.unwrap(),
        vec!["local-1a", "local-1b", "local-1c"]
    );
}

#[tokio::test]
async fn test_check_version_compares_major() {
    let f = fixture("2.0.0").await;
    let mut stack = crate::stack::Stack::default();
    stack.name = "mu-vpc-dev".to_string();
    stack.tags.insert("version".to_string(), "1.0.0".to_string());

    assert!(f.ctx.stacks.check_version(&stack).is_err());
    stack.tags.insert("version".to_string(), "2.3.0".to_string());
    assert!(f.ctx.stacks.check_version(&stack).is_ok());
}

fn at(second: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + TimeDelta::seconds(second)
}

fn event(id: &str, logical_id: &str, resource_status: &str, second: i64) -> StackEvent {
    StackEvent {
        event_id: id.to_string(),
        stack_name: "mu-vpc-dev".to_string(),
        logical_resource_id: logical_id.to_string(),
        resource_type: if logical_id == "mu-vpc-dev" {
            "AWS::CloudFormation::Stack".to_string()
        } else {
            "AWS::EC2::VPC".to_string()
        },
        resource_status: resource_status.to_string(),
        resource_status_reason: None,
        timestamp: at(second),
    }
}

// Newest first, like the provider returns them
fn update_run_events() -> Vec<StackEvent> {
    vec![
        event("6", "Vpc", "UPDATE_IN_PROGRESS", 6),
        event("5", "mu-vpc-dev", "UPDATE_IN_PROGRESS", 5),
        event("4", "mu-vpc-dev", "CREATE_COMPLETE", 4),
        event("3", "Vpc", "CREATE_COMPLETE", 3),
        event("2", "Vpc", "CREATE_IN_PROGRESS", 2),
        event("1", "mu-vpc-dev", "CREATE_IN_PROGRESS", 1),
    ]
}

#[test]
fn test_first_new_event_anchors_on_latest_stack_complete() {
    let events = update_run_events();
    assert_eq!(first_new_event_index(&events, "mu-vpc-dev", None), 2);

    // a nested resource completing is not an anchor
    let nested = vec![
        event("3", "Vpc", "CREATE_COMPLETE", 3),
        event("2", "Vpc", "CREATE_IN_PROGRESS", 2),
        event("1", "mu-vpc-dev", "CREATE_IN_PROGRESS", 1),
    ];
    assert_eq!(first_new_event_index(&nested, "mu-vpc-dev", None), 0);
}

#[test]
fn test_first_creation_without_anchor_reports_nothing() {
    let events = vec![
        event("2", "Vpc", "CREATE_IN_PROGRESS", 2),
        event("1", "mu-vpc-dev", "CREATE_IN_PROGRESS", 1),
    ];
    assert_eq!(first_new_event_index(&events, "mu-vpc-dev", None), 0);
    assert!(EventCursor::default().advance(&events, "mu-vpc-dev").is_empty());
}

#[test]
fn test_first_new_event_after_prior_time() {
    let events = update_run_events();
    assert_eq!(first_new_event_index(&events, "mu-vpc-dev", Some(at(4))), 2);
    assert_eq!(first_new_event_index(&events, "mu-vpc-dev", Some(at(6))), 0);
}

#[test]
fn test_event_cursor_reports_each_event_once() {
    let mut cursor = EventCursor::default();
    let all = update_run_events();

    let first_poll = &all[2..];
    assert!(cursor.advance(first_poll, "mu-vpc-dev").is_empty());

    let second_poll = &all[1..];
    let ids: Vec<&str> = cursor.advance(second_poll, "mu-vpc-dev").iter().map(|e| e.event_id.as_str()).collect();
    assert_eq!(ids, vec!["5"]);

    let ids: Vec<&str> = cursor.advance(&all, "mu-vpc-dev").iter().map(|e| e.event_id.as_str()).collect();
    assert_eq!(ids, vec!["6"]);

    assert!(cursor.advance(&all, "mu-vpc-dev").is_empty());
}

#[test]
fn test_event_cursor_starts_after_previous_run() {
    let all = update_run_events();
    let ids: Vec<&str> = EventCursor::default()
        .advance(&all, "mu-vpc-dev")
        .iter()
        .map(|e| e.event_id.as_str())
        .collect();
    assert_eq!(ids, vec!["5", "6"]);
}

#[test]
fn test_failed_events_log_as_errors() {
    assert_eq!(event_log_level(&event("1", "Vpc", "CREATE_FAILED", 1)), Level::Error);
    assert_eq!(event_log_level(&event("2", "mu-vpc-dev", "UPDATE_ROLLBACK_FAILED", 2)), Level::Error);
    assert_eq!(event_log_level(&event("3", "Vpc", "CREATE_IN_PROGRESS", 3)), Level::Debug);
    assert_eq!(event_log_level(&event("4", "Vpc", "CREATE_COMPLETE", 4)), Level::Debug);
}

#[tokio::test]
async fn test_event_cursor_over_polls_of_a_creation() {
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(LocalCloud::new().with_settle_polls(2));
    let config = load_config_str("namespace: mu\n", Path::new("mu.yml")).unwrap();
    let ctx = ContextBuilder::new(config)
        .poll_interval(Duration::ZERO)
        .extensions_dir(dir.path().join("extensions"))
        .build(ProviderApis::local(cloud.clone()))
        .await
        .unwrap();
    ctx.stacks.upsert_stack(bucket_upsert("artifacts")).await.unwrap();

    let name = "mu-bucket-artifacts";
    let mut cursor = EventCursor::default();
    let mut reported: Vec<StackEvent> = Vec::new();
    let mut polls = 0;
    loop {
        polls += 1;
        let details = cloud.describe_stack(name).await.unwrap().unwrap();
        let events = cloud.describe_stack_events(name).await.unwrap();
        reported.extend(cursor.advance(&events, name).into_iter().cloned());
        if status::is_final(&details.status) {
            break;
        }
        assert!(polls < 10, "stack never settled");
    }

    assert!(polls > 1);
    let mut ids: Vec<&str> = reported.iter().map(|e| e.event_id.as_str()).collect();
    let count = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), count, "an event was reported twice");

    assert!(
        !reported
            .iter()
            .any(|e| e.logical_resource_id == name && e.resource_status == status::CREATE_IN_PROGRESS)
    );
    let last = reported.last().unwrap();
    assert_eq!(last.logical_resource_id, name);
    assert_eq!(last.resource_status, status::CREATE_COMPLETE);
    assert!(reported.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
}
