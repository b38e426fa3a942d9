use crate::artifact::ObjectStoreApi;
use crate::local::LocalCloud;
use crate::local::provisioning::glob_match;
use crate::provider::error::codes;
use crate::stack::api::{ProvisioningApi, StackInput, StackParameter};
use crate::stack::status;

const BUCKET_TEMPLATE: &str = r#"
Parameters:
  BucketPrefix:
    Type: String
Resources:
  Bucket:
    Type: AWS::S3::Bucket
    Properties:
      BucketName: !Sub ${BucketPrefix}-${AWS::Region}-${AWS::AccountId}
Outputs:
  Bucket:
    Value: !Ref Bucket
    Export:
      Name: !Sub ${AWS::StackName}-Bucket
"#;

const CONSUMER_TEMPLATE: &str = r#"
Parameters:
  BucketExport:
    Type: String
Resources:
  Topic:
    Type: AWS::SNS::Topic
Outputs:
  Source:
    Value:
      Fn::ImportValue: !Ref BucketExport
"#;

fn input(name: &str, template: &str, parameters: &[(&str, &str)]) -> StackInput {
    StackInput {
        stack_name: name.to_string(),
        template_body: template.to_string(),
        parameters: parameters
            .iter()
            .map(|(key, value)| StackParameter {
                key: key.to_string(),
                value: Some(value.to_string()),
                use_previous_value: false,
            })
            .collect(),
        ..Default::default()
    }
}

async fn settled(cloud: &LocalCloud, name: &str) -> Option<String> {
    for _ in 0..10 {
        match cloud.describe_stack(name).await.unwrap() {
            Some(stack) if status::is_final(&stack.status) => return Some(stack.status),
            Some(_) => continue,
            None => return None,
        }
    }
    panic!("stack {name} never settled");
}

#[tokio::test]
async fn test_create_settles_after_polls() {
    let cloud = LocalCloud::new();
    cloud
        .create_stack(input("mu-bucket-x", BUCKET_TEMPLATE, &[("BucketPrefix", "mu-x")]))
        .await
        .unwrap();

    let first = cloud.describe_stack("mu-bucket-x").await.unwrap().unwrap();
    assert_eq!(first.status, status::CREATE_IN_PROGRESS);

    let second = cloud.describe_stack("mu-bucket-x").await.unwrap().unwrap();
    assert_eq!(second.status, status::CREATE_COMPLETE);
    assert_eq!(second.outputs.get("Bucket").map(String::as_str), Some("mu-x-local-1-000000000000"));
    assert_eq!(cloud.bucket_keys("mu-x-local-1-000000000000"), Some(vec![]));
    assert_eq!(cloud.history(), vec!["CreateStack mu-bucket-x".to_string()]);

    let events = cloud.describe_stack_events("mu-bucket-x").await.unwrap();
    assert_eq!(events[0].resource_status, status::CREATE_COMPLETE);
    assert_eq!(events[0].logical_resource_id, "mu-bucket-x");
    assert!(events.windows(2).all(|pair| pair[0].timestamp > pair[1].timestamp));
}

#[tokio::test]
async fn test_create_twice_fails() {
    let cloud = LocalCloud::new().with_settle_polls(0);
    let request = input("mu-bucket-x", BUCKET_TEMPLATE, &[("BucketPrefix", "mu-x")]);
    cloud.create_stack(request.clone()).await.unwrap();
    let err = cloud.create_stack(request).await.unwrap_err();
    assert_eq!(err.code, "AlreadyExistsException");
}

#[tokio::test]
async fn test_update_without_changes_is_rejected() {
    let cloud = LocalCloud::new().with_settle_polls(0);
    let request = input("mu-bucket-x", BUCKET_TEMPLATE, &[("BucketPrefix", "mu-x")]);
    cloud.create_stack(request.clone()).await.unwrap();
    assert_eq!(settled(&cloud, "mu-bucket-x").await.as_deref(), Some(status::CREATE_COMPLETE));

    let writes = cloud.write_count();
    let err = cloud.update_stack(request).await.unwrap_err();
    assert!(err.is_no_updates());
    assert_eq!(cloud.write_count(), writes);
}

#[tokio::test]
async fn test_update_in_progress_is_rejected() {
    let cloud = LocalCloud::new().with_settle_polls(3);
    cloud
        .create_stack(input("mu-bucket-x", BUCKET_TEMPLATE, &[("BucketPrefix", "mu-x")]))
        .await
        .unwrap();
    let err = cloud
        .update_stack(input("mu-bucket-x", BUCKET_TEMPLATE, &[("BucketPrefix", "mu-y")]))
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::VALIDATION_ERROR);
    assert!(err.message.contains("CREATE_IN_PROGRESS"));
}

#[tokio::test]
async fn test_update_replaces_resources() {
    let cloud = LocalCloud::new().with_settle_polls(0);
    cloud
        .create_stack(input("mu-bucket-x", BUCKET_TEMPLATE, &[("BucketPrefix", "mu-x")]))
        .await
        .unwrap();
    settled(&cloud, "mu-bucket-x").await;

    cloud
        .update_stack(input("mu-bucket-x", BUCKET_TEMPLATE, &[("BucketPrefix", "mu-y")]))
        .await
        .unwrap();
    assert_eq!(settled(&cloud, "mu-bucket-x").await.as_deref(), Some(status::UPDATE_COMPLETE));

    let stack = cloud.peek_stack("mu-bucket-x").unwrap();
    assert_eq!(stack.outputs["Bucket"], "mu-y-local-1-000000000000");
    assert!(stack.last_updated_time.is_some());
    assert_eq!(cloud.bucket_keys("mu-y-local-1-000000000000"), Some(vec![]));
}

#[tokio::test]
async fn test_failed_create_rolls_back() {
    let cloud = LocalCloud::new().with_settle_polls(0);
    let body = "Resources:\n  Topic:\n    Type: AWS::SNS::Topic\nOutputs:\n  Broken:\n    Value: !Ref Nowhere\n";
    cloud.create_stack(input("mu-broken", body, &[])).await.unwrap();

    assert_eq!(settled(&cloud, "mu-broken").await.as_deref(), Some(status::ROLLBACK_COMPLETE));
    let stack = cloud.peek_stack("mu-broken").unwrap();
    assert!(stack.status_reason.unwrap_or_default().contains("Nowhere"));
}

#[tokio::test]
async fn test_delete_missing_stack_is_ok() {
    let cloud = LocalCloud::new();
    cloud.delete_stack("mu-nothing").await.unwrap();
    assert_eq!(cloud.write_count(), 0);
}

#[tokio::test]
async fn test_delete_blocked_by_bucket_contents() {
    let cloud = LocalCloud::new().with_settle_polls(0);
    cloud
        .create_stack(input("mu-bucket-x", BUCKET_TEMPLATE, &[("BucketPrefix", "mu-x")]))
        .await
        .unwrap();
    settled(&cloud, "mu-bucket-x").await;
    let bucket = "mu-x-local-1-000000000000";
    cloud.put_object(bucket, "a/b.zip", b"zip".to_vec(), None).await.unwrap();

    cloud.delete_stack("mu-bucket-x").await.unwrap();
    assert_eq!(settled(&cloud, "mu-bucket-x").await.as_deref(), Some(status::DELETE_FAILED));

    cloud.delete_objects(bucket, &["a/b.zip".to_string()]).await.unwrap();
    cloud.delete_stack("mu-bucket-x").await.unwrap();
    assert_eq!(settled(&cloud, "mu-bucket-x").await, None);
    assert_eq!(cloud.bucket_keys(bucket), None);
}

#[tokio::test]
async fn test_delete_blocked_by_imported_export() {
    let cloud = LocalCloud::new().with_settle_polls(0);
    cloud
        .create_stack(input("mu-bucket-x", BUCKET_TEMPLATE, &[("BucketPrefix", "mu-x")]))
        .await
        .unwrap();
    settled(&cloud, "mu-bucket-x").await;
    cloud
        .create_stack(input("mu-consumer", CONSUMER_TEMPLATE, &[("BucketExport", "mu-bucket-x-Bucket")]))
        .await
        .unwrap();
    settled(&cloud, "mu-consumer").await;
    assert_eq!(
        cloud.peek_stack("mu-consumer").unwrap().outputs["Source"],
        "mu-x-local-1-000000000000"
    );

    cloud.delete_stack("mu-bucket-x").await.unwrap();
    assert_eq!(settled(&cloud, "mu-bucket-x").await.as_deref(), Some(status::DELETE_FAILED));
    let reason = cloud.peek_stack("mu-bucket-x").unwrap().status_reason.unwrap();
    assert!(reason.contains("in use by mu-consumer"));

    cloud.delete_stack("mu-consumer").await.unwrap();
    settled(&cloud, "mu-consumer").await;
    cloud.delete_stack("mu-bucket-x").await.unwrap();
    assert_eq!(settled(&cloud, "mu-bucket-x").await, None);
}

#[tokio::test]
async fn test_termination_protection_blocks_delete() {
    let cloud = LocalCloud::new().with_settle_polls(0);
    cloud
        .create_stack(input("mu-bucket-x", BUCKET_TEMPLATE, &[("BucketPrefix", "mu-x")]))
        .await
        .unwrap();
    settled(&cloud, "mu-bucket-x").await;

    cloud.update_termination_protection("mu-bucket-x", true).await.unwrap();
    let err = cloud.delete_stack("mu-bucket-x").await.unwrap_err();
    assert!(err.message.contains("TerminationProtection"));
    assert!(cloud.peek_stack("mu-bucket-x").unwrap().termination_protection);
}

#[tokio::test]
async fn test_stacks_are_paged() {
    let cloud = LocalCloud::new().with_settle_polls(0);
    for i in 0..55 {
        let prefix = format!("mu-{i}");
        cloud
            .create_stack(input(&format!("mu-bucket-{i}"), BUCKET_TEMPLATE, &[("BucketPrefix", prefix.as_str())]))
            .await
            .unwrap();
    }

    let first = cloud.describe_stacks_page(None).await.unwrap();
    assert_eq!(first.stacks.len(), 50);
    let second = cloud.describe_stacks_page(first.next_token).await.unwrap();
    assert_eq!(second.stacks.len(), 5);
    assert!(second.next_token.is_none());
}

#[tokio::test]
async fn test_describe_images_by_pattern() {
    let cloud = LocalCloud::new();
    let images = cloud
        .describe_images("amazon", "amzn-ami-*-amazon-ecs-optimized")
        .await
        .unwrap();
    let ids: Vec<_> = images.iter().map(|image| image.image_id.as_str()).collect();
    assert_eq!(ids, vec!["ami-0ec5000001", "ami-0ec5000002"]);

    assert!(cloud.describe_images("someone", "*").await.unwrap().is_empty());
}

#[test]
fn test_glob_match() {
    assert!(glob_match("amzn-ami-*-x86_64-gp2", "amzn-ami-hvm-2018.03-x86_64-gp2"));
    assert!(glob_match("a?c", "abc"));
    assert!(!glob_match("a?c", "ac"));
    assert!(!glob_match("amzn-*", "other"));
}

#[tokio::test]
async fn test_state_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    {
        let cloud = LocalCloud::open(&path).unwrap().with_settle_polls(0);
        cloud
            .create_stack(input("mu-bucket-x", BUCKET_TEMPLATE, &[("BucketPrefix", "mu-x")]))
            .await
            .unwrap();
        settled(&cloud, "mu-bucket-x").await;
    }
    let reopened = LocalCloud::open(&path).unwrap();
    let stack = reopened.peek_stack("mu-bucket-x").unwrap();
    assert_eq!(stack.status, status::CREATE_COMPLETE);
    assert_eq!(reopened.write_count(), 1);
}
