use crate::artifact::ObjectStoreApi;
use crate::local::LocalCloud;
use crate::param::ParameterStoreApi;
use crate::provider::catalog::CatalogApi;
use crate::provider::cluster::ClusterInstanceLister;
use crate::provider::error::codes;
use crate::provider::image::ImageBuilder;
use crate::provider::kubernetes::KubernetesResourceManager;
use crate::provider::logs::LogsApi;
use crate::provider::pipeline::PipelineStateApi;
use crate::provider::repository::{RegistryApi, decode_authorization_token};
use crate::provider::tasks::{ContainerTaskApi, RunTaskRequest};
use crate::stack::api::{ProvisioningApi, StackInput};

const CLUSTER_TEMPLATE: &str = r#"
Parameters:
  DesiredCapacity:
    Type: String
    Default: "2"
Resources:
  EcsCluster:
    Type: AWS::ECS::Cluster
    Properties:
      ClusterName: !Ref AWS::StackName
  ContainerInstances:
    Type: AWS::AutoScaling::LaunchConfiguration
    Properties:
      InstanceType: t3.small
  TaskDefinition:
    Type: AWS::ECS::TaskDefinition
    Properties:
      ContainerDefinitions:
      - Name: web
  Service:
    Type: AWS::ECS::Service
    Properties:
      Cluster: !Ref EcsCluster
      TaskDefinition: !Ref TaskDefinition
      DesiredCount: 2
"#;

const CATALOG_TEMPLATE: &str = r#"
Resources:
  Repo:
    Type: AWS::ECR::Repository
    Properties:
      RepositoryName: mu-web
  Product:
    Type: AWS::ServiceCatalog::CloudFormationProduct
    Properties:
      ProvisioningArtifactParameters:
      - Name: "1.0"
        Info:
          LoadTemplateFromURL: https://example.com/1.0.yml
Outputs:
  ProductId:
    Value: !Ref Product
"#;

async fn create(cloud: &LocalCloud, name: &str, template: &str) {
    cloud
        .create_stack(StackInput {
            stack_name: name.to_string(),
            template_body: template.to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let stack = cloud.describe_stack(name).await.unwrap().unwrap();
    assert_eq!(stack.status, "CREATE_COMPLETE", "{:?}", stack.status_reason);
}

fn cloud() -> LocalCloud {
    LocalCloud::new().with_settle_polls(0)
}

#[tokio::test]
async fn test_parameter_versions() {
    let cloud = cloud();
    assert_eq!(cloud.put_parameter("db-pass", "one", "").await.unwrap(), 1);
    assert_eq!(cloud.put_parameter("db-pass", "two", "").await.unwrap(), 2);

    let parameter = cloud.get_parameter("db-pass").await.unwrap();
    assert_eq!((parameter.value.as_str(), parameter.version), ("two", 2));

    cloud.delete_parameter("db-pass").await.unwrap();
    let err = cloud.get_parameter("db-pass").await.unwrap_err();
    assert!(err.is(codes::PARAMETER_NOT_FOUND));
    assert!(cloud.delete_parameter("db-pass").await.unwrap_err().is(codes::PARAMETER_NOT_FOUND));
}

#[tokio::test]
async fn test_objects_require_bucket_and_honor_etags() {
    let cloud = cloud();
    let err = cloud.put_object("nope", "k", vec![1], None).await.unwrap_err();
    assert!(err.is(codes::NO_SUCH_BUCKET));

    create(
        &cloud,
        "mu-bucket-a",
        "Resources:\n  Bucket:\n    Type: AWS::S3::Bucket\n    Properties:\n      BucketName: artifacts\n",
    )
    .await;
    let etag = cloud.put_object("artifacts", "a.zip", b"abc".to_vec(), Some("key")).await.unwrap();
    assert_eq!(etag, "900150983cd24fb0d6963f7d28e17f72");

    let object = cloud.get_object("artifacts", "a.zip", None).await.unwrap();
    assert_eq!(object.body, b"abc");
    let err = cloud.get_object("artifacts", "a.zip", Some(&etag)).await.unwrap_err();
    assert!(err.is(codes::NOT_MODIFIED));
    let err = cloud.get_object("artifacts", "b.zip", None).await.unwrap_err();
    assert!(err.is(codes::NO_SUCH_KEY));
}

#[tokio::test]
async fn test_objects_are_listed_in_pages() {
    let cloud = cloud();
    create(
        &cloud,
        "mu-bucket-a",
        "Resources:\n  Bucket:\n    Type: AWS::S3::Bucket\n    Properties:\n      BucketName: artifacts\n",
    )
    .await;
    for key in ["a", "b", "c"] {
        cloud.put_object("artifacts", key, vec![], None).await.unwrap();
    }

    let first = cloud.list_objects("artifacts", None, 2).await.unwrap();
    assert_eq!(first.keys, vec!["a", "b"]);
    let second = cloud.list_objects("artifacts", first.next_token, 2).await.unwrap();
    assert_eq!(second.keys, vec!["c"]);
    assert!(second.next_token.is_none());
}

#[tokio::test]
async fn test_authorization_token_decodes() {
    let cloud = cloud();
    let token = cloud.get_authorization_token().await.unwrap();
    let auth = decode_authorization_token(&token, "https://000000000000.dkr.ecr.local-1.amazonaws.com/mu-web").unwrap();
    assert_eq!(auth.username, "AWS");
    assert_eq!(auth.server_address, "000000000000.dkr.ecr.local-1.amazonaws.com");

    let err = cloud.list_image_ids("missing").await.unwrap_err();
    assert!(err.is(codes::REPOSITORY_NOT_FOUND));
}

#[tokio::test]
async fn test_service_tasks_are_replaced_when_stopped() {
    let cloud = cloud();
    create(&cloud, "mu-environment-dev", CLUSTER_TEMPLATE).await;

    let services = cloud.list_services("mu-environment-dev").await.unwrap();
    assert_eq!(services.len(), 1);
    let tasks = cloud.list_tasks("mu-environment-dev", &services[0]).await.unwrap();
    assert_eq!(tasks.len(), 2);

    let descriptions = cloud.describe_tasks("mu-environment-dev", &tasks).await.unwrap();
    assert_eq!(descriptions.len(), 2);
    assert_eq!(descriptions[0].container_names, vec!["web"]);
    let host = cloud
        .describe_container_instance("mu-environment-dev", &descriptions[1].container_instance_arn)
        .await
        .unwrap();
    assert_eq!(host, "i-00000000000000002");

    let task_id = tasks[0].rsplit('/').next().unwrap().to_string();
    cloud.stop_task("mu-environment-dev", &task_id).await.unwrap();
    let replaced = cloud.list_tasks("mu-environment-dev", &services[0]).await.unwrap();
    assert_eq!(replaced.len(), 2);
    assert!(!replaced.contains(&tasks[0]));

    let err = cloud.stop_task("mu-environment-dev", &task_id).await.unwrap_err();
    assert_eq!(err.code, "InvalidParameterException");
}

#[tokio::test]
async fn test_run_task_needs_cluster() {
    let cloud = cloud();
    let request = RunTaskRequest {
        cluster: "mu-environment-dev".to_string(),
        task_definition: "arn:task-definition/web:1".to_string(),
        container_name: "web".to_string(),
        command: vec!["echo".to_string(), "hi".to_string()],
        count: 1,
    };
    let err = cloud.run_task(request.clone()).await.unwrap_err();
    assert_eq!(err.code, "ClusterNotFoundException");

    create(&cloud, "mu-environment-dev", CLUSTER_TEMPLATE).await;
    let result = cloud.run_task(request).await.unwrap();
    assert_eq!(result.task_arns.len(), 1);
    assert_eq!(cloud.task_commands(), vec![vec!["echo".to_string(), "hi".to_string()]]);

    let instances = cloud.list_instances("mu-environment-dev").await.unwrap();
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0].instance_type, "t3.small");
    assert!(cloud.list_instances("mu-environment-prod").await.is_err());
}

#[tokio::test]
async fn test_log_events_filter_and_missing_group() {
    let cloud = cloud();
    let err = cloud.filter_log_events("missing", 0, "", None).await.unwrap_err();
    assert!(err.is(codes::RESOURCE_NOT_FOUND));

    cloud.put_log_events("mu-dev-web", "web/1", &["GET /health", "boom error", "GET /"]);
    let page = cloud.filter_log_events("mu-dev-web", 0, "GET", None).await.unwrap();
    let messages: Vec<_> = page.events.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["GET /health", "GET /"]);

    let future = chrono::Utc::now().timestamp_millis() + 60_000;
    assert!(cloud.filter_log_events("mu-dev-web", future, "", None).await.unwrap().events.is_empty());
}

#[tokio::test]
async fn test_missing_pipeline_state() {
    let cloud = cloud();
    let err = cloud.get_pipeline_state("mu-web").await.unwrap_err();
    assert_eq!(err.code, "PipelineNotFoundException");
}

#[tokio::test]
async fn test_kubernetes_namespace_lifecycle() {
    let cloud = cloud();
    let manifest = "\
apiVersion: v1
kind: Namespace
metadata:
  name: mu-web
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: mu-web
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: shared
";
    cloud.upsert_resources("mu-environment-k8s", manifest).await.unwrap();
    assert_eq!(
        cloud.kubernetes_resources("mu-environment-k8s"),
        vec!["default/ConfigMap/shared", "mu-web/Deployment/web", "mu-web/Namespace/mu-web"]
    );

    cloud.delete_namespace("mu-environment-k8s", "mu-web").await.unwrap();
    assert_eq!(cloud.kubernetes_resources("mu-environment-k8s"), vec!["default/ConfigMap/shared"]);
}

#[tokio::test]
async fn test_catalog_artifacts_and_provisioned_products() {
    let cloud = cloud();
    create(&cloud, "mu-product-web", CATALOG_TEMPLATE).await;
    let product_id = cloud.peek_stack("mu-product-web").unwrap().outputs["ProductId"].clone();

    let artifacts = cloud.list_provisioning_artifacts(&product_id).await.unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].name, "1.0");

    cloud
        .create_provisioning_artifact(&product_id, "1.1", "https://example.com/1.1.yml")
        .await
        .unwrap();
    cloud
        .update_provisioning_artifact(&product_id, &artifacts[0].id, false)
        .await
        .unwrap();
    let artifacts = cloud.product_artifacts(&product_id);
    assert_eq!(
        artifacts.iter().map(|a| (a.name.as_str(), a.active)).collect::<Vec<_>>(),
        vec![("1.0", false), ("1.1", true)]
    );

    cloud.add_provisioned_product(&product_id, "team-a");
    let provisioned = cloud.search_provisioned_products(&product_id).await.unwrap();
    assert_eq!(provisioned.len(), 1);
    cloud.terminate_provisioned_product(&provisioned[0].id).await.unwrap();
    assert!(cloud.search_provisioned_products(&product_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_images_are_built_then_pushed() {
    let cloud = cloud();
    create(&cloud, "mu-repo-web", CATALOG_TEMPLATE).await;
    let dir = tempfile::tempdir().unwrap();
    let image = "000000000000.dkr.ecr.local-1.amazonaws.com/mu-web:abc123".to_string();

    assert!(cloud.build_image(dir.path(), "Dockerfile", &[image.clone()]).await.is_err());
    std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
    cloud.build_image(dir.path(), "Dockerfile", &[image.clone()]).await.unwrap();

    let token = cloud.get_authorization_token().await.unwrap();
    let auth = decode_authorization_token(&token, &image).unwrap();
    cloud.push_image(&image, &auth).await.unwrap();

    assert_eq!(cloud.repository_images("mu-web"), Some(vec!["abc123".to_string()]));
    assert_eq!(cloud.pushed_images(), vec![image]);
}
