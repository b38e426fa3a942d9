use super::{harness, writes_of};
use crate::stack::status;
use crate::workflows::catalog;

const CATALOG_CONFIG: &str = r#"
namespace: mu
catalog:
  iamUsers: [alice, bob]
  pipelines:
    - name: web
      description: Web service pipeline
      versions:
        v1:
          acceptance:
            environment: qa
        v2:
          production:
            disabled: true
"#;

#[tokio::test]
async fn test_upsert_publishes_portfolio_and_products() {
    let h = harness(CATALOG_CONFIG).await;

    catalog::upserter(h.ctx.clone()).execute().await.unwrap();

    for name in [
        "mu-iam-common",
        "mu-bucket-servicecatalog",
        "mu-bucket-codepipeline",
        "mu-bucket-codedeploy",
        "mu-iam-portfolio-common",
        "mu-portfolio-common",
        "mu-product-web",
    ] {
        let stack = h.cloud.peek_stack(name).unwrap_or_else(|| panic!("{name} missing"));
        assert_eq!(stack.status, status::CREATE_COMPLETE, "{name}: {:?}", stack.status_reason);
    }
    let roles = h.cloud.peek_stack("mu-iam-portfolio-common").unwrap();
    assert_eq!(roles.parameters["IAMUserNames"], "alice,bob");
    let product = h.cloud.peek_stack("mu-product-web").unwrap();
    assert_eq!(product.parameters["ProductDescription"], "Web service pipeline");
    assert!(product.parameters["ProductDefaultVersionURL"].ends_with("/default/pipeline.yml"));
}

#[tokio::test]
async fn test_upsert_uploads_templates_per_version() {
    let h = harness(CATALOG_CONFIG).await;

    catalog::upserter(h.ctx.clone()).execute().await.unwrap();

    let bucket = h.cloud.peek_stack("mu-bucket-servicecatalog").unwrap().outputs["Bucket"].clone();
    let keys = h.cloud.bucket_keys(&bucket).unwrap();
    for key in [
        "default/pipeline.yml",
        "default/pipeline-iam.yml",
        "default/service-iam.yml",
        "v1/pipeline.yml",
        "v1/artifact-pipeline-web.yml",
        "v2/service-iam.yml",
        "v2/artifact-pipeline-web.yml",
    ] {
        assert!(keys.iter().any(|k| k == key), "{key} not in {keys:?}");
    }
}

#[tokio::test]
async fn test_upsert_reconciles_product_versions() {
    let h = harness(CATALOG_CONFIG).await;

    catalog::upserter(h.ctx.clone()).execute().await.unwrap();

    let product_id = h.cloud.peek_stack("mu-product-web").unwrap().outputs["ProductId"].clone();
    let active: Vec<String> = h
        .cloud
        .product_artifacts(&product_id)
        .into_iter()
        .filter(|artifact| artifact.active)
        .map(|artifact| artifact.name)
        .collect();
    assert_eq!(active, vec!["v1", "v2"]);

    let creates_before = writes_of(&h.cloud, "CreateProvisioningArtifact").len();
    catalog::upserter(h.ctx.clone()).execute().await.unwrap();
    assert_eq!(writes_of(&h.cloud, "CreateProvisioningArtifact").len(), creates_before);
}

#[tokio::test]
async fn test_terminate_removes_provisioned_products_first() {
    let h = harness(CATALOG_CONFIG).await;
    catalog::upserter(h.ctx.clone()).execute().await.unwrap();
    let product_id = h.cloud.peek_stack("mu-product-web").unwrap().outputs["ProductId"].clone();
    h.cloud.add_provisioned_product(&product_id, "team-a-web");

    catalog::terminator(h.ctx.clone()).execute().await.unwrap();

    let history = h.cloud.history();
    let terminated = history
        .iter()
        .position(|entry| entry.starts_with("TerminateProvisionedProduct"))
        .unwrap();
    let product_deleted = history
        .iter()
        .position(|entry| entry == "DeleteStack mu-product-web")
        .unwrap();
    assert!(terminated < product_deleted);
    assert_eq!(
        writes_of(&h.cloud, "DeleteStack"),
        vec!["DeleteStack mu-product-web", "DeleteStack mu-portfolio-common"]
    );
}
