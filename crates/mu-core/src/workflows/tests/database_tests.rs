use super::{Harness, harness, writes_of};
use crate::stack::status;
use crate::workflows::{database, environment};

const DB_CONFIG: &str = r#"
namespace: mu
environments:
  - name: dev
service:
  name: my-svc
  database:
    name: mydb
"#;

const PASSWORD_PARAM: &str = "mu-database-my-svc-dev-DatabaseMasterPassword";

async fn with_environment(yaml: &str) -> Harness {
    let h = harness(yaml).await;
    environment::upserter(h.ctx.clone(), "dev").execute().await.unwrap();
    h
}

#[tokio::test]
async fn test_upsert_generates_and_stores_password() {
    let h = with_environment(DB_CONFIG).await;

    database::upserter(h.ctx.clone(), "dev").execute().await.unwrap();

    let stack = h.cloud.peek_stack("mu-database-my-svc-dev").unwrap();
    assert_eq!(stack.status, status::CREATE_COMPLETE, "{:?}", stack.status_reason);
    let stored = h.ctx.params.get_param(PASSWORD_PARAM).await.unwrap();
    assert_eq!(stored.len(), 32);
    assert!(stored.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_eq!(database::get_password(&h.ctx, "dev", "").await.unwrap(), stored);
}

#[tokio::test]
async fn test_second_upsert_reuses_password() {
    let h = with_environment(DB_CONFIG).await;
    database::upserter(h.ctx.clone(), "dev").execute().await.unwrap();
    let first = h.ctx.params.get_param(PASSWORD_PARAM).await.unwrap();

    database::upserter(h.ctx.clone(), "dev").execute().await.unwrap();

    assert_eq!(h.ctx.params.get_param(PASSWORD_PARAM).await.unwrap(), first);
    assert_eq!(writes_of(&h.cloud, "PutParameter").len(), 1);
}

#[tokio::test]
async fn test_terminate_removes_password() {
    let h = with_environment(DB_CONFIG).await;
    database::upserter(h.ctx.clone(), "dev").execute().await.unwrap();

    database::terminator(h.ctx.clone(), "dev", "").execute().await.unwrap();

    assert_eq!(h.ctx.params.get_param(PASSWORD_PARAM).await.unwrap(), "");
    assert_eq!(writes_of(&h.cloud, "DeleteStack"), vec!["DeleteStack mu-database-my-svc-dev"]);
}

#[tokio::test]
async fn test_set_password_replaces_value() {
    let h = with_environment(DB_CONFIG).await;
    database::upserter(h.ctx.clone(), "dev").execute().await.unwrap();

    database::set_password(&h.ctx, "dev", "my-svc", "s3cret").await.unwrap();

    assert_eq!(database::get_password(&h.ctx, "dev", "my-svc").await.unwrap(), "s3cret");
}

#[tokio::test]
async fn test_upsert_without_database_does_nothing() {
    let h = harness(super::DEV_CONFIG).await;

    database::upserter(h.ctx.clone(), "dev").execute().await.unwrap();

    assert_eq!(h.cloud.write_count(), 0);
}

#[tokio::test]
async fn test_list_is_keyed_by_service() {
    let h = with_environment(DB_CONFIG).await;
    database::upserter(h.ctx.clone(), "dev").execute().await.unwrap();

    let summaries = database::list(&h.ctx).await.unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].subject, "my-svc");
    assert_eq!(summaries[0].stack, "mu-database-my-svc-dev");
}
