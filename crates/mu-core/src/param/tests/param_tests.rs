use std::sync::Arc;

use async_trait::async_trait;

use crate::kernel::error::Error;
use crate::local::LocalCloud;
use crate::param::{ParamManager, Parameter, ParameterStoreApi};
use crate::provider::error::{ApiError, ApiResult};

// Store whose every call is denied
struct DeniedStore;

#[async_trait]
impl ParameterStoreApi for DeniedStore {
    async fn put_parameter(&self, _name: &str, _value: &str, _key_id: &str) -> ApiResult<i64> {
        Err(ApiError::new("AccessDenied", "not allowed"))
    }

    async fn get_parameter(&self, _name: &str) -> ApiResult<Parameter> {
        Err(ApiError::new("AccessDenied", "not allowed"))
    }

    async fn delete_parameter(&self, _name: &str) -> ApiResult<()> {
        Err(ApiError::new("AccessDenied", "not allowed"))
    }
}

#[tokio::test]
async fn test_set_get_and_version() {
    let cloud = Arc::new(LocalCloud::new());
    let params = ParamManager::new(cloud.clone(), false);

    assert_eq!(params.get_param("db-password").await.unwrap(), "");
    assert_eq!(params.param_version("db-password").await.unwrap(), 0);

    params.set_param("db-password", "first", "key-1").await.unwrap();
    params.set_param("db-password", "second", "key-1").await.unwrap();

    assert_eq!(params.get_param("db-password").await.unwrap(), "second");
    assert_eq!(params.param_version("db-password").await.unwrap(), 2);
    assert_eq!(cloud.parameter("db-password").unwrap().value, "second");
}

#[tokio::test]
async fn test_delete_missing_param_succeeds() {
    let cloud = Arc::new(LocalCloud::new());
    let params = ParamManager::new(cloud.clone(), false);

    params.set_param("token", "abc", "").await.unwrap();
    params.delete_param("token").await.unwrap();
    params.delete_param("token").await.unwrap();

    assert!(cloud.parameter("token").is_none());
    assert_eq!(cloud.history(), vec!["PutParameter token", "DeleteParameter token"]);
}

#[tokio::test]
async fn test_dryrun_writes_nothing() {
    let cloud = Arc::new(LocalCloud::new());
    let params = ParamManager::new(cloud.clone(), true);

    params.set_param("token", "abc", "").await.unwrap();
    params.delete_param("token").await.unwrap();

    assert_eq!(cloud.write_count(), 0);
}

#[tokio::test]
async fn test_other_errors_propagate() {
    let params = ParamManager::new(Arc::new(DeniedStore), false);

    let err = params.get_param("token").await.unwrap_err();
    assert!(matches!(err, Error::Provider { ref operation, .. } if operation == "GetParameter"));
    assert_eq!(err.api_code(), Some("AccessDenied"));

    assert!(params.delete_param("token").await.is_err());
    assert!(params.set_param("token", "x", "").await.is_err());
}
