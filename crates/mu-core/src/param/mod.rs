//! # Parameter Manager
//!
//! Versioned, encrypted named parameters. The only consumer in the core is the
//! database workflow, which keeps each database's master password under
//! `<database-stack>-DatabaseMasterPassword`.
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::kernel::error::{Error, Result};
use crate::provider::error::{ApiResult, codes};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
    pub version: i64,
}

/// Raw parameter store API.
#[async_trait]
pub trait ParameterStoreApi: Send + Sync {
    /// Store a secure string, overwriting any current value. Returns the new version.
    async fn put_parameter(&self, name: &str, value: &str, key_id: &str) -> ApiResult<i64>;

    /// Fails with [`codes::PARAMETER_NOT_FOUND`] when absent.
    async fn get_parameter(&self, name: &str) -> ApiResult<Parameter>;

    /// Fails with [`codes::PARAMETER_NOT_FOUND`] when absent.
    async fn delete_parameter(&self, name: &str) -> ApiResult<()>;
}

pub struct ParamManager {
    api: Arc<dyn ParameterStoreApi>,
    dryrun: bool,
}

impl ParamManager {
    pub fn new(api: Arc<dyn ParameterStoreApi>, dryrun: bool) -> Self {
        Self { api, dryrun }
    }

    /// Store `value` under `name`, encrypted with `key_ref`.
    pub async fn set_param(&self, name: &str, value: &str, key_ref: &str) -> Result<()> {
        if self.dryrun {
            info!("  DRYRUN: Skipping update of param '{name}'");
            return Ok(());
        }
        debug!("Setting param '{name}'");
        self.api
            .put_parameter(name, value, key_ref)
            .await
            .map(|_| ())
            .map_err(|e| Error::provider("PutParameter", name, e))
    }

    /// Decrypted value of `name`, or an empty string when it does not exist.
    pub async fn get_param(&self, name: &str) -> Result<String> {
        debug!("Getting param '{name}'");
        Ok(self.lookup(name).await?.map(|p| p.value).unwrap_or_default())
    }

    /// Current version of `name`, 0 when it does not exist.
    pub async fn param_version(&self, name: &str) -> Result<i64> {
        debug!("Checking version of param '{name}'");
        Ok(self.lookup(name).await?.map_or(0, |p| p.version))
    }

    /// Delete `name`; deleting a missing parameter succeeds.
    pub async fn delete_param(&self, name: &str) -> Result<()> {
        if self.dryrun {
            info!("  DRYRUN: Skipping delete of param '{name}'");
            return Ok(());
        }
        debug!("Deleting param '{name}'");
        match self.api.delete_parameter(name).await {
            Ok(()) => Ok(()),
            Err(err) if err.is(codes::PARAMETER_NOT_FOUND) => Ok(()),
            Err(err) => Err(Error::provider("DeleteParameter", name, err)),
        }
    }

    async fn lookup(&self, name: &str) -> Result<Option<Parameter>> {
        match self.api.get_parameter(name).await {
            Ok(parameter) => Ok(Some(parameter)),
            Err(err) if err.is(codes::PARAMETER_NOT_FOUND) => Ok(None),
            Err(err) => Err(Error::provider("GetParameter", name, err)),
        }
    }
}

#[cfg(test)]
mod tests;
