//! Product catalog: reconciles product versions with the config and tears down
//! products provisioned from them.
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

use crate::kernel::error::{Error, Result};
use crate::provider::error::ApiResult;
use crate::stack::StackManager;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningArtifact {
    pub id: String,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedProduct {
    pub id: String,
    pub name: String,
    /// Id of the stack backing the product
    pub physical_id: String,
}

#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn list_provisioning_artifacts(&self, product_id: &str) -> ApiResult<Vec<ProvisioningArtifact>>;

    async fn create_provisioning_artifact(&self, product_id: &str, name: &str, template_url: &str) -> ApiResult<()>;

    async fn update_provisioning_artifact(&self, product_id: &str, artifact_id: &str, active: bool) -> ApiResult<()>;

    async fn search_provisioned_products(&self, product_id: &str) -> ApiResult<Vec<ProvisionedProduct>>;

    async fn terminate_provisioned_product(&self, provisioned_product_id: &str) -> ApiResult<()>;
}

#[async_trait]
pub trait CatalogManager: Send + Sync {
    /// Make the product's versions match `versions` (name to template URL).
    async fn set_product_versions(&self, product_id: &str, versions: &BTreeMap<String, String>) -> Result<()>;

    async fn terminate_provisioned_products(&self, product_id: &str) -> Result<()>;
}

pub struct ServiceCatalogManager {
    api: Arc<dyn CatalogApi>,
    stacks: Arc<dyn StackManager>,
    dryrun: bool,
}

impl ServiceCatalogManager {
    pub fn new(api: Arc<dyn CatalogApi>, stacks: Arc<dyn StackManager>, dryrun: bool) -> Self {
        Self { api, stacks, dryrun }
    }

    async fn set_artifact_active(&self, product_id: &str, artifact: &ProvisioningArtifact, active: bool) -> Result<()> {
        let (verb, dry_verb) = if active {
            ("Unarchiving", "unarchiving")
        } else {
            ("Archiving", "archiving")
        };
        if self.dryrun {
            info!("  DRYRUN: Skipping {dry_verb} of productVersion '{}'", artifact.name);
            return Ok(());
        }
        info!("  {verb} productVersion '{}'", artifact.name);
        self.api
            .update_provisioning_artifact(product_id, &artifact.id, active)
            .await
            .map_err(|e| Error::provider("UpdateProvisioningArtifact", product_id, e))
    }
}

#[async_trait]
impl CatalogManager for ServiceCatalogManager {
    async fn set_product_versions(&self, product_id: &str, versions: &BTreeMap<String, String>) -> Result<()> {
        let artifacts = if self.dryrun && product_id.is_empty() {
            Vec::new()
        } else {
            self.api
                .list_provisioning_artifacts(product_id)
                .await
                .map_err(|e| Error::provider("ListProvisioningArtifacts", product_id, e))?
        };

        let mut versions_to_add = versions.clone();
        for artifact in &artifacts {
            let wanted = versions_to_add.remove(&artifact.name).is_some();
            if wanted != artifact.active {
                self.set_artifact_active(product_id, artifact, wanted).await?;
            }
        }

        for (version, template_url) in versions_to_add {
            if self.dryrun {
                info!("  DRYRUN: Skipping creation of productVersion '{version}'");
                continue;
            }
            info!("  Creating productVersion '{version}'");
            self.api
                .create_provisioning_artifact(product_id, &version, &template_url)
                .await
                .map_err(|e| Error::provider("CreateProvisioningArtifact", product_id, e))?;
        }
        Ok(())
    }

    async fn terminate_provisioned_products(&self, product_id: &str) -> Result<()> {
        let products = self
            .api
            .search_provisioned_products(product_id)
            .await
            .map_err(|e| Error::provider("SearchProvisionedProducts", product_id, e))?;

        for product in products {
            if self.dryrun {
                info!("  DRYRUN: Skipping termination of provisionedProduct '{}'", product.id);
                continue;
            }
            info!("  Deleting provisionedProduct '{}'", product.id);
            self.api
                .terminate_provisioned_product(&product.id)
                .await
                .map_err(|e| Error::provider("TerminateProvisionedProduct", &product.id, e))?;

            // arn:...:stack/<name>/<id>
            if let Some(stack_name) = product.physical_id.split('/').nth(1) {
                info!("  Deleting stack '{}'", product.physical_id);
                self.stacks.await_final_status(stack_name).await?;
            }
        }
        Ok(())
    }
}
