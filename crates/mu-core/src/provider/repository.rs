//! Container image repositories: registry credentials and repository cleanup.
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, info};
use serde::Serialize;

use crate::kernel::error::{Error, Result};
use crate::provider::error::{ApiResult, codes};

/// Maximum number of image ids accepted by one batch delete.
const DELETE_BATCH_SIZE: usize = 100;

#[async_trait]
pub trait RegistryApi: Send + Sync {
    async fn list_image_ids(&self, repository: &str) -> ApiResult<Vec<String>>;

    async fn batch_delete_images(&self, repository: &str, image_ids: &[String]) -> ApiResult<()>;

    /// Base64 encoded `user:password` token for the account's registry.
    async fn get_authorization_token(&self) -> ApiResult<String>;
}

#[async_trait]
pub trait RepositoryManager: Send + Sync {
    async fn authenticate_repository(&self, repo_url: &str) -> Result<RegistryAuth>;

    /// Delete every image in the repository. Missing repositories are ignored.
    async fn empty_repository(&self, name: &str) -> Result<()>;
}

/// Credentials for pushing to a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    #[serde(rename = "serveraddress")]
    pub server_address: String,
}

impl RegistryAuth {
    /// Encoded form passed to an image push.
    pub fn encoded(&self) -> Result<String> {
        let json = serde_json::to_vec(self).map_err(|e| Error::serialization("registry auth", e))?;
        Ok(STANDARD.encode(json))
    }
}

/// Decode a `user:password` authorization token issued for `repo_url`.
pub fn decode_authorization_token(token: &str, repo_url: &str) -> Result<RegistryAuth> {
    let decoded = STANDARD
        .decode(token.trim())
        .map_err(|e| Error::parse("authorization token", "<redacted>", e))?;
    let decoded = String::from_utf8(decoded).map_err(|e| Error::parse("authorization token", "<redacted>", e))?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| Error::parse("authorization token", "<redacted>", "expected 'user:password'"))?;

    let server_address = repo_url
        .trim_start_matches("https://")
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string();

    Ok(RegistryAuth {
        username: username.to_string(),
        password: password.to_string(),
        server_address,
    })
}

pub struct RegistryRepositoryManager {
    api: Arc<dyn RegistryApi>,
    dryrun: bool,
}

impl RegistryRepositoryManager {
    pub fn new(api: Arc<dyn RegistryApi>, dryrun: bool) -> Self {
        Self { api, dryrun }
    }
}

#[async_trait]
impl RepositoryManager for RegistryRepositoryManager {
    async fn authenticate_repository(&self, repo_url: &str) -> Result<RegistryAuth> {
        debug!("Authenticating to repository '{repo_url}'");
        let token = self
            .api
            .get_authorization_token()
            .await
            .map_err(|e| Error::provider("GetAuthorizationToken", repo_url, e))?;
        decode_authorization_token(&token, repo_url)
    }

    async fn empty_repository(&self, name: &str) -> Result<()> {
        if self.dryrun {
            info!("  DRYRUN: Skipping deletion of images in repository '{name}'");
            return Ok(());
        }

        let image_ids = match self.api.list_image_ids(name).await {
            Ok(ids) => ids,
            Err(err) if err.is(codes::REPOSITORY_NOT_FOUND) => {
                debug!("Repository '{name}' does not exist");
                return Ok(());
            }
            Err(err) => return Err(Error::provider("ListImages", name, err)),
        };

        for batch in image_ids.chunks(DELETE_BATCH_SIZE) {
            debug!("Deleting {} images from repository '{name}'", batch.len());
            self.api
                .batch_delete_images(name, batch)
                .await
                .map_err(|e| Error::provider("BatchDeleteImage", name, e))?;
        }
        Ok(())
    }
}
