use std::path::Path;

use async_trait::async_trait;

use crate::kernel::error::Result;
use crate::provider::repository::RegistryAuth;

/// Builds and pushes container images.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build `dockerfile` (relative to `context_dir`) and tag the result with every entry of `tags`.
    async fn build_image(&self, context_dir: &Path, dockerfile: &str, tags: &[String]) -> Result<()>;

    async fn push_image(&self, image: &str, auth: &RegistryAuth) -> Result<()>;
}
