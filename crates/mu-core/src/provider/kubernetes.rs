//! Kubernetes resources applied to an environment's cluster.
use async_trait::async_trait;
use serde::Deserialize;

use crate::kernel::error::{Error, Result};

/// Identity of one document of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubernetesResource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub body: serde_yaml::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceHeader {
    api_version: String,
    kind: String,
    metadata: ResourceMetadata,
}

#[derive(Deserialize)]
struct ResourceMetadata {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

/// Split a multi-document YAML manifest into resources. Empty documents are skipped.
pub fn parse_manifest(manifest: &str) -> Result<Vec<KubernetesResource>> {
    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let body = serde_yaml::Value::deserialize(document).map_err(|e| Error::parse("manifest", "kubernetes", e))?;
        if body.is_null() {
            continue;
        }
        let header: ResourceHeader =
            serde_yaml::from_value(body.clone()).map_err(|e| Error::parse("manifest", "kubernetes", e))?;
        resources.push(KubernetesResource {
            api_version: header.api_version,
            kind: header.kind,
            name: header.metadata.name,
            namespace: header.metadata.namespace,
            body,
        });
    }
    Ok(resources)
}

#[async_trait]
pub trait KubernetesResourceManager: Send + Sync {
    /// Create or replace every resource of `manifest` in `cluster`.
    async fn upsert_resources(&self, cluster: &str, manifest: &str) -> Result<()>;

    /// Delete a namespace and everything in it.
    async fn delete_namespace(&self, cluster: &str, namespace: &str) -> Result<()>;
}
