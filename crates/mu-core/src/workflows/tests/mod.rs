use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::config::{Config, load_config_str};
use crate::kernel::{Context, ContextBuilder, ProviderApis};
use crate::local::LocalCloud;

#[cfg(test)]
mod catalog_tests;
#[cfg(test)]
mod database_tests;
#[cfg(test)]
mod environment_tests;
#[cfg(test)]
mod init_tests;
#[cfg(test)]
mod logs_tests;
#[cfg(test)]
mod pipeline_tests;

pub(super) const DEV_CONFIG: &str = r#"
namespace: mu
environments:
  - name: dev
    cluster:
      minSize: 1
      maxSize: 2
service:
  name: my-svc
  port: 8080
  pathPatterns: ["/*"]
"#;

/// A local cloud and a context over it. The temp dir holds the extension cache.
pub(super) struct Harness {
    pub cloud: Arc<LocalCloud>,
    pub ctx: Arc<Context>,
    _dir: TempDir,
}

pub(super) fn config(yaml: &str) -> Config {
    load_config_str(yaml, Path::new("mu.yml")).unwrap()
}

pub(super) fn local_cloud() -> Arc<LocalCloud> {
    Arc::new(LocalCloud::new().with_settle_polls(0))
}

pub(super) async fn harness_on(
    cloud: Arc<LocalCloud>,
    config: Config,
    customize: impl FnOnce(ContextBuilder) -> ContextBuilder,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let builder = ContextBuilder::new(config)
        .poll_interval(Duration::ZERO)
        .extensions_dir(dir.path().join("extensions"));
    let ctx = customize(builder)
        .build(ProviderApis::local(cloud.clone()))
        .await
        .unwrap();
    Harness {
        cloud,
        ctx: Arc::new(ctx),
        _dir: dir,
    }
}

pub(super) async fn harness(yaml: &str) -> Harness {
    harness_on(local_cloud(), config(yaml), |builder| builder).await
}

/// Entries of the cloud's write history that start with `action`.
pub(super) fn writes_of(cloud: &LocalCloud, action: &str) -> Vec<String> {
    cloud
        .history()
        .into_iter()
        .filter(|entry| entry.starts_with(action))
        .collect()
}
