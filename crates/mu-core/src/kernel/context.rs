//! Per-invocation wiring of managers over one set of provider APIs.
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::artifact::{ArtifactManager, ObjectStoreApi};
use crate::config::Config;
use crate::extensions::{ExtensionsManager, ExtensionsRegistry};
use crate::kernel::constants::{EXTENSIONS_DIR, POLL_INTERVAL, STATE_DIR_NAME, TOOL_NAME, tool_version};
use crate::kernel::error::Result;
use crate::local::LocalCloud;
use crate::param::{ParamManager, ParameterStoreApi};
use crate::provider::{
    CatalogApi, CatalogManager, CloudLogsViewer, ClusterInstanceLister, ClusterTaskManager, CodePipelineManager,
    ContainerTaskApi, ElbRuleLister, ImageBuilder, KubernetesResourceManager, LogsApi, LogsViewer, PipelineManager,
    PipelineStateApi, RegistryApi, RegistryRepositoryManager, RepositoryManager, ServiceCatalogManager, TaskManager,
};
use crate::roleset::{RolesetManager, StackRolesetManager};
use crate::stack::{ProvisioningApi, ProvisioningStackManager, StackManager, StackManagerOptions};

/// `~/.mu`, or a directory under the system temp dir when `HOME` is unset.
pub fn state_dir() -> PathBuf {
    match env::var("HOME") {
        Ok(home) if !home.is_empty() => PathBuf::from(home).join(STATE_DIR_NAME),
        _ => env::temp_dir().join(STATE_DIR_NAME),
    }
}

/// Raw provider APIs a [`Context`] is built on.
#[derive(Clone)]
pub struct ProviderApis {
    pub provisioning: Arc<dyn ProvisioningApi>,
    pub parameters: Arc<dyn ParameterStoreApi>,
    pub objects: Arc<dyn ObjectStoreApi>,
    pub registry: Arc<dyn RegistryApi>,
    pub tasks: Arc<dyn ContainerTaskApi>,
    pub logs: Arc<dyn LogsApi>,
    pub pipelines: Arc<dyn PipelineStateApi>,
    pub catalog: Arc<dyn CatalogApi>,
    pub elb_rules: Arc<dyn ElbRuleLister>,
    pub instances: Arc<dyn ClusterInstanceLister>,
    pub kubernetes: Arc<dyn KubernetesResourceManager>,
    pub images: Arc<dyn ImageBuilder>,
}

impl ProviderApis {
    /// Every API served by one in-process [`LocalCloud`].
    pub fn local(cloud: Arc<LocalCloud>) -> Self {
        Self {
            provisioning: cloud.clone(),
            parameters: cloud.clone(),
            objects: cloud.clone(),
            registry: cloud.clone(),
            tasks: cloud.clone(),
            logs: cloud.clone(),
            pipelines: cloud.clone(),
            catalog: cloud.clone(),
            elb_rules: cloud.clone(),
            instances: cloud.clone(),
            kubernetes: cloud.clone(),
            images: cloud,
        }
    }
}

/// Everything a workflow reaches for.
pub struct Context {
    pub config: Arc<Config>,
    pub stacks: Arc<dyn StackManager>,
    pub params: Arc<ParamManager>,
    pub artifacts: Arc<ArtifactManager>,
    pub rolesets: Arc<dyn RolesetManager>,
    pub repositories: Arc<dyn RepositoryManager>,
    pub tasks: Arc<dyn TaskManager>,
    pub logs: Arc<dyn LogsViewer>,
    pub pipelines: Arc<dyn PipelineManager>,
    pub elb_rules: Arc<dyn ElbRuleLister>,
    pub instances: Arc<dyn ClusterInstanceLister>,
    pub kubernetes: Arc<dyn KubernetesResourceManager>,
    pub catalog: Arc<dyn CatalogManager>,
    pub images: Arc<dyn ImageBuilder>,
    pub extensions: Arc<dyn ExtensionsManager>,
    /// Sleep between polls of long running operations (service restart, log follow).
    pub poll_interval: Duration,
    pub dryrun: bool,
}

impl Context {
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }
}

/// Builder for [`Context`]. Options mirror the global CLI flags.
pub struct ContextBuilder {
    config: Config,
    dryrun: bool,
    dryrun_output: Option<PathBuf>,
    skip_version_check: bool,
    poll_interval: Duration,
    extensions_dir: Option<PathBuf>,
    tool_version: String,
    proxy: Option<String>,
}

impl ContextBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            dryrun: false,
            dryrun_output: None,
            skip_version_check: false,
            poll_interval: POLL_INTERVAL,
            extensions_dir: None,
            tool_version: tool_version().to_string(),
            proxy: None,
        }
    }

    /// Override the namespace of the config; empty keeps it.
    pub fn namespace(mut self, namespace: &str) -> Self {
        if !namespace.is_empty() {
            self.config.namespace = namespace.to_string();
        }
        self
    }

    pub fn dryrun(mut self, dryrun: bool) -> Self {
        self.dryrun = dryrun;
        self
    }

    /// Directory dryrun templates are written to. Defaults to `<tmp>/mu-dryrun`.
    pub fn dryrun_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.dryrun_output = Some(path.into());
        self
    }

    pub fn skip_version_check(mut self, skip: bool) -> Self {
        self.skip_version_check = skip;
        self
    }

    /// Disable IAM management in addition to what the config says.
    pub fn disable_iam(mut self, disable: bool) -> Self {
        self.config.disable_iam |= disable;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Extension cache root. Defaults to `~/.mu/extensions`.
    pub fn extensions_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.extensions_dir = Some(path.into());
        self
    }

    pub fn tool_version(mut self, version: impl Into<String>) -> Self {
        self.tool_version = version.into();
        self
    }

    /// Proxy for outbound HTTP downloads; empty means none.
    pub fn proxy(mut self, proxy: &str) -> Self {
        self.proxy = (!proxy.is_empty()).then(|| proxy.to_string());
        self
    }

    pub async fn build(self, apis: ProviderApis) -> Result<Context> {
        let config = Arc::new(self.config);
        let dryrun = self.dryrun;

        let mut artifacts = ArtifactManager::new(apis.objects.clone(), dryrun);
        if let Some(proxy) = &self.proxy {
            artifacts = artifacts.with_proxy(proxy)?;
        }
        let artifacts = Arc::new(artifacts);
        let extensions_dir = self
            .extensions_dir
            .unwrap_or_else(|| state_dir().join(EXTENSIONS_DIR));
        let extensions: Arc<dyn ExtensionsManager> =
            Arc::new(ExtensionsRegistry::load(&config, &artifacts, &extensions_dir).await);
        let repositories: Arc<dyn RepositoryManager> =
            Arc::new(RegistryRepositoryManager::new(apis.registry.clone(), dryrun));

        let mut options = StackManagerOptions::default()
            .skip_version_check(self.skip_version_check)
            .tool_version(self.tool_version)
            .poll_interval(self.poll_interval);
        if dryrun {
            let output = self
                .dryrun_output
                .unwrap_or_else(|| env::temp_dir().join(format!("{TOOL_NAME}-dryrun")));
            options = options.dryrun(output);
        }
        let stacks: Arc<dyn StackManager> = Arc::new(ProvisioningStackManager::new(
            apis.provisioning.clone(),
            extensions.clone(),
            artifacts.clone(),
            repositories.clone(),
            options,
        ));

        debug!("Built context for namespace '{}'", config.namespace);
        Ok(Context {
            params: Arc::new(ParamManager::new(apis.parameters.clone(), dryrun)),
            rolesets: Arc::new(StackRolesetManager::new(config.clone(), stacks.clone())),
            tasks: Arc::new(ClusterTaskManager::new(apis.tasks.clone(), stacks.clone())),
            logs: Arc::new(CloudLogsViewer::new(apis.logs.clone()).with_poll_interval(self.poll_interval)),
            pipelines: Arc::new(CodePipelineManager::new(apis.pipelines.clone())),
            catalog: Arc::new(ServiceCatalogManager::new(apis.catalog.clone(), stacks.clone(), dryrun)),
            elb_rules: apis.elb_rules,
            instances: apis.instances,
            kubernetes: apis.kubernetes,
            images: apis.images,
            config,
            stacks,
            artifacts,
            repositories,
            extensions,
            poll_interval: self.poll_interval,
            dryrun,
        })
    }
}
