//! # Provider Capabilities
//!
//! Thin interfaces over the runtime services of the cloud provider. Workflows talk
//! to these traits only; a concrete backend (the in-process [`crate::local::LocalCloud`]
//! or an SDK-backed one) implements them.
//!
//! Where a capability carries logic of its own (paging, reconciliation, parsing)
//! it is split into a raw `*Api` trait and a manager that implements the
//! workflow-facing trait on top of it.
pub mod catalog;
pub mod cluster;
pub mod elb;
pub mod error;
pub mod image;
pub mod kubernetes;
pub mod logs;
pub mod pipeline;
pub mod repository;
pub mod tasks;

pub use catalog::{CatalogApi, CatalogManager, ServiceCatalogManager};
pub use cluster::{ClusterInstanceLister, ContainerInstance};
pub use elb::{ElbRuleLister, ListenerRule};
pub use error::{ApiError, ApiResult, NO_UPDATES_MESSAGE, codes};
pub use image::ImageBuilder;
pub use kubernetes::KubernetesResourceManager;
pub use logs::{CloudLogsViewer, LogEvent, LogsApi, LogsViewer};
pub use pipeline::{CodePipelineManager, GitInfo, GitProvider, PipelineManager, PipelineStateApi};
pub use repository::{RegistryApi, RegistryAuth, RegistryRepositoryManager, RepositoryManager};
pub use tasks::{ClusterTaskManager, ContainerTaskApi, Task, TaskManager};

#[cfg(test)]
mod tests;
