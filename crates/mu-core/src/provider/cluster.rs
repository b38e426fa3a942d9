use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::kernel::error::Result;

/// A host registered with a container cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInstance {
    pub instance_id: String,
    pub instance_type: String,
    pub availability_zone: String,
    pub private_ip: String,
    pub status: String,
    pub agent_connected: bool,
    pub running_tasks: u32,
    pub pending_tasks: u32,
    pub remaining_cpu: u32,
    pub remaining_memory: u32,
}

#[async_trait]
pub trait ClusterInstanceLister: Send + Sync {
    async fn list_instances(&self, cluster: &str) -> Result<Vec<ContainerInstance>>;
}
