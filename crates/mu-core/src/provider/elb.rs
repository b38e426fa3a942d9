use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::kernel::error::Result;

/// A routing rule on a load balancer listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRule {
    pub arn: String,
    /// `None` for the listener's default rule.
    pub priority: Option<u32>,
}

#[async_trait]
pub trait ElbRuleLister: Send + Sync {
    async fn list_rules(&self, listener_arn: &str) -> Result<Vec<ListenerRule>>;
}

/// Highest priority among `rules`, 0 when only the default rule exists.
pub fn max_priority(rules: &[ListenerRule]) -> u32 {
    rules.iter().filter_map(|rule| rule.priority).max().unwrap_or(0)
}
