use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::protocol::error::Result;
use crate::protocol::NodeInfo;
use crate::requisition::IndivisibleRequisition;

/// The surface a worker node exposes to the coordinator.
#[async_trait]
pub trait NodeService: Send + Sync {
    /// Processes one indivisible unit and returns its result.
    async fn process_unit(&self, unit: Arc<dyn IndivisibleRequisition>) -> Result<Value>;

    fn name(&self) -> &str;

    fn clock_amount(&self) -> i64;

    fn memory_amount(&self) -> i64;

    /// Whether the node still accepts work.
    fn is_active(&self) -> bool;

    /// Stops the node.
    async fn finish(&self) -> Result<()>;

    fn info(&self) -> NodeInfo {
        NodeInfo::new(self.name(), self.clock_amount(), self.memory_amount())
    }
}

/// Where a node can be reached.
#[derive(Clone)]
pub enum Endpoint {
    /// A node living in the same process.
    Local(Arc<dyn NodeService>),
    /// A node serving TCP at `host:port`.
    Remote(String),
}

impl Endpoint {
    pub fn local(node: Arc<dyn NodeService>) -> Self {
        Endpoint::Local(node)
    }

    pub fn remote(addr: impl Into<String>) -> Self {
        Endpoint::Remote(addr.into())
    }

    /// TCP address of a remote endpoint.
    pub fn address(&self) -> Option<&str> {
        match self {
            Endpoint::Local(_) => None,
            Endpoint::Remote(addr) => Some(addr),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Local(node) => write!(f, "Local({})", node.name()),
            Endpoint::Remote(addr) => write!(f, "Remote({})", addr),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Local(node) => write!(f, "local:{}", node.name()),
            Endpoint::Remote(addr) => write!(f, "tcp://{}", addr),
        }
    }
}
