use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::endpoint::Endpoint;
use super::tcp::TcpTransport;
use crate::protocol::error::{ReqdistError, Result};
use crate::protocol::{Call, NodeInfo};
use crate::requisition::IndivisibleRequisition;

/// Calls the coordinator makes on worker nodes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Ships `unit` to the node and waits for its result.
    async fn call(&self, endpoint: &Endpoint, unit: Arc<dyn IndivisibleRequisition>) -> Result<Value>;

    /// Fetches the node's name and declared capacity.
    async fn describe(&self, endpoint: &Endpoint) -> Result<NodeInfo>;

    /// Asks the node to stop.
    async fn finish(&self, endpoint: &Endpoint) -> Result<()>;
}

/// [`Transport`] for in-process and TCP endpoints.
///
/// Processing calls are bounded by the connect timeout only. `describe` and
/// `finish` are control calls and are bounded as a whole by the same value,
/// so a hung node cannot stall registration.
#[derive(Debug, Clone, Default)]
pub struct NodeTransport {
    tcp: TcpTransport,
}

impl NodeTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            tcp: TcpTransport::new(connect_timeout),
        }
    }

    async fn control_call(&self, addr: &str, call: Call) -> Result<Value> {
        let timeout = self.tcp.connect_timeout();
        tokio::time::timeout(timeout, self.tcp.call(addr, call))
            .await
            .map_err(|_| ReqdistError::Timeout(timeout.as_millis() as u64))?
    }
}

#[async_trait]
impl Transport for NodeTransport {
    async fn call(&self, endpoint: &Endpoint, unit: Arc<dyn IndivisibleRequisition>) -> Result<Value> {
        match endpoint {
            Endpoint::Local(node) => node.process_unit(unit).await,
            Endpoint::Remote(addr) => {
                let wire = unit.to_wire().ok_or_else(|| {
                    ReqdistError::InvalidRequest(
                        "requisition has no wire form and cannot be sent to a remote node".into(),
                    )
                })?;
                self.tcp.call(addr, Call::ProcessUnit(wire)).await
            }
        }
    }

    async fn describe(&self, endpoint: &Endpoint) -> Result<NodeInfo> {
        match endpoint {
            Endpoint::Local(node) if node.is_active() => Ok(node.info()),
            Endpoint::Local(node) => Err(ReqdistError::NodeInactive(node.name().to_string())),
            Endpoint::Remote(addr) => {
                let value = self.control_call(addr, Call::Describe).await?;
                serde_json::from_value(value)
                    .map_err(|e| ReqdistError::InvalidResponse(format!("bad node description: {}", e)))
            }
        }
    }

    async fn finish(&self, endpoint: &Endpoint) -> Result<()> {
        match endpoint {
            Endpoint::Local(node) => node.finish().await,
            Endpoint::Remote(addr) => self.control_call(addr, Call::Finish).await.map(|_| ()),
        }
    }
}
