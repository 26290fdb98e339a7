use async_trait::async_trait;
use reqdist_common::link::CoordinatorLink;
use reqdist_common::protocol::error::{ReqdistError, Result};
use reqdist_common::protocol::Call;
use reqdist_common::transport::{Endpoint, TcpTransport};
use serde_json::Value;

/// [`CoordinatorLink`] to a coordinator served over TCP.
///
/// Only remote endpoints can be registered this way, since the coordinator
/// has to dial the node back.
#[derive(Debug, Clone)]
pub struct RemoteCoordinator {
    addr: String,
    tcp: TcpTransport,
}

impl RemoteCoordinator {
    pub fn new(addr: impl Into<String>, tcp: TcpTransport) -> Self {
        Self { addr: addr.into(), tcp }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(&self, call: Call) -> Result<Value> {
        self.tcp.call(&self.addr, call).await
    }
}

fn node_addr(endpoint: &Endpoint) -> Result<String> {
    endpoint.address().map(str::to_string).ok_or_else(|| {
        ReqdistError::InvalidRequest("a remote coordinator can only reach TCP endpoints".into())
    })
}

#[async_trait]
impl CoordinatorLink for RemoteCoordinator {
    async fn register_node(&self, name: &str, endpoint: Endpoint) -> Result<()> {
        let addr = node_addr(&endpoint)?;
        self.call(Call::RegisterNode {
            name: name.to_string(),
            addr,
        })
        .await
        .map(|_| ())
    }

    async fn add_to_control(&self, name: &str, endpoint: Endpoint) -> Result<()> {
        let addr = node_addr(&endpoint)?;
        self.call(Call::AddToControl {
            name: name.to_string(),
            addr,
        })
        .await
        .map(|_| ())
    }

    async fn controls_node(&self, name: &str) -> Result<bool> {
        let value = self.call(Call::ControlsNode { name: name.to_string() }).await?;
        value
            .as_bool()
            .ok_or_else(|| ReqdistError::InvalidResponse(format!("expected a boolean, got {}", value)))
    }

    async fn unregister_node(&self, name: &str) -> Result<()> {
        self.call(Call::UnregisterNode { name: name.to_string() })
            .await
            .map(|_| ())
    }
}
