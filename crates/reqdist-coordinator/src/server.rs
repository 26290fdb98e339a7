use std::sync::Arc;

use reqdist_common::protocol::error::{ReqdistError, Result};
use reqdist_common::protocol::Call;
use reqdist_common::transport::{Endpoint, TcpServer};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::coordinator::Coordinator;

/// Serves the worker link calls of a [`Coordinator`] over TCP.
///
/// Remote nodes register with the address their own server listens on; the
/// coordinator reaches them back through it.
pub struct CoordinatorServer {
    coordinator: Arc<Coordinator>,
    server: TcpServer,
}

impl CoordinatorServer {
    /// Binds the server to `bind_addr` (e.g. `"0.0.0.0:7100"`).
    pub async fn bind(coordinator: Arc<Coordinator>, bind_addr: &str) -> Result<Self> {
        let server = TcpServer::new(bind_addr).await?;
        Ok(Self { coordinator, server })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.server.local_addr()
    }

    /// Serves until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Coordinator listening on {}", self.local_addr()?);
        let coordinator = self.coordinator.clone();
        self.server
            .run_with_handler(move |call| handle_call(coordinator.clone(), call), shutdown)
            .await
    }
}

async fn handle_call(coordinator: Arc<Coordinator>, call: Call) -> Result<Value> {
    match call {
        Call::RegisterNode { name, addr } => {
            coordinator.register_node(&name, Endpoint::remote(addr)).await?;
            Ok(Value::Null)
        }
        Call::AddToControl { name, addr } => {
            coordinator.add_to_control(&name, Endpoint::remote(addr)).await?;
            Ok(Value::Null)
        }
        Call::ControlsNode { name } => Ok(json!(coordinator.controls_node(&name))),
        Call::UnregisterNode { name } => {
            coordinator.unregister_node(&name).await?;
            Ok(Value::Null)
        }
        other => Err(ReqdistError::InvalidRequest(format!(
            "{} is not served by the coordinator",
            other.method()
        ))),
    }
}
