use std::sync::Arc;

use reqdist_common::protocol::error::{ReqdistError, Result};
use reqdist_common::protocol::{Call, RequisitionCatalog};
use reqdist_common::transport::{NodeService, TcpServer};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::process_node::ProcessNode;

/// Serves a [`ProcessNode`] to the coordinator over TCP.
///
/// Incoming units are rebuilt through the node's [`RequisitionCatalog`];
/// unknown kinds are rejected as invalid requests.
pub struct NodeServer {
    node: Arc<ProcessNode>,
    catalog: Arc<RequisitionCatalog>,
    server: TcpServer,
}

impl NodeServer {
    pub async fn bind(node: Arc<ProcessNode>, catalog: RequisitionCatalog, bind_addr: &str) -> Result<Self> {
        let server = TcpServer::new(bind_addr).await?;
        Ok(Self {
            node,
            catalog: Arc::new(catalog),
            server,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.server.local_addr()
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Node {} listening on {}", self.node.name(), self.local_addr()?);
        let node = self.node.clone();
        let catalog = self.catalog.clone();
        self.server
            .run_with_handler(
                move |call| handle_call(node.clone(), catalog.clone(), call),
                shutdown,
            )
            .await
    }
}

async fn handle_call(node: Arc<ProcessNode>, catalog: Arc<RequisitionCatalog>, call: Call) -> Result<Value> {
    match call {
        Call::ProcessUnit(wire) => {
            let unit = catalog.decode(wire)?;
            node.process_unit(unit).await
        }
        Call::Describe if node.is_active() => Ok(serde_json::to_value(node.node_info())?),
        Call::Describe => Err(ReqdistError::NodeInactive(node.name().to_string())),
        Call::Finish => {
            node.finish().await?;
            Ok(Value::Null)
        }
        other => Err(ReqdistError::InvalidRequest(format!(
            "{} is not served by worker nodes",
            other.method()
        ))),
    }
}
