//! Coordinator and worker node talking over real sockets.

use std::sync::Arc;
use std::time::Duration;

use reqdist_common::link::CoordinatorLink;
use reqdist_common::protocol::error::{ReqdistError, Result};
use reqdist_common::protocol::{RequisitionCatalog, WireRequisition};
use reqdist_common::requisition::{IndivisibleRequisition, Requisition};
use reqdist_common::transport::TcpTransport;
use reqdist_coordinator::{Coordinator, CoordinatorServer};
use reqdist_node::{NodeServer, ProcessNode, RemoteCoordinator};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Serialize, Deserialize)]
struct Square {
    value: i64,
}

impl IndivisibleRequisition for Square {
    fn process(&self) -> Result<Value> {
        Ok(json!(self.value * self.value))
    }

    fn processing_factor(&self) -> i64 {
        10
    }

    fn to_wire(&self) -> Option<WireRequisition> {
        WireRequisition::from_serde("square", self).ok()
    }
}

/// Side-effect-only unit whose result is `null`.
#[derive(Serialize, Deserialize)]
struct Touch;

impl IndivisibleRequisition for Touch {
    fn process(&self) -> Result<Value> {
        Ok(Value::Null)
    }

    fn to_wire(&self) -> Option<WireRequisition> {
        WireRequisition::from_serde("touch", self).ok()
    }
}

/// A coordinator served on an ephemeral port.
async fn serve_coordinator(shutdown: &CancellationToken) -> (Arc<Coordinator>, String) {
    let coordinator = Arc::new(Coordinator::new());
    let server = CoordinatorServer::bind(coordinator.clone(), "127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap().to_string();

    let shutdown = shutdown.clone();
    tokio::spawn(async move { server.run(shutdown).await });
    (coordinator, addr)
}

/// A worker node serving TCP and registered with the coordinator at
/// `coordinator_addr`.
async fn serve_node(
    name: &str,
    coordinator_addr: &str,
    shutdown: &CancellationToken,
) -> (Arc<ProcessNode>, JoinHandle<Result<()>>) {
    let link: Arc<dyn CoordinatorLink> = Arc::new(RemoteCoordinator::new(
        coordinator_addr,
        TcpTransport::new(Duration::from_secs(2)),
    ));
    let node = ProcessNode::new(name, 100, 100, link);

    let mut catalog = RequisitionCatalog::new();
    catalog.register_serde::<Square>("square");
    catalog.register_serde::<Touch>("touch");
    let server = NodeServer::bind(node.clone(), catalog, "127.0.0.1:0").await.unwrap();
    node.set_advertised_addr(server.local_addr().unwrap().to_string());

    let shutdown = shutdown.clone();
    let serving = tokio::spawn(async move { server.run(shutdown).await });
    node.register().await.unwrap();
    (node, serving)
}

#[tokio::test]
async fn test_remote_node_processes_units() {
    let shutdown = CancellationToken::new();
    let (coordinator, addr) = serve_coordinator(&shutdown).await;
    let (node, _serving) = serve_node("remote-1", &addr, &shutdown).await;

    assert!(coordinator.controls_node("remote-1"));
    let described = &coordinator.controlled_nodes()[0];
    assert_eq!((described.clock, described.memory), (100, 100));

    let result = coordinator
        .submit(Requisition::indivisible(Square { value: 7 }))
        .await
        .unwrap();
    assert_eq!(result, json!(49));
    assert_eq!(node.incoming(), 1);

    coordinator.finish().await.unwrap();
    shutdown.cancel();
}

#[tokio::test]
async fn test_null_result_crosses_the_wire() {
    let shutdown = CancellationToken::new();
    let (coordinator, addr) = serve_coordinator(&shutdown).await;
    let (node, _serving) = serve_node("remote-1", &addr, &shutdown).await;

    let result = coordinator.submit(Requisition::indivisible(Touch)).await.unwrap();
    assert_eq!(result, Value::Null);
    assert_eq!(node.incoming(), 1);
    // A null result is not a communication failure
    assert!(coordinator.controls_node("remote-1"));

    coordinator.finish().await.unwrap();
    shutdown.cancel();
}

#[tokio::test]
async fn test_unit_without_wire_form_is_rejected() {
    struct LocalOnly;

    impl IndivisibleRequisition for LocalOnly {
        fn process(&self) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    let shutdown = CancellationToken::new();
    let (coordinator, addr) = serve_coordinator(&shutdown).await;
    let (_node, _serving) = serve_node("remote-1", &addr, &shutdown).await;

    let result = coordinator.submit(Requisition::indivisible(LocalOnly)).await;
    assert!(matches!(result, Err(ReqdistError::InvalidRequest(_))), "{result:?}");
    assert!(coordinator.controls_node("remote-1"));
    shutdown.cancel();
}

#[tokio::test]
async fn test_stopped_node_is_evicted() {
    let coordinator_shutdown = CancellationToken::new();
    let node_shutdown = CancellationToken::new();
    let (coordinator, addr) = serve_coordinator(&coordinator_shutdown).await;
    let (_node, serving) = serve_node("remote-1", &addr, &node_shutdown).await;

    node_shutdown.cancel();
    serving.await.unwrap().unwrap();

    let result = coordinator.submit(Requisition::indivisible(Square { value: 3 })).await;
    assert!(matches!(result, Err(ReqdistError::NoNodesAvailable)), "{result:?}");
    assert!(!coordinator.controls_node("remote-1"));
    coordinator_shutdown.cancel();
}
