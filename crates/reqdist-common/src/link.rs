use async_trait::async_trait;

use crate::protocol::error::Result;
use crate::transport::Endpoint;

/// What a worker node needs from its coordinator to stay registered.
///
/// The coordinator implements this directly for in-process nodes; remote
/// nodes go through a TCP client speaking the same calls.
#[async_trait]
pub trait CoordinatorLink: Send + Sync {
    /// Publishes the node in the name service and puts it under control.
    ///
    /// Fails with `NodeAlreadyExists` when a reachable node already holds
    /// `name`.
    async fn register_node(&self, name: &str, endpoint: Endpoint) -> Result<()>;

    /// Puts an already published node under control.
    async fn add_to_control(&self, name: &str, endpoint: Endpoint) -> Result<()>;

    async fn controls_node(&self, name: &str) -> Result<bool>;

    /// Withdraws the node from the name service and from control.
    async fn unregister_node(&self, name: &str) -> Result<()>;
}
