//! reqdist worker node
//!
//! A [`ProcessNode`] processes the indivisible units a coordinator sends it
//! and keeps itself under the coordinator's control through a
//! [`ReconnectionMonitor`]. Nodes run in-process next to the coordinator or
//! behind a [`NodeServer`], talking to it through a [`RemoteCoordinator`].

pub mod coordinator_client;
pub mod monitor;
pub mod process_node;
pub mod server;

pub use coordinator_client::RemoteCoordinator;
pub use monitor::{MonitorConfig, ReconnectionMonitor};
pub use process_node::ProcessNode;
pub use server::NodeServer;
