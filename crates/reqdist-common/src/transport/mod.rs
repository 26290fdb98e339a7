//! Transport layer
//!
//! Everything the coordinator and the worker nodes use to reach each other:
//!
//! - **[`JsonCodec`]**: JSON encoding of protocol envelopes
//! - **[`TcpTransport`]**: async TCP client with a bounded connect time
//! - **[`TcpServer`]**: async TCP server driving a request handler
//! - **[`Transport`]** / **[`NodeTransport`]**: the calls a coordinator makes
//!   on a node, for both in-process and TCP endpoints
//!
//! # Wire Format
//!
//! `[4-byte length prefix as u32 big-endian] + [JSON data]`, with messages
//! larger than 100 MB rejected.

pub mod codec;
pub mod endpoint;
pub mod node_transport;
pub mod tcp;
pub mod tcp_server;

pub use codec::JsonCodec;
pub use endpoint::{Endpoint, NodeService};
pub use node_transport::{NodeTransport, Transport};
pub use tcp::TcpTransport;
pub use tcp_server::TcpServer;

/// Maximum message size (100 MB)
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;
