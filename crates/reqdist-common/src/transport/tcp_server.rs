use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::codec::JsonCodec;
use super::tcp::TcpTransport;
use crate::protocol::error::{ReqdistError, Result};
use crate::protocol::{Call, Response};

/// Async TCP server used by both the coordinator and the worker nodes.
///
/// Each connection is served by its own task and may carry several requests.
/// Cancelling the shutdown token stops accepting and drops every open
/// connection, which the peers observe as a communication failure.
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    /// Creates a new TCP server bound to the specified address.
    ///
    /// # Arguments
    /// * `bind_addr` - The address to bind to (e.g., "0.0.0.0:7100")
    pub async fn new(bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| ReqdistError::Connection(format!("Failed to bind to {}: {}", bind_addr, e)))?;

        Ok(Self { listener })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| ReqdistError::Connection(format!("Failed to get local addr: {}", e)))
    }

    /// Serves requests until `shutdown` is cancelled.
    ///
    /// The handler's `Ok` value becomes the response result; an `Err` is sent
    /// back as a fault carrying the error kind.
    pub async fn run_with_handler<F, Fut>(&self, handler: F, shutdown: CancellationToken) -> Result<()>
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler = Arc::new(handler);

        loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = self.listener.accept() => accepted
                    .map_err(|e| ReqdistError::Connection(format!("Failed to accept connection: {}", e)))?,
                _ = shutdown.cancelled() => {
                    debug!("TCP server on {:?} shutting down", self.listener.local_addr().ok());
                    return Ok(());
                }
            };

            debug!("Connection established from {}", peer_addr);

            let handler = handler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    result = handle_connection(stream, handler) => {
                        if let Err(e) = result {
                            warn!("Connection error from {}: {}", peer_addr, e);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Dropping connection from {}", peer_addr);
                    }
                }
            });
        }
    }
}

/// Serves a single connection until the peer closes it.
async fn handle_connection<F, Fut>(mut stream: TcpStream, handler: Arc<F>) -> Result<()>
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    loop {
        let frame = match TcpTransport::receive_message(&mut stream).await {
            Ok(frame) => frame,
            // Peer closed the connection between requests
            Err(ReqdistError::Connection(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let request = match JsonCodec::decode_request(&frame) {
            Ok(req) => req,
            Err(e) => {
                warn!("Failed to decode request: {}", e);
                let error_response = Response::error(0, &ReqdistError::InvalidRequest(e.to_string()));
                send_response(&mut stream, &error_response).await?;
                continue;
            }
        };

        let request_id = request.id;
        let method = request.call.method();
        let response = match handler(request.call).await {
            Ok(value) => Response::success(request_id, value),
            Err(e) => {
                debug!("{} failed: {}", method, e);
                Response::error(request_id, &e)
            }
        };

        send_response(&mut stream, &response).await?;
    }
}

async fn send_response(stream: &mut TcpStream, response: &Response) -> Result<()> {
    let encoded = JsonCodec::encode_response(response)?;
    TcpTransport::send_message(stream, &encoded).await
}
