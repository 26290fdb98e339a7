use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::codec::JsonCodec;
use super::MAX_MESSAGE_SIZE;
use crate::protocol::error::{ReqdistError, Result};
use crate::protocol::{Call, Request, Response};

/// Default time allowed to establish a connection (10 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Async TCP client.
///
/// Only connection establishment is time bounded. Once connected, a call waits
/// as long as the peer needs to answer, since processing time is unbounded.
///
/// # Wire Protocol
///
/// ```text
/// [4-byte length] [JSON data]
/// ```
///
/// # Example
///
/// ```no_run
/// use reqdist_common::protocol::Call;
/// use reqdist_common::transport::TcpTransport;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = TcpTransport::default();
/// let info = transport.call("127.0.0.1:7101", Call::Describe).await?;
/// println!("{info}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Connects to `addr`, giving up after the connect timeout.
    pub async fn connect(&self, addr: &str) -> Result<TcpStream> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).ok();
                Ok(stream)
            }
            Ok(Err(e)) => Err(ReqdistError::Connection(format!(
                "Failed to connect to {}: {}",
                addr, e
            ))),
            Err(_) => Err(ReqdistError::Timeout(self.connect_timeout.as_millis() as u64)),
        }
    }

    /// Sends a request on an open stream and waits for its response.
    pub async fn send_request(&self, stream: &mut TcpStream, request: &Request) -> Result<Response> {
        let encoded = JsonCodec::encode_request(request)?;
        Self::send_message(stream, &encoded).await?;

        let response_data = Self::receive_message(stream).await?;
        let response = JsonCodec::decode_response(&response_data)?;

        if response.id != request.id {
            return Err(ReqdistError::InvalidResponse(format!(
                "response id {} does not match request id {}",
                response.id, request.id
            )));
        }
        Ok(response)
    }

    /// Performs one call on a fresh connection and returns the remote outcome.
    pub async fn call(&self, addr: &str, call: Call) -> Result<Value> {
        let mut stream = self.connect(addr).await?;
        let request = Request::new(call);
        let response = self.send_request(&mut stream, &request).await?;
        response.into_result()
    }

    /// Writes one length-prefixed frame.
    pub async fn send_message<W>(stream: &mut W, data: &[u8]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ReqdistError::InvalidRequest(format!(
                "Message too large: {} bytes (max {} bytes)",
                data.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        let len = data.len() as u32;

        stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| map_io_error(e, "writing length prefix"))?;
        stream
            .write_all(data)
            .await
            .map_err(|e| map_io_error(e, "writing data"))?;
        stream
            .flush()
            .await
            .map_err(|e| map_io_error(e, "flushing stream"))?;

        Ok(())
    }

    /// Reads one length-prefixed frame.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Reading the length prefix fails
    /// - Message exceeds maximum size (100 MB)
    /// - Reading the data fails
    pub async fn receive_message<R>(stream: &mut R) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| map_io_error(e, "reading length prefix"))?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(ReqdistError::InvalidResponse(format!(
                "Message too large: {} bytes (max {} bytes)",
                len, MAX_MESSAGE_SIZE
            )));
        }

        let mut buf = vec![0u8; len];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| map_io_error(e, "reading data"))?;

        Ok(buf)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

/// Maps IO errors to transport errors.
///
/// - Timeouts/would block -> `Timeout`
/// - Peer went away -> `Connection`
/// - Other IO errors -> `Io`
pub(crate) fn map_io_error(err: std::io::Error, context: &str) -> ReqdistError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ReqdistError::Timeout(0),
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::UnexpectedEof => {
            ReqdistError::Connection(format!("{}: Connection lost", context))
        }
        _ => ReqdistError::Io(err),
    }
}
