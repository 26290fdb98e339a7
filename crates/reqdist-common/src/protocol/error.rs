use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReqdistError {
    /// The requisition's own logic failed while executing on a worker.
    #[error("Processing error: {0}")]
    Processing(String),

    #[error("No process nodes available")]
    NoNodesAvailable,

    /// The worker refused the call because it has finished.
    #[error("Node not active: {0}")]
    NodeInactive(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Node already exists: {0}")]
    NodeAlreadyExists(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Name service is not active")]
    NameServiceInactive,

    #[error("Coordinator is not running")]
    NotRunning,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReqdistError {
    /// Returns `true` when the failure happened while talking to a worker
    /// rather than inside the requisition itself.
    ///
    /// Communication failures evict the worker from the directory and put the
    /// unit back at the head of the admission queue. Every other kind is
    /// delivered to whoever is waiting on the unit.
    pub fn is_communication_failure(&self) -> bool {
        matches!(
            self,
            ReqdistError::NodeInactive(_)
                | ReqdistError::Transport(_)
                | ReqdistError::Connection(_)
                | ReqdistError::Timeout(_)
                | ReqdistError::Io(_)
                | ReqdistError::InvalidResponse(_)
        )
    }

    /// Converts the error into a wire fault, keeping its kind.
    pub fn to_fault(&self) -> Fault {
        let kind = match self {
            ReqdistError::Processing(_) => FaultKind::Processing,
            ReqdistError::NoNodesAvailable => FaultKind::NoNodesAvailable,
            ReqdistError::NodeInactive(_) => FaultKind::NodeInactive,
            ReqdistError::NodeAlreadyExists(_) => FaultKind::NodeAlreadyExists,
            ReqdistError::NodeNotFound(_) => FaultKind::NodeNotFound,
            ReqdistError::NameServiceInactive => FaultKind::NameServiceInactive,
            ReqdistError::NotRunning => FaultKind::NotRunning,
            ReqdistError::InvalidRequest(_) | ReqdistError::JsonSerialization(_) => {
                FaultKind::InvalidRequest
            }
            _ => FaultKind::Internal,
        };
        let message = match self {
            ReqdistError::Processing(msg)
            | ReqdistError::NodeInactive(msg)
            | ReqdistError::NodeAlreadyExists(msg)
            | ReqdistError::NodeNotFound(msg)
            | ReqdistError::InvalidRequest(msg)
            | ReqdistError::Internal(msg) => msg.clone(),
            other => other.to_string(),
        };
        Fault { kind, message }
    }
}

/// Error kinds that survive a round trip over the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Processing,
    NoNodesAvailable,
    NodeInactive,
    NodeAlreadyExists,
    NodeNotFound,
    NameServiceInactive,
    NotRunning,
    InvalidRequest,
    Internal,
}

/// A failure reported by the remote side of a call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl From<Fault> for ReqdistError {
    fn from(fault: Fault) -> Self {
        match fault.kind {
            FaultKind::Processing => ReqdistError::Processing(fault.message),
            FaultKind::NoNodesAvailable => ReqdistError::NoNodesAvailable,
            FaultKind::NodeInactive => ReqdistError::NodeInactive(fault.message),
            FaultKind::NodeAlreadyExists => ReqdistError::NodeAlreadyExists(fault.message),
            FaultKind::NodeNotFound => ReqdistError::NodeNotFound(fault.message),
            FaultKind::NameServiceInactive => ReqdistError::NameServiceInactive,
            FaultKind::NotRunning => ReqdistError::NotRunning,
            FaultKind::InvalidRequest => ReqdistError::InvalidRequest(fault.message),
            FaultKind::Internal => ReqdistError::Internal(fault.message),
        }
    }
}

impl From<std::net::AddrParseError> for ReqdistError {
    fn from(err: std::net::AddrParseError) -> Self {
        ReqdistError::InvalidConfig(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReqdistError>;
