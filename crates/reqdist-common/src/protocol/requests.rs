use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use super::wire::WireRequisition;

pub type RequestId = u64;

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Operations carried over the wire.
///
/// The first three are served by worker nodes, the rest by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
pub enum Call {
    ProcessUnit(WireRequisition),
    Describe,
    Finish,
    RegisterNode { name: String, addr: String },
    AddToControl { name: String, addr: String },
    ControlsNode { name: String },
    UnregisterNode { name: String },
}

impl Call {
    /// Short name used in logs.
    pub fn method(&self) -> &'static str {
        match self {
            Call::ProcessUnit(_) => "process_unit",
            Call::Describe => "describe",
            Call::Finish => "finish",
            Call::RegisterNode { .. } => "register_node",
            Call::AddToControl { .. } => "add_to_control",
            Call::ControlsNode { .. } => "controls_node",
            Call::UnregisterNode { .. } => "unregister_node",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub call: Call,
}

impl Request {
    pub fn new(call: Call) -> Self {
        Request {
            id: generate_request_id(),
            call,
        }
    }
}

fn generate_request_id() -> RequestId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    // Upper 32 bits from the clock, lower 32 bits from the counter
    (timestamp & 0xFFFFFFFF00000000) | (counter & 0xFFFFFFFF)
}
