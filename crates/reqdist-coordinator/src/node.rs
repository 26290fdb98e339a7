use reqdist_common::protocol::NodeInfo;
use reqdist_common::requisition::Factors;
use reqdist_common::transport::Endpoint;
use serde::Serialize;

/// Work currently assigned to a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    /// Units in flight.
    pub units: u32,
    /// Sum of the processing factors in flight.
    pub clock: i64,
    /// Sum of the memory factors in flight.
    pub memory: i64,
}

/// Coordinator-side view of a controlled worker node.
///
/// Capacity is fixed at registration. Two references are equal when their
/// names are equal.
#[derive(Debug, Clone)]
pub struct NodeRef {
    pub info: NodeInfo,
    pub endpoint: Endpoint,
    /// Distinguishes successive registrations under the same name.
    pub registration: u64,
    pub usage: Usage,
}

impl NodeRef {
    pub fn new(info: NodeInfo, endpoint: Endpoint, registration: u64) -> Self {
        Self {
            info,
            endpoint,
            registration,
            usage: Usage::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn clock(&self) -> i64 {
        self.info.clock
    }

    pub fn memory(&self) -> i64 {
        self.info.memory
    }

    /// Whether the node can take a unit with `factors` right now.
    ///
    /// An idle node always can. A busy one must have room left on every
    /// dimension the unit declares.
    pub fn is_eligible(&self, factors: &Factors) -> bool {
        if self.usage.units == 0 {
            return true;
        }
        (!factors.considers_processing() || self.usage.clock < self.clock())
            && (!factors.considers_memory() || self.usage.memory < self.memory())
    }

    pub fn load(&self) -> NodeLoad {
        NodeLoad {
            info: self.info.clone(),
            usage: self.usage,
        }
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.info.name == other.info.name
    }
}

impl Eq for NodeRef {}

/// Snapshot of a node's capacity and current usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeLoad {
    pub info: NodeInfo,
    pub usage: Usage,
}

/// What one dispatched unit added to a node's usage, so it can be taken
/// back exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charge {
    pub node: String,
    pub registration: u64,
    pub clock: i64,
    pub memory: i64,
}
