use serde::{Deserialize, Serialize};

/// Identity and declared capacity of a worker node.
///
/// Capacity is fixed for the lifetime of the node. The name is derived from
/// the advertised address and the capacity, see [`NodeInfo::node_name`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeInfo {
    pub name: String,
    /// Declared clock capacity (MHz).
    pub clock: i64,
    /// Declared memory capacity (MB).
    pub memory: i64,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>, clock: i64, memory: i64) -> Self {
        Self {
            name: name.into(),
            clock,
            memory,
        }
    }

    /// Builds the canonical node name `"<ip>|<clock>|<memory>"`.
    pub fn node_name(ip: &str, clock: i64, memory: i64) -> String {
        format!("{}|{}|{}", ip, clock, memory)
    }
}

impl std::fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
