use reqdist_common::protocol::NodeInfo;
use reqdist_common::requisition::Factors;
use reqdist_common::transport::Endpoint;

use crate::node::{Charge, NodeLoad, NodeRef, Usage};

/// The coordinator's live set of controlled nodes.
///
/// Nodes are kept in registration order, which is the order the load
/// balancer scans them in and therefore decides ties. The directory is not
/// synchronized itself; the coordinator keeps it behind a single mutex.
#[derive(Debug, Default)]
pub struct NodeDirectory {
    nodes: Vec<NodeRef>,
    next_registration: u64,
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, or replaces the node holding the same name in place.
    ///
    /// Returns the replaced reference, if any. The new reference starts with
    /// no usage, and charges taken on the old one are no longer released
    /// against it.
    pub fn insert(&mut self, info: NodeInfo, endpoint: Endpoint) -> Option<NodeRef> {
        self.next_registration += 1;
        let node = NodeRef::new(info, endpoint, self.next_registration);

        match self.position(node.name()) {
            Some(index) => Some(std::mem::replace(&mut self.nodes[index], node)),
            None => {
                self.nodes.push(node);
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<NodeRef> {
        let index = self.position(name)?;
        Some(self.nodes.remove(index))
    }

    /// Removes `name` only if it is still the registration `registration`.
    pub fn remove_registration(&mut self, name: &str, registration: u64) -> Option<NodeRef> {
        let index = self.position(name)?;
        if self.nodes[index].registration != registration {
            return None;
        }
        Some(self.nodes.remove(index))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&NodeRef> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn infos(&self) -> Vec<NodeInfo> {
        self.nodes.iter().map(|n| n.info.clone()).collect()
    }

    pub fn loads(&self) -> Vec<NodeLoad> {
        self.nodes.iter().map(NodeRef::load).collect()
    }

    /// Adds one unit with `factors` to the node at `index`. Unset factors
    /// count as zero.
    pub fn charge(&mut self, index: usize, factors: Factors) -> Charge {
        let added = factors.floored();
        let node = &mut self.nodes[index];
        node.usage.units += 1;
        node.usage.clock += added.processing;
        node.usage.memory += added.memory;

        Charge {
            node: node.info.name.clone(),
            registration: node.registration,
            clock: added.processing,
            memory: added.memory,
        }
    }

    /// Takes back exactly what `charge` added.
    ///
    /// When the last unit in flight completes the counters are reset to zero
    /// so rounding or stale charges cannot accumulate. Charges against a node
    /// that has since left or re-registered are ignored.
    pub fn release(&mut self, charge: &Charge) {
        let Some(node) = self
            .nodes
            .iter_mut()
            .find(|n| n.info.name == charge.node && n.registration == charge.registration)
        else {
            return;
        };

        if node.usage.units <= 1 {
            node.usage = Usage::default();
        } else {
            node.usage.units -= 1;
            node.usage.clock = (node.usage.clock - charge.clock).max(0);
            node.usage.memory = (node.usage.memory - charge.memory).max(0);
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(names: &[&str]) -> NodeDirectory {
        let mut dir = NodeDirectory::new();
        for name in names {
            dir.insert(NodeInfo::new(*name, 100, 100), Endpoint::remote("127.0.0.1:1"));
        }
        dir
    }

    #[test]
    fn test_insert_keeps_registration_order() {
        let dir = directory(&["c", "a", "b"]);
        let names: Vec<_> = dir.nodes().iter().map(|n| n.name().to_string()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(dir.len(), 3);
    }

    #[test]
    fn test_reinsert_replaces_in_place() {
        let mut dir = directory(&["a", "b"]);
        let old = dir.insert(NodeInfo::new("a", 900, 900), Endpoint::remote("127.0.0.1:2"));

        assert_eq!(old.unwrap().clock(), 100);
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.nodes()[0].clock(), 900);
    }

    #[test]
    fn test_remove() {
        let mut dir = directory(&["a", "b"]);
        assert!(dir.remove("a").is_some());
        assert!(dir.remove("a").is_none());
        assert!(!dir.contains("a"));
        assert!(dir.contains("b"));
    }

    #[test]
    fn test_remove_registration_ignores_newer_node() {
        let mut dir = directory(&["a"]);
        let first = dir.get("a").unwrap().registration;
        dir.insert(NodeInfo::new("a", 100, 100), Endpoint::remote("127.0.0.1:2"));

        assert!(dir.remove_registration("a", first).is_none());
        assert!(dir.contains("a"));
    }

    #[test]
    fn test_charge_and_release_cancel_exactly() {
        let mut dir = directory(&["a"]);
        let c1 = dir.charge(0, Factors::new(40, -1));
        let c2 = dir.charge(0, Factors::new(20, 30));
        assert_eq!(dir.nodes()[0].usage, Usage { units: 2, clock: 60, memory: 30 });

        dir.release(&c1);
        assert_eq!(dir.nodes()[0].usage, Usage { units: 1, clock: 20, memory: 30 });

        dir.release(&c2);
        assert_eq!(dir.nodes()[0].usage, Usage::default());
    }

    #[test]
    fn test_last_release_resets_counters() {
        let mut dir = directory(&["a"]);
        let charge = dir.charge(0, Factors::new(40, 40));
        dir.nodes[0].usage.clock += 7;
        dir.release(&charge);
        assert_eq!(dir.nodes()[0].usage, Usage::default());
    }

    #[test]
    fn test_release_after_reregistration_is_ignored() {
        let mut dir = directory(&["a"]);
        let charge = dir.charge(0, Factors::new(40, -1));
        dir.insert(NodeInfo::new("a", 100, 100), Endpoint::remote("127.0.0.1:2"));
        let fresh = dir.charge(0, Factors::new(10, -1));
        dir.charge(0, Factors::new(10, -1));

        dir.release(&charge);
        assert_eq!(dir.nodes()[0].usage, Usage { units: 2, clock: 20, memory: 0 });
        dir.release(&fresh);
        assert_eq!(dir.nodes()[0].usage, Usage { units: 1, clock: 10, memory: 0 });
    }

    #[test]
    fn test_infos_and_loads() {
        let mut dir = directory(&["a", "b"]);
        dir.charge(1, Factors::UNSET);
        assert_eq!(dir.infos().len(), 2);
        let loads = dir.loads();
        assert_eq!(loads[0].usage.units, 0);
        assert_eq!(loads[1].usage.units, 1);
    }
}
