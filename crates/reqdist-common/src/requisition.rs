//! Units of work distributed by the coordinator.
//!
//! A requisition is either *indivisible* (processed whole on one node) or
//! *divisible* (split into ordered indivisible sub-units whose results are
//! joined back in split order). The coordinator branches on [`Requisition`]
//! once, at admission time.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::protocol::error::Result;
use crate::protocol::node_info::NodeInfo;
use crate::protocol::wire::WireRequisition;

/// Factor value meaning "this dimension is unknown, ignore it".
pub const UNSET_FACTOR: i64 = -1;

/// A unit of work processed whole on exactly one node.
pub trait IndivisibleRequisition: Send + Sync {
    /// Runs the computation. Errors are reported to the submitter as
    /// processing failures.
    fn process(&self) -> Result<Value>;

    /// Estimated compute cost. Values below 1 leave the clock dimension out of
    /// node selection.
    fn processing_factor(&self) -> i64 {
        UNSET_FACTOR
    }

    /// Estimated memory cost. Values below 1 leave the memory dimension out
    /// of node selection.
    fn memory_factor(&self) -> i64 {
        UNSET_FACTOR
    }

    /// Called on the worker right before [`process`](Self::process).
    /// Failures are logged and otherwise ignored.
    fn on_before_process(&self, _node: &NodeInfo) -> Result<()> {
        Ok(())
    }

    /// Wire form used to ship the unit to a node over TCP. Units that return
    /// `None` can only run on in-process nodes.
    fn to_wire(&self) -> Option<WireRequisition> {
        None
    }
}

/// A unit of work that splits into indivisible sub-units.
pub trait DivisibleRequisition: Send + Sync {
    /// Splits the work given how many nodes are currently available.
    fn sub_requisitions(&self, available_nodes: usize) -> Vec<Arc<dyn IndivisibleRequisition>>;

    /// Joins the sub-results, in the same order `sub_requisitions` produced
    /// the sub-units.
    fn response(&self, results: Vec<Value>) -> Result<Value>;

    /// Processes the whole requisition locally, as if a single node were
    /// available.
    fn process(&self) -> Result<Value> {
        let results = self
            .sub_requisitions(1)
            .iter()
            .map(|unit| unit.process())
            .collect::<Result<Vec<_>>>()?;
        self.response(results)
    }
}

/// A submitted unit of work.
#[derive(Clone)]
pub enum Requisition {
    Indivisible(Arc<dyn IndivisibleRequisition>),
    Divisible(Arc<dyn DivisibleRequisition>),
}

impl Requisition {
    pub fn indivisible(unit: impl IndivisibleRequisition + 'static) -> Self {
        Requisition::Indivisible(Arc::new(unit))
    }

    pub fn divisible(unit: impl DivisibleRequisition + 'static) -> Self {
        Requisition::Divisible(Arc::new(unit))
    }

    /// Processes the requisition in the calling thread.
    pub fn process(&self) -> Result<Value> {
        match self {
            Requisition::Indivisible(unit) => unit.process(),
            Requisition::Divisible(unit) => unit.process(),
        }
    }

    pub fn is_divisible(&self) -> bool {
        matches!(self, Requisition::Divisible(_))
    }
}

impl fmt::Debug for Requisition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requisition::Indivisible(unit) => f
                .debug_struct("Indivisible")
                .field("processing_factor", &unit.processing_factor())
                .field("memory_factor", &unit.memory_factor())
                .finish(),
            Requisition::Divisible(_) => f.write_str("Divisible"),
        }
    }
}

/// Cost factors declared by an indivisible unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Factors {
    pub processing: i64,
    pub memory: i64,
}

impl Factors {
    pub const UNSET: Factors = Factors {
        processing: UNSET_FACTOR,
        memory: UNSET_FACTOR,
    };

    pub fn new(processing: i64, memory: i64) -> Self {
        Self { processing, memory }
    }

    pub fn of(unit: &dyn IndivisibleRequisition) -> Self {
        Self::new(unit.processing_factor(), unit.memory_factor())
    }

    /// Whether the clock dimension takes part in node selection.
    pub fn considers_processing(&self) -> bool {
        self.processing >= 1
    }

    /// Whether the memory dimension takes part in node selection.
    pub fn considers_memory(&self) -> bool {
        self.memory >= 1
    }

    /// Factors as charged to a node: unset values count as zero.
    pub fn floored(&self) -> Factors {
        Factors::new(self.processing.max(0), self.memory.max(0))
    }
}

impl Default for Factors {
    fn default() -> Self {
        Factors::UNSET
    }
}
