//! reqdist common types and transport
//!
//! Shared building blocks of the reqdist requisition distribution system:
//!
//! - **Requisitions**: the [`IndivisibleRequisition`] / [`DivisibleRequisition`]
//!   traits and the [`Requisition`] enum submitted to a coordinator
//! - **Protocol**: request/response envelopes, wire requisitions and the
//!   [`ReqdistError`] taxonomy
//! - **Transport**: length-prefixed JSON over TCP plus the [`Transport`]
//!   abstraction the coordinator uses to reach nodes
//! - **Name service**, **coordinator link**, **events**, **settings** and
//!   **capability probing**
//!
//! # Architecture
//!
//! One coordinator accepts requisitions, picks the best worker node for each
//! indivisible unit and ships it there. Worker nodes register under a
//! name of the form `"<ip>|<clock>|<memory>"` and keep themselves registered.
//!
//! # Example
//!
//! ```
//! use reqdist_common::{IndivisibleRequisition, Requisition, Result};
//! use serde_json::{json, Value};
//!
//! struct Sum(Vec<i64>);
//!
//! impl IndivisibleRequisition for Sum {
//!     fn process(&self) -> Result<Value> {
//!         Ok(json!(self.0.iter().sum::<i64>()))
//!     }
//! }
//!
//! let requisition = Requisition::indivisible(Sum(vec![1, 2, 3]));
//! assert_eq!(requisition.process().unwrap(), json!(6));
//! ```

pub mod config;
pub mod events;
pub mod link;
pub mod machine;
pub mod protocol;
pub mod registry;
pub mod requisition;
pub mod transport;

pub use config::Settings;
pub use events::{EventDispatcher, NodeEventListener};
pub use link::CoordinatorLink;
pub use machine::{resolve_capacity, CapabilityProbe, Capacity, ProcProbe, StaticProbe};
pub use protocol::*;
pub use registry::{InMemoryNameService, NameService};
pub use requisition::{DivisibleRequisition, Factors, IndivisibleRequisition, Requisition, UNSET_FACTOR};
pub use transport::{Endpoint, NodeService, NodeTransport, Transport};
