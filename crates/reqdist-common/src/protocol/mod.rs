pub mod error;
pub mod node_info;
pub mod requests;
pub mod responses;
pub mod wire;


pub use error::{Fault, FaultKind, ReqdistError, Result};
pub use node_info::NodeInfo;
pub use requests::{Call, Request, RequestId};
pub use responses::Response;
pub use wire::{RequisitionCatalog, WireRequisition};
