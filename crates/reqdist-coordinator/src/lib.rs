//! reqdist coordinator
//!
//! Accepts requisitions and distributes their indivisible units across the
//! worker nodes it controls. Units flow through an admission queue, are
//! placed by the [`LoadBalancer`] on the node best able to absorb them and
//! are shipped by a pool of reusable dispatch workers. A node that fails to
//! communicate is evicted and its unit retried on another node.

pub mod coordinator;
pub mod directory;
mod dispatcher;
pub mod future;
pub mod load_balancer;
pub mod node;
pub mod queue;
pub mod server;
mod worker_pool;

pub use coordinator::{Coordinator, CoordinatorConfig, COORDINATOR_NAME};
pub use directory::NodeDirectory;
pub use future::{IdleTracker, ResultHandle};
pub use load_balancer::{LoadBalancer, Selection, DEFAULT_FAIRNESS_DIVISOR};
pub use node::{Charge, NodeLoad, NodeRef, Usage};
pub use server::CoordinatorServer;
