use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use reqdist_common::protocol::error::ReqdistError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::coordinator::{CoordinatorState, Placement};
use crate::queue::Admission;
use crate::worker_pool::{WorkOrder, WorkerPool};

/// The coordinator's single control loop.
///
/// Takes units off the admission queue in order, places each on a node and
/// hands it to a pooled worker without waiting for the result. A unit that
/// fits nowhere holds the loop until capacity frees up, a node registers or
/// the re-check interval elapses.
pub(crate) struct Dispatcher {
    state: Arc<CoordinatorState>,
    pool: Arc<WorkerPool>,
}

impl Dispatcher {
    pub fn new(state: Arc<CoordinatorState>, pool: Arc<WorkerPool>) -> Self {
        Self { state, pool }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let shutdown = self.state.shutdown.clone();
        info!("Dispatch loop started");

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.state.queue.take_next() => next,
            };

            // Woken with nothing queued
            let Some(entry) = next else {
                continue;
            };
            self.dispatch(entry).await;
        }

        self.state.fail_queued();
        info!("Dispatch loop stopped");
    }

    async fn dispatch(&self, entry: Admission) {
        loop {
            // Created before selecting so a release in between still wakes us
            let capacity = self.pool.capacity_freed();
            let node_added = self.state.node_added();

            let placement = catch_unwind(AssertUnwindSafe(|| self.state.place(&entry.factors)));
            match placement {
                Ok(Placement::Assigned(endpoint, charge)) => {
                    trace!("Placing unit on {} (retries: {})", charge.node, entry.retries);
                    let order = WorkOrder { entry, endpoint, charge };
                    if let Err(order) = self.pool.dispatch(order) {
                        self.state.release(&order.charge);
                        order.entry.completion.resolve(Err(ReqdistError::NotRunning));
                    }
                    return;
                }
                Ok(Placement::Unavailable) => {
                    debug!("No nodes registered, failing unit");
                    entry.completion.resolve(Err(ReqdistError::NoNodesAvailable));
                    return;
                }
                Ok(Placement::Saturated) => {
                    trace!("Every node is saturated, waiting for capacity");
                    tokio::select! {
                        _ = capacity => {}
                        _ = node_added => {}
                        _ = tokio::time::sleep(self.state.config.recheck_interval) => {}
                        _ = self.state.shutdown.cancelled() => {
                            entry.completion.resolve(Err(ReqdistError::NotRunning));
                            return;
                        }
                    }
                }
                Err(_) => {
                    error!("Node selection panicked, failing unit");
                    entry
                        .completion
                        .resolve(Err(ReqdistError::Internal("node selection failed".into())));
                    return;
                }
            }
        }
    }
}
