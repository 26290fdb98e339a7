use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use reqdist_common::protocol::error::{ReqdistError, Result};
use reqdist_common::requisition::IndivisibleRequisition;
use reqdist_common::transport::Endpoint;
use serde_json::Value;
use tokio::sync::futures::Notified;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::coordinator::CoordinatorState;
use crate::node::Charge;
use crate::queue::Admission;

/// A unit bound to the node it was charged against.
pub(crate) struct WorkOrder {
    pub entry: Admission,
    pub endpoint: Endpoint,
    pub charge: Charge,
}

#[derive(Clone)]
struct Worker {
    id: usize,
    orders: mpsc::UnboundedSender<WorkOrder>,
}

/// Growable pool of reusable dispatch tasks.
///
/// Each worker carries one unit at a time: it performs the remote call,
/// evicts the node on a communication failure, takes the node charge back,
/// resolves or requeues the unit and then parks
/// itself in the idle list. Parking wakes the dispatch loop through the
/// capacity signal.
pub(crate) struct WorkerPool {
    state: Arc<CoordinatorState>,
    idle: Mutex<Vec<Worker>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    capacity: Notify,
    spawned: AtomicUsize,
}

impl WorkerPool {
    pub fn new(state: Arc<CoordinatorState>) -> Self {
        Self {
            state,
            idle: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            capacity: Notify::new(),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Hands `order` to an idle worker, spawning one if none is idle.
    ///
    /// Gives the order back if the worker is gone, which only happens after
    /// shutdown.
    pub fn dispatch(self: &Arc<Self>, order: WorkOrder) -> std::result::Result<(), WorkOrder> {
        let worker = self.acquire();
        worker.orders.send(order).map_err(|rejected| rejected.0)
    }

    /// Future completing the next time a worker frees capacity. It observes
    /// every release made after it was created.
    pub fn capacity_freed(&self) -> Notified<'_> {
        self.capacity.notified()
    }

    pub fn worker_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Stops every worker and waits for all of them to exit.
    pub async fn shutdown(&self) {
        lock(&self.idle).clear();
        let tasks = std::mem::take(&mut *lock(&self.tasks));

        debug!("Joining {} dispatch workers", tasks.len());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Dispatch worker ended abnormally: {}", e);
            }
        }
    }

    fn acquire(self: &Arc<Self>) -> Worker {
        if let Some(worker) = lock(&self.idle).pop() {
            return worker;
        }

        let (orders, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            id: self.spawned.fetch_add(1, Ordering::SeqCst) + 1,
            orders,
        };
        debug!("Spawning dispatch worker {}", worker.id);

        let task = tokio::spawn(self.clone().run(worker.clone(), rx));
        lock(&self.tasks).push(task);
        worker
    }

    async fn run(self: Arc<Self>, worker: Worker, mut orders: mpsc::UnboundedReceiver<WorkOrder>) {
        let shutdown = self.state.shutdown.clone();

        loop {
            let order = tokio::select! {
                biased;
                order = orders.recv() => match order {
                    Some(order) => order,
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            };

            self.execute(order).await;

            lock(&self.idle).push(worker.clone());
            self.capacity.notify_waiters();
        }

        debug!("Dispatch worker {} stopped", worker.id);
    }

    async fn execute(&self, order: WorkOrder) {
        let WorkOrder { entry, endpoint, charge } = order;

        let outcome = self.call(&endpoint, entry.unit.clone()).await;

        match outcome {
            Err(error) if error.is_communication_failure() => {
                // Out of the directory before its charge comes back, so it
                // never looks idle
                self.state.evict(&charge, &error).await;
                self.state.release(&charge);
                self.state.retry(entry);
            }
            outcome => {
                self.state.release(&charge);
                entry.completion.resolve(outcome);
            }
        }
    }

    async fn call(&self, endpoint: &Endpoint, unit: Arc<dyn IndivisibleRequisition>) -> Result<Value> {
        let call = self.state.transport.call(endpoint, unit);
        match self.state.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ReqdistError::Timeout(limit.as_millis() as u64))?,
            None => call.await,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
