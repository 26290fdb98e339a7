use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use reqdist_common::events::{EventDispatcher, NodeEventListener};
use reqdist_common::link::CoordinatorLink;
use reqdist_common::protocol::error::{ReqdistError, Result};
use reqdist_common::protocol::NodeInfo;
use reqdist_common::registry::{InMemoryNameService, NameService};
use reqdist_common::requisition::{DivisibleRequisition, Factors, IndivisibleRequisition, Requisition};
use reqdist_common::transport::{Endpoint, NodeTransport, Transport};
use reqdist_common::Settings;
use serde_json::Value;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::directory::NodeDirectory;
use crate::dispatcher::Dispatcher;
use crate::future::{pending, IdleTracker, ResultHandle};
use crate::load_balancer::{LoadBalancer, Selection, DEFAULT_FAIRNESS_DIVISOR};
use crate::node::{Charge, NodeLoad};
use crate::queue::{Admission, AdmissionQueue};
use crate::worker_pool::WorkerPool;

/// Name the coordinator reports as the source of its events.
pub const COORDINATOR_NAME: &str = "Coordinator";

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long the dispatch loop waits for freed capacity before selecting
    /// again on its own.
    ///
    /// Default: 1s
    pub recheck_interval: Duration,
    /// Bound on a whole remote call. Expiry counts as a communication
    /// failure.
    ///
    /// Default: none, processing time is unbounded
    pub call_timeout: Option<Duration>,
    /// Divisor of the load balancer's small-difference rule.
    ///
    /// Default: 10.0
    pub fairness_divisor: f64,
    /// Bound on connecting to a node and on control calls such as
    /// `describe`.
    ///
    /// Default: 10s
    pub connect_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            recheck_interval: Duration::from_secs(1),
            call_timeout: None,
            fairness_divisor: DEFAULT_FAIRNESS_DIVISOR,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&Settings> for CoordinatorConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout,
            ..Default::default()
        }
    }
}

/// Where the next unit goes.
pub(crate) enum Placement {
    Assigned(Endpoint, Charge),
    Saturated,
    Unavailable,
}

/// State shared by the coordinator front, the dispatch loop and the workers.
pub(crate) struct CoordinatorState {
    pub info: NodeInfo,
    pub config: CoordinatorConfig,
    pub queue: AdmissionQueue,
    pub transport: Arc<dyn Transport>,
    pub events: EventDispatcher,
    pub shutdown: CancellationToken,
    directory: Mutex<NodeDirectory>,
    tracker: Arc<IdleTracker>,
    load_balancer: LoadBalancer,
    name_service: Arc<dyn NameService>,
    node_added: Notify,
    running: AtomicBool,
}

impl CoordinatorState {
    fn directory(&self) -> MutexGuard<'_, NodeDirectory> {
        self.directory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ReqdistError::NotRunning)
        }
    }

    /// Selects a node for `factors` and charges it, in one critical section.
    pub fn place(&self, factors: &Factors) -> Placement {
        let mut directory = self.directory();
        match self.load_balancer.select(directory.nodes(), factors) {
            Selection::Chosen(index) => {
                let endpoint = directory.nodes()[index].endpoint.clone();
                let charge = directory.charge(index, *factors);
                Placement::Assigned(endpoint, charge)
            }
            Selection::Saturated => Placement::Saturated,
            Selection::Unavailable => Placement::Unavailable,
        }
    }

    pub fn release(&self, charge: &Charge) {
        self.directory().release(charge);
    }

    /// Drops a node presumed dead after a communication failure.
    pub async fn evict(&self, charge: &Charge, error: &ReqdistError) {
        let removed = self.directory().remove_registration(&charge.node, charge.registration);
        let Some(node) = removed else {
            // Already evicted by another worker, or replaced by a newer registration
            return;
        };

        warn!("Evicting node {} after communication failure: {}", node.name(), error);
        if let Err(e) = self.name_service.unregister(node.name()).await {
            debug!("Name service unregister of {} failed: {}", node.name(), e);
        }
        self.events
            .dispatch("node_unregistered", |l| l.node_unregistered(&self.info, &node.info));
    }

    /// Puts a unit back at the head of the queue.
    pub fn retry(&self, mut entry: Admission) {
        entry.retries += 1;
        debug!("Requeueing unit for attempt {}", entry.retries + 1);
        self.queue.enqueue_urgent(entry);
        if self.shutdown.is_cancelled() {
            self.fail_queued();
        }
    }

    /// Fails every queued unit. Only meaningful once the loop has stopped.
    pub fn fail_queued(&self) {
        for entry in self.queue.drain() {
            entry.completion.resolve(Err(ReqdistError::NotRunning));
        }
    }

    pub fn node_added(&self) -> Notified<'_> {
        self.node_added.notified()
    }

    fn admit(&self, unit: Arc<dyn IndivisibleRequisition>) -> ResultHandle {
        let (completion, handle) = pending(self.tracker.clone());
        self.queue.enqueue(Admission::new(unit, completion));
        // The loop drains the queue once after stopping; anything later is ours to fail
        if self.shutdown.is_cancelled() {
            self.fail_queued();
        }
        handle
    }

    /// Admits a requisition. Divisible work is split here, once.
    fn start(&self, requisition: &Requisition) -> Result<Submission> {
        self.ensure_running()?;

        match requisition {
            Requisition::Indivisible(unit) => Ok(Submission::Unit(self.admit(unit.clone()))),
            Requisition::Divisible(divisible) => {
                let available = self.directory().len();
                if available == 0 {
                    // Reported like any failed outcome, never split
                    return Ok(Submission::Refused(ReqdistError::NoNodesAvailable));
                }
                let handles = divisible
                    .sub_requisitions(available)
                    .into_iter()
                    .map(|unit| self.admit(unit))
                    .collect();
                Ok(Submission::Parts {
                    divisible: divisible.clone(),
                    handles,
                })
            }
        }
    }

    fn report(&self, requisition: &Requisition, outcome: &Result<Value>) {
        match outcome {
            Ok(value) => self.events.dispatch("requisition_processed", |l| {
                l.requisition_processed(&self.info, requisition, value)
            }),
            Err(error) => self.events.dispatch("requisition_failed", |l| {
                l.requisition_failed(&self.info, requisition, error)
            }),
        }
    }
}

/// An admitted requisition waiting for its outcome.
enum Submission {
    Unit(ResultHandle),
    Refused(ReqdistError),
    Parts {
        divisible: Arc<dyn DivisibleRequisition>,
        handles: Vec<ResultHandle>,
    },
}

impl Submission {
    /// Waits for every part and joins them in split order.
    async fn outcome(self) -> Result<Value> {
        match self {
            Submission::Unit(handle) => handle.wait().await,
            Submission::Refused(error) => Err(error),
            Submission::Parts { divisible, handles } => {
                let results = try_join_all(handles.into_iter().map(ResultHandle::wait)).await?;
                divisible.response(results)
            }
        }
    }
}

/// Accepts requisitions and distributes their units across worker nodes.
///
/// Every indivisible unit is placed on the node best able to absorb it (see
/// [`LoadBalancer`]). Nodes that fail to communicate are evicted and their
/// unit is retried elsewhere, ahead of newer work. Nodes join through
/// [`register_node`](Self::register_node) or
/// [`add_to_control`](Self::add_to_control) and are kept in registration
/// order.
///
/// Must be created inside a Tokio runtime: the dispatch loop is spawned
/// right away.
///
/// # Example
/// ```no_run
/// # use reqdist_coordinator::Coordinator;
/// # use reqdist_common::{IndivisibleRequisition, Requisition, Result};
/// # use serde_json::{json, Value};
/// struct Square(i64);
///
/// impl IndivisibleRequisition for Square {
///     fn process(&self) -> Result<Value> {
///         Ok(json!(self.0 * self.0))
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<()> {
/// let coordinator = Coordinator::new();
/// // ... worker nodes register ...
/// let value = coordinator.submit(Requisition::indivisible(Square(7))).await?;
/// assert_eq!(value, json!(49));
/// coordinator.finish().await?;
/// # Ok(())
/// # }
/// ```
pub struct Coordinator {
    state: Arc<CoordinatorState>,
    pool: Arc<WorkerPool>,
    dispatcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Creates a coordinator with the default transport, an in-memory name
    /// service and the default configuration.
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    /// Reaches nodes through a [`NodeTransport`] bounded by the configured
    /// connect timeout.
    pub fn with_config(config: CoordinatorConfig) -> Self {
        Self::with_transport(Arc::new(NodeTransport::new(config.connect_timeout)), config)
    }

    /// Uses `transport` both to reach nodes and to probe duplicate names.
    pub fn with_transport(transport: Arc<dyn Transport>, config: CoordinatorConfig) -> Self {
        let name_service = Arc::new(InMemoryNameService::new(transport.clone()));
        Self::with_name_service(name_service, transport, config)
    }

    pub fn with_name_service(
        name_service: Arc<dyn NameService>,
        transport: Arc<dyn Transport>,
        config: CoordinatorConfig,
    ) -> Self {
        let state = Arc::new(CoordinatorState {
            info: NodeInfo::new(COORDINATOR_NAME, 0, 0),
            load_balancer: LoadBalancer::with_fairness_divisor(config.fairness_divisor),
            config,
            queue: AdmissionQueue::new(),
            transport,
            events: EventDispatcher::new(),
            shutdown: CancellationToken::new(),
            directory: Mutex::new(NodeDirectory::new()),
            tracker: Arc::new(IdleTracker::new()),
            name_service,
            node_added: Notify::new(),
            running: AtomicBool::new(true),
        });

        let pool = Arc::new(WorkerPool::new(state.clone()));
        let dispatcher = Dispatcher::new(state.clone(), pool.clone()).spawn();

        info!("Coordinator started");
        Self {
            state,
            pool,
            dispatcher: tokio::sync::Mutex::new(Some(dispatcher)),
        }
    }

    pub fn info(&self) -> &NodeInfo {
        &self.state.info
    }

    pub fn name_service(&self) -> Arc<dyn NameService> {
        self.state.name_service.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Processes a requisition on the worker nodes and returns its result.
    ///
    /// A divisible requisition is split by the number of nodes controlled
    /// at submission time and its sub-results are joined in split order.
    ///
    /// # Errors
    /// - `NoNodesAvailable` if no node is controlled
    /// - `Processing` if the unit itself failed
    /// - `NotRunning` after [`finish`](Self::finish)
    pub async fn submit(&self, requisition: Requisition) -> Result<Value> {
        let submission = self.state.start(&requisition)?;
        let outcome = submission.outcome().await;
        self.state.report(&requisition, &outcome);
        outcome
    }

    /// Admits a requisition and returns without waiting. The outcome is only
    /// visible through the processed and failed events, including a
    /// divisible requisition refused for lack of nodes.
    ///
    /// # Errors
    /// - `NotRunning` after [`finish`](Self::finish)
    pub fn submit_async(&self, requisition: Requisition) -> Result<()> {
        let submission = self.state.start(&requisition)?;
        let state = self.state.clone();
        tokio::spawn(async move {
            let outcome = submission.outcome().await;
            state.report(&requisition, &outcome);
        });
        Ok(())
    }

    /// Waits until no admitted unit is pending.
    pub async fn wait_idle(&self) {
        self.state.tracker.await_zero().await;
    }

    /// Number of admitted units not yet resolved.
    pub fn pending(&self) -> usize {
        self.state.tracker.pending()
    }

    pub fn controlled_nodes(&self) -> Vec<NodeInfo> {
        self.state.directory().infos()
    }

    pub fn controls_node(&self, name: &str) -> bool {
        self.state.directory().contains(name)
    }

    /// Capacity and current usage of every controlled node.
    pub fn node_loads(&self) -> Vec<NodeLoad> {
        self.state.directory().loads()
    }

    /// Publishes the node in the name service and takes control of it.
    ///
    /// Fails with `NodeAlreadyExists` if a reachable node already holds
    /// `name`. Failure to take control after publishing is logged; the node's
    /// monitor repairs it.
    pub async fn register_node(&self, name: &str, endpoint: Endpoint) -> Result<()> {
        self.state.ensure_running()?;
        self.state.name_service.register(name, endpoint.clone()).await?;
        if let Err(e) = self.add_to_control(name, endpoint).await {
            warn!("Published {} but could not take control of it: {}", name, e);
        }
        Ok(())
    }

    /// Takes control of a node. Capacity is read from the node itself.
    ///
    /// A node already controlled under `name` is replaced and starts over
    /// with no usage.
    pub async fn add_to_control(&self, name: &str, endpoint: Endpoint) -> Result<()> {
        self.state.ensure_running()?;
        let described = self.state.transport.describe(&endpoint).await?;
        let info = NodeInfo::new(name, described.clock, described.memory);

        // Shutdown may have started while describing
        self.state.ensure_running()?;
        let replaced = self.state.directory().insert(info.clone(), endpoint);
        if replaced.is_some() {
            info!("Node {} re-registered", name);
        } else {
            info!("Node {} registered (clock: {}, memory: {})", name, info.clock, info.memory);
        }

        self.state
            .events
            .dispatch("node_registered", |l| l.node_registered(&self.state.info, &info));
        self.state.node_added.notify_waiters();
        Ok(())
    }

    /// Releases control of a node. Returns whether it was controlled.
    pub fn remove_from_control(&self, name: &str) -> bool {
        let Some(node) = self.state.directory().remove(name) else {
            return false;
        };

        info!("Node {} unregistered", name);
        self.state
            .events
            .dispatch("node_unregistered", |l| l.node_unregistered(&self.state.info, &node.info));
        true
    }

    /// Withdraws a node from the name service and from control.
    pub async fn unregister_node(&self, name: &str) -> Result<()> {
        match self.state.name_service.unregister(name).await {
            Ok(()) | Err(ReqdistError::NodeNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.remove_from_control(name);
        Ok(())
    }

    pub fn add_listener(&self, listener: Arc<dyn NodeEventListener>) {
        self.state.events.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn NodeEventListener>) -> bool {
        self.state.events.remove_listener(listener)
    }

    /// Shuts the coordinator down.
    ///
    /// Stops accepting requisitions and registrations, waits for every
    /// admitted unit, stops the dispatch loop and joins every worker. Calling
    /// it again does nothing.
    pub async fn finish(&self) -> Result<()> {
        if !self.state.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Coordinator finishing, waiting for {} pending units", self.pending());

        self.wait_idle().await;
        self.state.shutdown.cancel();

        if let Some(dispatcher) = self.dispatcher.lock().await.take() {
            if let Err(e) = dispatcher.await {
                warn!("Dispatch loop ended abnormally: {}", e);
            }
        }
        self.pool.shutdown().await;

        info!("Coordinator finished ({} dispatch workers used)", self.pool.worker_count());
        self.state
            .events
            .dispatch("node_finished", |l| l.node_finished(&self.state.info));
        Ok(())
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinatorLink for Coordinator {
    async fn register_node(&self, name: &str, endpoint: Endpoint) -> Result<()> {
        Coordinator::register_node(self, name, endpoint).await
    }

    async fn add_to_control(&self, name: &str, endpoint: Endpoint) -> Result<()> {
        Coordinator::add_to_control(self, name, endpoint).await
    }

    async fn controls_node(&self, name: &str) -> Result<bool> {
        Ok(Coordinator::controls_node(self, name))
    }

    async fn unregister_node(&self, name: &str) -> Result<()> {
        Coordinator::unregister_node(self, name).await
    }
}
