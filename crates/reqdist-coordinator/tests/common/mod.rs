//! Shared fixtures: held requisitions and in-process clusters.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use reqdist_common::events::NodeEventListener;
use reqdist_common::link::CoordinatorLink;
use reqdist_common::protocol::error::{ReqdistError, Result};
use reqdist_common::protocol::NodeInfo;
use reqdist_common::requisition::{IndivisibleRequisition, Requisition};
use reqdist_coordinator::Coordinator;
use reqdist_node::ProcessNode;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A unit that blocks inside `process` until released.
///
/// Records the node it runs on and returns that node's name, or its tag
/// when it has one.
pub struct Held {
    processing: i64,
    memory: i64,
    tag: Option<i64>,
    node: Mutex<Option<String>>,
    started: watch::Sender<bool>,
    released: Mutex<bool>,
    release_signal: Condvar,
}

impl Held {
    pub fn new(processing: i64, memory: i64) -> Arc<Self> {
        Self::build(processing, memory, None)
    }

    pub fn unset() -> Arc<Self> {
        Self::new(-1, -1)
    }

    pub fn tagged(tag: i64) -> Arc<Self> {
        Self::build(-1, -1, Some(tag))
    }

    fn build(processing: i64, memory: i64, tag: Option<i64>) -> Arc<Self> {
        let (started, _) = watch::channel(false);
        Arc::new(Self {
            processing,
            memory,
            tag,
            node: Mutex::new(None),
            started,
            released: Mutex::new(false),
            release_signal: Condvar::new(),
        })
    }

    /// Waits until a node started processing the unit.
    pub async fn wait_started(&self) {
        let mut started = self.started.subscribe();
        tokio::time::timeout(Duration::from_secs(5), started.wait_for(|s| *s))
            .await
            .expect("unit never started")
            .expect("unit dropped");
    }

    pub fn has_started(&self) -> bool {
        *self.started.borrow()
    }

    pub fn release(&self) {
        *self.released.lock().unwrap() = true;
        self.release_signal.notify_all();
    }

    pub fn node(&self) -> Option<String> {
        self.node.lock().unwrap().clone()
    }

    pub fn requisition(self: &Arc<Self>) -> Requisition {
        Requisition::Indivisible(self.clone())
    }
}

impl IndivisibleRequisition for Held {
    fn process(&self) -> Result<Value> {
        self.started.send_replace(true);

        let mut released = self.released.lock().unwrap();
        while !*released {
            released = self.release_signal.wait(released).unwrap();
        }
        drop(released);

        match self.tag {
            Some(tag) => Ok(json!(tag)),
            None => Ok(json!(self.node())),
        }
    }

    fn processing_factor(&self) -> i64 {
        self.processing
    }

    fn memory_factor(&self) -> i64 {
        self.memory
    }

    fn on_before_process(&self, node: &NodeInfo) -> Result<()> {
        *self.node.lock().unwrap() = Some(node.name.clone());
        Ok(())
    }
}

/// A unit that fails on its own.
pub struct Failing;

impl IndivisibleRequisition for Failing {
    fn process(&self) -> Result<Value> {
        Err(ReqdistError::Processing("bad input".into()))
    }
}

/// Starts in-process nodes `n1..` with the given (clock, memory) capacities
/// and registers them in order.
pub async fn start_nodes(coordinator: &Arc<Coordinator>, capacities: &[(i64, i64)]) -> Vec<Arc<ProcessNode>> {
    let mut nodes = Vec::with_capacity(capacities.len());
    for (i, (clock, memory)) in capacities.iter().enumerate() {
        let link: Arc<dyn CoordinatorLink> = coordinator.clone();
        let node = ProcessNode::new(format!("n{}", i + 1), *clock, *memory, link);
        node.register().await.expect("node registration failed");
        nodes.push(node);
    }
    nodes
}

pub fn spawn_submit(coordinator: &Arc<Coordinator>, requisition: Requisition) -> JoinHandle<Result<Value>> {
    let coordinator = coordinator.clone();
    tokio::spawn(async move { coordinator.submit(requisition).await })
}

/// Submits `unit` and waits until it runs somewhere.
pub async fn submit_held(coordinator: &Arc<Coordinator>, unit: &Arc<Held>) -> JoinHandle<Result<Value>> {
    let handle = spawn_submit(coordinator, unit.requisition());
    unit.wait_started().await;
    handle
}

/// Submits every unit one after the other, each held once started, and
/// returns the node each one landed on.
pub async fn dispatch_held(coordinator: &Arc<Coordinator>, units: &[Arc<Held>]) -> Vec<String> {
    let mut handles = Vec::with_capacity(units.len());
    for unit in units {
        handles.push(submit_held(coordinator, unit).await);
    }

    let placed: Vec<String> = units.iter().map(|u| u.node().unwrap_or_default()).collect();
    for unit in units {
        unit.release();
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    placed
}

/// Counts every coordinator event.
#[derive(Default)]
pub struct EventLog {
    pub registered: AtomicUsize,
    pub unregistered: AtomicUsize,
    pub processed: AtomicUsize,
    pub failed: AtomicUsize,
    pub finished: AtomicUsize,
}

impl EventLog {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl NodeEventListener for EventLog {
    fn node_finished(&self, _node: &NodeInfo) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn requisition_processed(&self, _node: &NodeInfo, _requisition: &Requisition, _result: &Value) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    fn requisition_failed(&self, _node: &NodeInfo, _requisition: &Requisition, _error: &ReqdistError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn node_registered(&self, _node: &NodeInfo, _registered: &NodeInfo) {
        self.registered.fetch_add(1, Ordering::SeqCst);
    }

    fn node_unregistered(&self, _node: &NodeInfo, _unregistered: &NodeInfo) {
        self.unregistered.fetch_add(1, Ordering::SeqCst);
    }
}
