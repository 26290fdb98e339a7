use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use reqdist_common::config::Settings;
use reqdist_common::events::{EventDispatcher, NodeEventListener};
use reqdist_common::link::CoordinatorLink;
use reqdist_common::machine::{resolve_capacity, CapabilityProbe};
use reqdist_common::protocol::error::{ReqdistError, Result};
use reqdist_common::protocol::NodeInfo;
use reqdist_common::requisition::{IndivisibleRequisition, Requisition};
use reqdist_common::transport::{Endpoint, NodeService};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::monitor::{MonitorConfig, ReconnectionMonitor};

/// A worker node processing units for a coordinator.
///
/// The node is reachable in-process through [`endpoint`](Self::endpoint),
/// or over TCP once [`set_advertised_addr`](Self::set_advertised_addr) has
/// been given the address of its [`NodeServer`](crate::NodeServer).
pub struct ProcessNode {
    info: NodeInfo,
    link: Arc<dyn CoordinatorLink>,
    events: EventDispatcher,
    monitor_config: MonitorConfig,
    active: AtomicBool,
    registered: AtomicBool,
    incoming: AtomicU64,
    advertised_addr: Mutex<Option<String>>,
    monitor: Mutex<Option<CancellationToken>>,
}

impl ProcessNode {
    pub fn new(name: impl Into<String>, clock: i64, memory: i64, link: Arc<dyn CoordinatorLink>) -> Arc<Self> {
        Self::with_config(NodeInfo::new(name, clock, memory), link, MonitorConfig::default())
    }

    pub fn with_config(info: NodeInfo, link: Arc<dyn CoordinatorLink>, monitor_config: MonitorConfig) -> Arc<Self> {
        Arc::new(Self {
            info,
            link,
            events: EventDispatcher::new(),
            monitor_config,
            active: AtomicBool::new(true),
            registered: AtomicBool::new(false),
            incoming: AtomicU64::new(0),
            advertised_addr: Mutex::new(None),
            monitor: Mutex::new(None),
        })
    }

    /// Builds a node from settings: capacity from configuration or the probe,
    /// name from the advertised address and the capacity.
    pub fn from_settings(
        settings: &Settings,
        probe: &dyn CapabilityProbe,
        link: Arc<dyn CoordinatorLink>,
    ) -> Result<Arc<Self>> {
        let capacity = resolve_capacity(settings, probe)?;
        let ip = settings.advertised_ip().to_string();
        let name = NodeInfo::node_name(&ip, capacity.clock, capacity.memory);

        Ok(Self::with_config(
            NodeInfo::new(name, capacity.clock, capacity.memory),
            link,
            MonitorConfig::from(settings),
        ))
    }

    pub fn node_info(&self) -> &NodeInfo {
        &self.info
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn add_listener(&self, listener: Arc<dyn NodeEventListener>) {
        self.events.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn NodeEventListener>) -> bool {
        self.events.remove_listener(listener)
    }

    /// Number of units received so far.
    pub fn incoming(&self) -> u64 {
        self.incoming.load(Ordering::SeqCst)
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Makes the node advertise a TCP endpoint instead of an in-process one.
    pub fn set_advertised_addr(&self, addr: impl Into<String>) {
        *lock(&self.advertised_addr) = Some(addr.into());
    }

    /// How the coordinator reaches this node.
    pub fn endpoint(self: &Arc<Self>) -> Endpoint {
        match lock(&self.advertised_addr).clone() {
            Some(addr) => Endpoint::remote(addr),
            None => Endpoint::local(self.clone()),
        }
    }

    /// Registers with the coordinator.
    pub async fn register(self: &Arc<Self>) -> Result<()> {
        self.link.register_node(&self.info.name, self.endpoint()).await?;
        self.registered.store(true, Ordering::SeqCst);
        info!("Node {} registered", self.info.name);
        Ok(())
    }

    /// Starts the reconnection monitor, once.
    pub fn start(self: &Arc<Self>) {
        let mut monitor = lock(&self.monitor);
        if monitor.is_some() || !self.is_active() {
            return;
        }

        let shutdown = CancellationToken::new();
        ReconnectionMonitor::new(self, self.monitor_config.clone(), shutdown.clone()).spawn();
        *monitor = Some(shutdown);
    }

    /// Registers and starts the monitor. A failed registration is left to
    /// the monitor to retry.
    pub async fn launch(self: &Arc<Self>) {
        if let Err(e) = self.register().await {
            warn!("Node {} could not register, will retry: {}", self.info.name, e);
        }
        self.start();
    }

    /// Makes sure the coordinator controls this node, registering again if
    /// it does not.
    ///
    /// A name still published by the coordinator is put back under control
    /// instead.
    pub async fn verify_connection(self: &Arc<Self>) -> Result<()> {
        let name = self.info.name.as_str();

        if !self.is_registered() {
            self.register().await?;
            return Ok(());
        }
        if self.link.controls_node(name).await? {
            return Ok(());
        }

        debug!("Coordinator no longer controls {}, registering again", name);
        match self.link.register_node(name, self.endpoint()).await {
            Err(ReqdistError::NodeAlreadyExists(_)) => self.link.add_to_control(name, self.endpoint()).await,
            other => other,
        }
    }

    fn stop_monitor(&self) {
        if let Some(shutdown) = lock(&self.monitor).take() {
            shutdown.cancel();
        }
    }
}

#[async_trait]
impl NodeService for ProcessNode {
    /// Runs the unit on the blocking pool.
    ///
    /// Every failure of the unit itself, panics included, is reported as a
    /// processing failure so it is never mistaken for a communication one.
    async fn process_unit(&self, unit: Arc<dyn IndivisibleRequisition>) -> Result<Value> {
        if !self.is_active() {
            return Err(ReqdistError::NodeInactive(self.info.name.clone()));
        }
        self.incoming.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = unit.on_before_process(&self.info) {
            debug!("Pre-processing hook failed on {}: {}", self.info.name, e);
        }

        let running = unit.clone();
        let outcome = match tokio::task::spawn_blocking(move || running.process()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(ReqdistError::Processing(message))) => Err(ReqdistError::Processing(message)),
            Ok(Err(other)) => Err(ReqdistError::Processing(other.to_string())),
            Err(join) if join.is_panic() => Err(ReqdistError::Processing("requisition panicked".into())),
            Err(join) => Err(ReqdistError::Processing(format!("requisition aborted: {}", join))),
        };

        let requisition = Requisition::Indivisible(unit);
        match &outcome {
            Ok(value) => self.events.dispatch("requisition_processed", |l| {
                l.requisition_processed(&self.info, &requisition, value)
            }),
            Err(error) => self.events.dispatch("requisition_failed", |l| {
                l.requisition_failed(&self.info, &requisition, error)
            }),
        }
        outcome
    }

    fn name(&self) -> &str {
        &self.info.name
    }

    fn clock_amount(&self) -> i64 {
        self.info.clock
    }

    fn memory_amount(&self) -> i64 {
        self.info.memory
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stops the monitor and leaves the coordinator. Calling it again does
    /// nothing.
    async fn finish(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop_monitor();

        if let Err(e) = self.link.unregister_node(&self.info.name).await {
            warn!("Node {} could not unregister: {}", self.info.name, e);
        }
        self.registered.store(false, Ordering::SeqCst);

        info!("Node {} finished", self.info.name);
        self.events.dispatch("node_finished", |l| l.node_finished(&self.info));
        Ok(())
    }

    fn info(&self) -> NodeInfo {
        self.info.clone()
    }
}

impl std::fmt::Debug for ProcessNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessNode")
            .field("info", &self.info)
            .field("active", &self.is_active())
            .field("registered", &self.is_registered())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqdist_common::machine::{Capacity, StaticProbe};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Link that accepts everything.
    #[derive(Default)]
    struct OpenLink {
        unregistered: AtomicUsize,
    }

    #[async_trait]
    impl CoordinatorLink for OpenLink {
        async fn register_node(&self, _name: &str, _endpoint: Endpoint) -> Result<()> {
            Ok(())
        }

        async fn add_to_control(&self, _name: &str, _endpoint: Endpoint) -> Result<()> {
            Ok(())
        }

        async fn controls_node(&self, _name: &str) -> Result<bool> {
            Ok(true)
        }

        async fn unregister_node(&self, _name: &str) -> Result<()> {
            self.unregistered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Outcome(std::result::Result<i64, &'static str>);

    impl IndivisibleRequisition for Outcome {
        fn process(&self) -> Result<Value> {
            match self.0 {
                Ok(v) => Ok(json!(v)),
                Err("panic") => panic!("requisition blew up"),
                Err("timeout") => Err(ReqdistError::Timeout(5)),
                Err(msg) => Err(ReqdistError::Processing(msg.to_string())),
            }
        }
    }

    #[derive(Default)]
    struct Tally {
        processed: AtomicUsize,
        failed: AtomicUsize,
        finished: AtomicUsize,
    }

    impl NodeEventListener for Tally {
        fn node_finished(&self, _node: &NodeInfo) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }

        fn requisition_processed(&self, _node: &NodeInfo, _r: &Requisition, _v: &Value) {
            self.processed.fetch_add(1, Ordering::SeqCst);
        }

        fn requisition_failed(&self, _node: &NodeInfo, _r: &Requisition, _e: &ReqdistError) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn node() -> (Arc<ProcessNode>, Arc<OpenLink>) {
        let link = Arc::new(OpenLink::default());
        (ProcessNode::new("10.0.0.1|100|100", 100, 100, link.clone()), link)
    }

    #[tokio::test]
    async fn test_process_unit_counts_and_fires_events() {
        let (node, _) = node();
        let tally = Arc::new(Tally::default());
        node.add_listener(tally.clone());

        assert_eq!(node.process_unit(Arc::new(Outcome(Ok(4)))).await.unwrap(), json!(4));
        assert!(node.process_unit(Arc::new(Outcome(Err("bad input")))).await.is_err());

        assert_eq!(node.incoming(), 2);
        assert_eq!(tally.processed.load(Ordering::SeqCst), 1);
        assert_eq!(tally.failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unit_failures_are_processing_failures() {
        let (node, _) = node();

        for case in ["bad input", "timeout", "panic"] {
            let error = node.process_unit(Arc::new(Outcome(Err(case)))).await.unwrap_err();
            assert!(matches!(error, ReqdistError::Processing(_)), "{case}: {error:?}");
            assert!(!error.is_communication_failure());
        }
    }

    #[tokio::test]
    async fn test_inactive_node_rejects_as_communication_failure() {
        let (node, link) = node();
        let tally = Arc::new(Tally::default());
        node.add_listener(tally.clone());

        node.finish().await.unwrap();
        node.finish().await.unwrap();
        assert_eq!(link.unregistered.load(Ordering::SeqCst), 1);
        assert_eq!(tally.finished.load(Ordering::SeqCst), 1);

        let error = node.process_unit(Arc::new(Outcome(Ok(1)))).await.unwrap_err();
        assert!(matches!(error, ReqdistError::NodeInactive(_)));
        assert!(error.is_communication_failure());
        assert_eq!(node.incoming(), 0);
    }

    #[tokio::test]
    async fn test_endpoint_follows_advertised_addr() {
        let (node, _) = node();
        assert!(matches!(node.endpoint(), Endpoint::Local(_)));

        node.set_advertised_addr("10.0.0.1:7200");
        assert_eq!(node.endpoint().address(), Some("10.0.0.1:7200"));
    }

    #[tokio::test]
    async fn test_from_settings_names_node_after_capacity() {
        let settings = Settings {
            base_ip: Some("127.0.0.1".into()),
            memory_amount: Some(512),
            ..Settings::default()
        };
        let probe = StaticProbe(Capacity { clock: 2400, memory: 8192 });
        let node = ProcessNode::from_settings(&settings, &probe, Arc::new(OpenLink::default())).unwrap();

        assert_eq!(node.clock_amount(), 2400);
        assert_eq!(node.memory_amount(), 512);
        assert!(node.name().ends_with("|2400|512"), "{}", node.name());
    }

    #[tokio::test]
    async fn test_register_marks_node() {
        let (node, _) = node();
        assert!(!node.is_registered());
        node.register().await.unwrap();
        assert!(node.is_registered());
    }
}
