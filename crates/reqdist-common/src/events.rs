//! Node lifecycle and processing notifications.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::warn;

use crate::protocol::error::ReqdistError;
use crate::protocol::NodeInfo;
use crate::requisition::Requisition;

/// Receives node events. Every method defaults to doing nothing.
///
/// `node` is the node firing the event: the coordinator for events about
/// submitted requisitions and node membership, the worker itself for events
/// it fires locally.
pub trait NodeEventListener: Send + Sync {
    fn node_finished(&self, _node: &NodeInfo) {}

    fn requisition_processed(&self, _node: &NodeInfo, _requisition: &Requisition, _result: &Value) {}

    fn requisition_failed(&self, _node: &NodeInfo, _requisition: &Requisition, _error: &ReqdistError) {}

    fn lost_connection(&self, _node: &NodeInfo) {}

    fn restored_connection(&self, _node: &NodeInfo) {}

    /// `registered` joined the coordinator `node`.
    fn node_registered(&self, _node: &NodeInfo, _registered: &NodeInfo) {}

    /// `unregistered` left the coordinator `node`.
    fn node_unregistered(&self, _node: &NodeInfo, _unregistered: &NodeInfo) {}
}

/// Fans events out to the registered listeners.
///
/// A panicking listener is logged and skipped; delivery to the others
/// continues.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<Arc<dyn NodeEventListener>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn NodeEventListener>) {
        self.write().push(listener);
    }

    /// Removes `listener`, compared by identity. Returns whether it was present.
    pub fn remove_listener(&self, listener: &Arc<dyn NodeEventListener>) -> bool {
        let mut listeners = self.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Delivers one event to every listener.
    pub fn dispatch<F>(&self, event: &str, f: F)
    where
        F: Fn(&dyn NodeEventListener),
    {
        for listener in self.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))).is_err() {
                warn!("Event listener panicked while handling {}", event);
            }
        }
    }

    // Listeners run outside the lock so they may add or remove listeners
    fn snapshot(&self) -> Vec<Arc<dyn NodeEventListener>> {
        match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn NodeEventListener>>> {
        self.listeners.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        finished: AtomicUsize,
        lost: AtomicUsize,
    }

    impl NodeEventListener for Counting {
        fn node_finished(&self, _node: &NodeInfo) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }

        fn lost_connection(&self, _node: &NodeInfo) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;

    impl NodeEventListener for Panicking {
        fn node_finished(&self, _node: &NodeInfo) {
            panic!("listener bug");
        }
    }

    fn node() -> NodeInfo {
        NodeInfo::new("n1", 100, 100)
    }

    #[test]
    fn test_dispatch_to_all_listeners() {
        let events = EventDispatcher::new();
        let a = Arc::new(Counting::default());
        let b = Arc::new(Counting::default());
        events.add_listener(a.clone());
        events.add_listener(b.clone());

        events.dispatch("node_finished", |l| l.node_finished(&node()));

        assert_eq!(a.finished.load(Ordering::SeqCst), 1);
        assert_eq!(b.finished.load(Ordering::SeqCst), 1);
        assert_eq!(a.lost.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let events = EventDispatcher::new();
        let counting = Arc::new(Counting::default());
        events.add_listener(Arc::new(Panicking));
        events.add_listener(counting.clone());

        events.dispatch("node_finished", |l| l.node_finished(&node()));

        assert_eq!(counting.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_listener() {
        let events = EventDispatcher::new();
        let counting: Arc<dyn NodeEventListener> = Arc::new(Counting::default());
        events.add_listener(counting.clone());
        assert_eq!(events.listener_count(), 1);

        assert!(events.remove_listener(&counting));
        assert!(!events.remove_listener(&counting));
        assert_eq!(events.listener_count(), 0);
    }
}
