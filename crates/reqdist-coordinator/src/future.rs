//! Result handles and idleness tracking.
//!
//! Every indivisible unit admitted to the coordinator gets a
//! [`Completion`] (held by whoever resolves the unit) and a
//! [`ResultHandle`] (held by whoever waits for it). The pair shares an
//! [`IdleTracker`] that counts unresolved units.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use reqdist_common::protocol::error::{ReqdistError, Result};
use serde_json::Value;
use tokio::sync::{oneshot, Notify};

/// Counts pending units and wakes waiters when the count drops to zero.
#[derive(Debug, Default)]
pub struct IdleTracker {
    pending: AtomicUsize,
    idle: Notify,
}

impl IdleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement(&self) {
        let previous = self.pending.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "idle tracker decremented below zero");
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Waits until no unit is pending. Returns at once if none is.
    ///
    /// Work submitted concurrently keeps this waiting; it observes a moment of
    /// idleness, it does not stop new submissions.
    pub async fn await_zero(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a decrement in between is not missed
            notified.as_mut().enable();

            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Creates a pending unit: the resolver half and the waiter half.
pub fn pending(tracker: Arc<IdleTracker>) -> (Completion, ResultHandle) {
    let (tx, rx) = oneshot::channel();
    tracker.increment();
    (
        Completion {
            tx: Some(tx),
            tracker,
        },
        ResultHandle { rx },
    )
}

/// Resolver half of a pending unit.
///
/// Resolving consumes the completion, so a unit resolves at most once.
/// Dropping it unresolved still releases the pending count; the waiter then
/// sees an internal error.
#[derive(Debug)]
pub struct Completion {
    tx: Option<oneshot::Sender<Result<Value>>>,
    tracker: Arc<IdleTracker>,
}

impl Completion {
    pub fn resolve(mut self, outcome: Result<Value>) {
        if let Some(tx) = self.tx.take() {
            // The waiter may have given up; the outcome is then discarded
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.tracker.decrement();
    }
}

/// Waiter half of a pending unit.
#[derive(Debug)]
pub struct ResultHandle {
    rx: oneshot::Receiver<Result<Value>>,
}

impl ResultHandle {
    /// Waits for the unit and returns its value or its failure, with the
    /// failure kind preserved.
    pub async fn wait(self) -> Result<Value> {
        self.rx
            .await
            .map_err(|_| ReqdistError::Internal("requisition dropped before completion".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolve_value() {
        let tracker = Arc::new(IdleTracker::new());
        let (completion, handle) = pending(tracker.clone());
        assert_eq!(tracker.pending(), 1);

        completion.resolve(Ok(json!(42)));
        assert_eq!(tracker.pending(), 0);
        assert_eq!(handle.wait().await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_resolve_error_keeps_kind() {
        let tracker = Arc::new(IdleTracker::new());
        let (completion, handle) = pending(tracker);

        completion.resolve(Err(ReqdistError::NoNodesAvailable));
        assert!(matches!(handle.wait().await, Err(ReqdistError::NoNodesAvailable)));
    }

    #[tokio::test]
    async fn test_dropped_completion_releases_count() {
        let tracker = Arc::new(IdleTracker::new());
        let (completion, handle) = pending(tracker.clone());

        drop(completion);
        assert_eq!(tracker.pending(), 0);
        assert!(matches!(handle.wait().await, Err(ReqdistError::Internal(_))));
    }

    #[tokio::test]
    async fn test_resolve_without_waiter() {
        let tracker = Arc::new(IdleTracker::new());
        let (completion, handle) = pending(tracker.clone());
        drop(handle);

        completion.resolve(Ok(Value::Null));
        assert_eq!(tracker.pending(), 0);
    }

    #[tokio::test]
    async fn test_await_zero_returns_immediately_when_idle() {
        let tracker = IdleTracker::new();
        tokio::time::timeout(Duration::from_millis(100), tracker.await_zero())
            .await
            .expect("idle tracker should not block");
    }

    #[tokio::test]
    async fn test_await_zero_waits_for_every_unit() {
        let tracker = Arc::new(IdleTracker::new());
        let (first, _h1) = pending(tracker.clone());
        let (second, _h2) = pending(tracker.clone());

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.await_zero().await })
        };

        first.resolve(Ok(Value::Null));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        second.resolve(Ok(Value::Null));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be released")
            .unwrap();
    }
}
