use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use reqdist_common::requisition::{Factors, IndivisibleRequisition};
use tokio::sync::Notify;

use crate::future::Completion;

/// An indivisible unit waiting for dispatch.
pub struct Admission {
    pub unit: Arc<dyn IndivisibleRequisition>,
    pub factors: Factors,
    pub completion: Completion,
    /// Number of times the unit was sent to a node that then failed.
    pub retries: u32,
}

impl Admission {
    pub fn new(unit: Arc<dyn IndivisibleRequisition>, completion: Completion) -> Self {
        let factors = Factors::of(unit.as_ref());
        Self {
            unit,
            factors,
            completion,
            retries: 0,
        }
    }
}

/// FIFO of admitted units with head insertion for retries.
///
/// Every enqueue stores a wake-up permit, so a consumer that starts waiting
/// after an item arrived still wakes.
#[derive(Default)]
pub struct AdmissionQueue {
    entries: Mutex<VecDeque<Admission>>,
    available: Notify,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the tail.
    pub fn enqueue(&self, entry: Admission) {
        self.entries().push_back(entry);
        self.available.notify_one();
    }

    /// Inserts at the head, ahead of every unit not yet attempted.
    pub fn enqueue_urgent(&self, entry: Admission) {
        self.entries().push_front(entry);
        self.available.notify_one();
    }

    /// Takes the head entry, waiting once for a wake-up if the queue is empty.
    ///
    /// Returns `None` if woken while still empty; callers loop.
    pub async fn take_next(&self) -> Option<Admission> {
        if let Some(entry) = self.try_take() {
            return Some(entry);
        }
        self.available.notified().await;
        self.try_take()
    }

    pub fn try_take(&self) -> Option<Admission> {
        self.entries().pop_front()
    }

    /// Wakes a consumer blocked in [`take_next`](Self::take_next) without
    /// adding anything.
    pub fn wake(&self) {
        self.available.notify_one();
    }

    /// Removes every queued entry.
    pub fn drain(&self) -> Vec<Admission> {
        self.entries().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<Admission>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
