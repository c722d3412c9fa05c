//! Admission gate bounding how many decodes run at once.
//!
//! Waiters are admitted in arrival order (tokio's semaphore is fair). The
//! gate also keeps running/peak/queued counters for diagnostics.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default number of concurrent decodes.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// FIFO gate with `limit` slots.
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    running: AtomicUsize,
    peak: AtomicUsize,
    queued: AtomicUsize,
}

impl AdmissionGate {
    /// Create a gate with `limit` slots (at least one).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Wait for a free slot. The slot is held until the returned
    /// [`Admission`] drops. Returns `None` only if the gate was closed.
    pub async fn admit(&self) -> Option<Admission> {
        let queued = QueueSlot::enter(&self.counters);
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok()?;
        drop(queued);

        let running = self.counters.running.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.peak.fetch_max(running, Ordering::AcqRel);
        Some(Admission {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Decodes currently holding a slot.
    pub fn running(&self) -> usize {
        self.counters.running.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously held slots seen so far.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::Acquire)
    }

    /// Callers waiting for a slot.
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// A held slot; released on drop.
pub struct Admission {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.counters.running.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Counts a waiter as queued until admitted or abandoned.
struct QueueSlot<'a>(&'a Counters);

impl<'a> QueueSlot<'a> {
    fn enter(counters: &'a Counters) -> Self {
        counters.queued.fetch_add(1, Ordering::AcqRel);
        Self(counters)
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.queued.fetch_sub(1, Ordering::AcqRel);
    }
}
