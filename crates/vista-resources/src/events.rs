//! Notifications emitted by the resource manager.
//!
//! Observers (UI bindings, diagnostics) subscribe to a broadcast channel;
//! the core never waits on them. A slow subscriber lags and loses the
//! oldest events instead of blocking loads.

use tokio::sync::broadcast;
use vista_assets::AssetId;

use crate::key::CacheKey;
use crate::state::LoadingState;

/// Something observable changed inside the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    /// The per-asset loading state changed.
    StateChanged { asset: AssetId, state: LoadingState },
    /// A decoded model entered the memory tier.
    EntryInserted { key: CacheKey, cost: u64 },
    /// An entry left the memory tier to reclaim budget.
    EntryEvicted { key: CacheKey, cost: u64 },
    /// The progressive selector swapped the displayed detail level.
    LevelChanged {
        asset: AssetId,
        from: Option<u8>,
        to: u8,
    },
    /// A low-memory signal was handled.
    LowMemory { freed: u64, cleared: bool },
}

/// Fan-out channel for [`ResourceEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ResourceEvent>,
}

impl EventBus {
    /// Create a bus that buffers up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ResourceEvent) {
        let _ = self.tx.send(event);
    }

    /// Return a new subscriber receiving events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
