//! Per-asset loading state machine.
//!
//! ```text
//! NotLoaded ──► Loading ──► Loaded ──► NotLoaded
//!                 │  ▲         │ ▲
//!                 ▼  │retry    └─┘ level swap
//!                Failed
//! ```
//!
//! `Loading ──► NotLoaded` is cancellation. No transition skips `Loading`.

use std::collections::HashMap;

use parking_lot::Mutex;
use vista_assets::AssetId;

use crate::error::LoadError;
use crate::events::{EventBus, ResourceEvent};
use crate::key::CacheKey;

/// Reference to the cache slot backing a loaded asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelHandle {
    pub key: CacheKey,
    /// Estimated memory cost charged for the entry.
    pub cost: u64,
}

/// Loading state of one asset.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadingState {
    NotLoaded,
    /// Progress in `[0, 1]`.
    Loading { progress: f32 },
    Loaded(ModelHandle),
    Failed(LoadError),
}

impl LoadingState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadingState::Loaded(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, LoadingState::Loading { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, LoadingState::Failed(_))
    }

    /// Handle of the resident entry, when loaded.
    pub fn handle(&self) -> Option<ModelHandle> {
        match self {
            LoadingState::Loaded(handle) => Some(*handle),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn permits(&self, next: &LoadingState) -> bool {
        use LoadingState::*;
        matches!(
            (self, next),
            (NotLoaded, Loading { .. })
                | (Loading { .. }, Loading { .. })
                | (Loading { .. }, Loaded(_))
                | (Loading { .. }, Failed(_))
                | (Loading { .. }, NotLoaded)
                | (Failed(_), Loading { .. })
                | (Loaded(_), Loaded(_))
                | (Loaded(_), NotLoaded)
        )
    }
}

/// Table of loading states, one writer lock for the whole table.
///
/// Assets without an entry are `NotLoaded`.
pub struct StateTable {
    states: Mutex<HashMap<AssetId, LoadingState>>,
    events: EventBus,
}

impl StateTable {
    pub fn new(events: EventBus) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Current state of `asset`.
    pub fn get(&self, asset: AssetId) -> LoadingState {
        self.states
            .lock()
            .get(&asset)
            .cloned()
            .unwrap_or(LoadingState::NotLoaded)
    }

    /// Number of assets with a recorded state.
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }

    /// Apply `next` if the transition is legal. Returns whether the state
    /// is now `next`.
    pub fn transition(&self, asset: AssetId, next: LoadingState) -> bool {
        self.transition_if(asset, |_| true, next)
    }

    /// Apply `next` only while `guard` accepts the current state. The check
    /// and the write happen under one lock.
    pub fn transition_if(
        &self,
        asset: AssetId,
        guard: impl FnOnce(&LoadingState) -> bool,
        next: LoadingState,
    ) -> bool {
        let changed = {
            let mut states = self.states.lock();
            let current = states.get(&asset).cloned().unwrap_or(LoadingState::NotLoaded);
            if !guard(&current) {
                return false;
            }
            if current == next {
                return true;
            }
            if !current.permits(&next) {
                tracing::debug!("Rejected transition of {asset}: {current:?} -> {next:?}");
                return false;
            }
            if next == LoadingState::NotLoaded {
                states.remove(&asset);
            } else {
                states.insert(asset, next.clone());
            }
            next
        };
        self.events.emit(ResourceEvent::StateChanged {
            asset,
            state: changed,
        });
        true
    }

    /// Raise the progress of a loading asset. Never lowers it.
    pub fn progress(&self, asset: AssetId, progress: f32) {
        let progress = progress.clamp(0.0, 1.0);
        if let LoadingState::Loading { progress: current } = self.get(asset)
            && progress > current
        {
            self.transition(asset, LoadingState::Loading { progress });
        }
    }

    /// Mark `asset` as loaded with `handle`, passing through `Loading` when
    /// it was not loaded. A failed asset stays failed until retried.
    pub fn mark_loaded(&self, asset: AssetId, handle: ModelHandle) -> bool {
        let mut emitted = Vec::with_capacity(2);
        let loaded = {
            let mut states = self.states.lock();
            let current = states.get(&asset).cloned().unwrap_or(LoadingState::NotLoaded);
            match current {
                LoadingState::Failed(_) => false,
                LoadingState::Loaded(existing) if existing == handle => true,
                LoadingState::NotLoaded => {
                    emitted.push(LoadingState::Loading { progress: 0.0 });
                    emitted.push(LoadingState::Loaded(handle));
                    states.insert(asset, LoadingState::Loaded(handle));
                    true
                }
                LoadingState::Loading { .. } | LoadingState::Loaded(_) => {
                    emitted.push(LoadingState::Loaded(handle));
                    states.insert(asset, LoadingState::Loaded(handle));
                    true
                }
            }
        };
        for state in emitted {
            self.events.emit(ResourceEvent::StateChanged { asset, state });
        }
        loaded
    }

    /// Drop the state of `asset` regardless of its current value.
    pub fn remove(&self, asset: AssetId) -> Option<LoadingState> {
        let removed = self.states.lock().remove(&asset);
        if removed.is_some() {
            self.events.emit(ResourceEvent::StateChanged {
                asset,
                state: LoadingState::NotLoaded,
            });
        }
        removed
    }

    /// Drop every state.
    pub fn clear(&self) {
        let drained: Vec<AssetId> = self.states.lock().drain().map(|(id, _)| id).collect();
        for asset in drained {
            self.events.emit(ResourceEvent::StateChanged {
                asset,
                state: LoadingState::NotLoaded,
            });
        }
    }
}
