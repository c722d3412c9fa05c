//! The model resource manager: one explicitly constructed service tying the
//! cache, budget, loader and progressive selector together.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use vista_assets::{AssetCatalog, AssetId, AssetStorage, DecodedModel, DecoderRegistry};
use vista_lod::{DetailLevel, LodPolicy};

use crate::budget::MemoryBudget;
use crate::cache::{CacheStats, DiskTier, PinGuard, ResourceCache};
use crate::config::ResourceConfig;
use crate::error::{LoadError, ResourceError};
use crate::events::{EventBus, ResourceEvent};
use crate::gate::AdmissionGate;
use crate::key::CacheKey;
use crate::loader::{ModelLease, PendingLoad};
use crate::progressive::{LevelUpdate, ProgressiveSelector};
use crate::state::{LoadingState, StateTable};

/// State shared by every clone of a [`ModelResourceManager`].
pub(crate) struct Shared {
    pub(crate) config: ResourceConfig,
    pub(crate) catalog: Arc<dyn AssetCatalog>,
    pub(crate) storage: Arc<dyn AssetStorage>,
    pub(crate) decoders: DecoderRegistry,
    pub(crate) policy: LodPolicy,
    pub(crate) cache: Arc<ResourceCache>,
    pub(crate) states: StateTable,
    pub(crate) gate: AdmissionGate,
    pub(crate) pending: DashMap<CacheKey, PendingLoad>,
    pub(crate) next_op: AtomicU64,
    pub(crate) events: EventBus,
    /// Serializes eviction passes.
    pub(crate) eviction: Mutex<()>,
    last_low_memory: Mutex<Option<Instant>>,
    pub(crate) selector: ProgressiveSelector,
}

/// Snapshot of manager-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceStats {
    pub memory_usage: u64,
    pub memory_ceiling: u64,
    pub cache: CacheStats,
    pub running_loads: usize,
    pub peak_loads: usize,
    pub queued_loads: usize,
    pub pending_operations: usize,
    pub tracked_assets: usize,
    pub active_selectors: usize,
}

/// Loads, caches and evicts decoded models under a memory ceiling.
///
/// Cloning is cheap; every clone drives the same caches.
#[derive(Clone)]
pub struct ModelResourceManager {
    shared: Arc<Shared>,
}

impl ModelResourceManager {
    /// Build a manager. Opens the disk tier when `config.disk_cache` is set,
    /// in `config.disk_cache_dir` or else the storage's cache directory.
    pub fn new(
        config: ResourceConfig,
        catalog: Arc<dyn AssetCatalog>,
        storage: Arc<dyn AssetStorage>,
        decoders: DecoderRegistry,
    ) -> Result<Self, ResourceError> {
        let disk = if config.disk_cache {
            let dir = match &config.disk_cache_dir {
                Some(dir) => Some(dir.clone()),
                None => storage.cache_dir()?,
            };
            dir.map(DiskTier::open).transpose()?
        } else {
            None
        };

        let budget = Arc::new(MemoryBudget::new(
            config.memory_ceiling,
            config.eviction_target_ratio,
        ));
        let events = EventBus::new(config.event_capacity);

        tracing::info!(
            "Resource manager: ceiling {} MB, {} concurrent loads, disk tier {}",
            config.memory_ceiling / (1024 * 1024),
            config.max_concurrent_loads,
            disk.as_ref()
                .map_or_else(|| "off".to_string(), |d| d.dir().display().to_string())
        );

        let shared = Shared {
            policy: LodPolicy::new(config.lod),
            cache: Arc::new(ResourceCache::new(budget, disk)),
            states: StateTable::new(events.clone()),
            gate: AdmissionGate::new(config.max_concurrent_loads),
            pending: DashMap::new(),
            next_op: AtomicU64::new(0),
            events,
            eviction: Mutex::new(()),
            last_low_memory: Mutex::new(None),
            selector: ProgressiveSelector::default(),
            config,
            catalog,
            storage,
            decoders,
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Load `asset` at `level` (`None` or `Some(0)` for the original) and
    /// wait for a terminal state.
    ///
    /// Concurrent calls for the same key share one decode. A failed asset
    /// returns its failure without decoding again; use [`retry`](Self::retry).
    pub async fn load(&self, asset: AssetId, level: Option<u8>) -> LoadingState {
        self.shared.load(asset, level).await
    }

    /// Load and return a pinned copy of the model.
    pub async fn acquire(&self, asset: AssetId, level: Option<u8>) -> Result<ModelLease, LoadError> {
        self.shared.acquire(asset, level).await
    }

    /// Copy of the cached model under `key`, if resident.
    pub fn get(&self, key: CacheKey) -> Option<DecodedModel> {
        self.shared.cache.lookup(&key)
    }

    pub fn state(&self, asset: AssetId) -> LoadingState {
        self.shared.states.get(asset)
    }

    /// Load a failed asset again. Errors with `NoOperationToRetry` unless
    /// the asset is currently `Failed`.
    pub async fn retry(&self, asset: AssetId, level: Option<u8>) -> Result<LoadingState, LoadError> {
        self.shared.retry(asset, level).await
    }

    /// Cancel in-flight loads of `asset`. Waiters resolve and the asset is
    /// left `NotLoaded` at once; a decode already running keeps its slot
    /// until it returns. Returns how many operations were cancelled.
    pub fn cancel(&self, asset: AssetId) -> usize {
        self.shared.cancel(asset)
    }

    /// Start loading the original level of each asset without waiting.
    /// Must be called within a tokio runtime.
    pub fn preload(&self, assets: impl IntoIterator<Item = AssetId>) -> usize {
        let mut started = 0;
        for asset in assets {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                if let LoadingState::Failed(err) = shared.load(asset, None).await {
                    tracing::debug!("Preload of {asset} failed: {err}");
                }
            });
            started += 1;
        }
        started
    }

    /// Drop every memory entry and the state of `asset`. Disk copies stay.
    /// Returns how many cached levels were removed.
    pub fn unload(&self, asset: AssetId) -> usize {
        self.shared.cancel(asset);
        self.shared.selector.forget(asset);
        let removed = self.shared.cache.remove_asset(asset);
        self.shared.states.remove(asset);
        tracing::debug!("Unloaded {asset} ({} levels)", removed.len());
        removed.len()
    }

    /// The asset was deleted from the library: forget it everywhere,
    /// including the disk tier.
    pub fn asset_deleted(&self, asset: AssetId) {
        self.shared.cancel(asset);
        self.shared.selector.forget(asset);
        let removed = self.shared.cache.remove_asset(asset);
        let purged = self.shared.cache.purge_disk_asset(asset);
        self.shared.states.remove(asset);
        tracing::info!(
            "Invalidated deleted asset {asset}: {} cached levels, {purged} disk files",
            removed.len()
        );
    }

    /// React to memory pressure.
    ///
    /// The first signal evicts down to `ceiling * low_memory_target_ratio`.
    /// A repeat within `low_memory_repeat_window` evicts every unpinned
    /// entry. Returns the bytes freed.
    pub fn on_low_memory(&self) -> u64 {
        let config = &self.shared.config;
        let now = Instant::now();
        let repeated = {
            let mut last = self.shared.last_low_memory.lock();
            let repeated = last
                .is_some_and(|at| now.duration_since(at) <= config.low_memory_repeat_window);
            *last = Some(now);
            repeated
        };

        let target = if repeated {
            0
        } else {
            self.shared
                .cache
                .budget()
                .target_for(config.low_memory_target_ratio)
        };
        let freed = self.shared.evict_to(target);
        tracing::warn!(
            "Low memory signal{}: freed {freed} bytes",
            if repeated { " (repeated)" } else { "" }
        );
        self.shared.events.emit(ResourceEvent::LowMemory {
            freed,
            cleared: repeated,
        });
        freed
    }

    /// Cancel everything and empty both cache tiers.
    pub fn clear(&self) {
        let cancelled = self.shared.cancel_all();
        self.shared.selector.clear();
        let delta = self.shared.cache.clear();
        self.shared.states.clear();
        tracing::info!(
            "Cleared resource cache: {} bytes released, {cancelled} loads cancelled",
            delta.unsigned_abs()
        );
    }

    /// Pick the detail level for `distance` and display it.
    pub async fn update_distance(
        &self,
        asset: AssetId,
        distance: f32,
    ) -> Result<LevelUpdate, LoadError> {
        self.shared.update_distance(asset, distance).await
    }

    /// Level the selector displays for `asset`.
    pub fn current_level(&self, asset: AssetId) -> Option<u8> {
        self.shared.selector.current_level(asset)
    }

    /// Last distance reported for `asset`.
    pub fn target_distance(&self, asset: AssetId) -> Option<f32> {
        self.shared.selector.target_distance(asset)
    }

    /// Copy of the model the selector displays for `asset`.
    pub fn displayed(&self, asset: AssetId) -> Option<DecodedModel> {
        self.shared.selector.displayed(asset)
    }

    /// Stop tracking `asset` in the selector. Cached levels stay.
    pub fn forget(&self, asset: AssetId) -> bool {
        self.shared.selector.forget(asset)
    }

    /// Levels the selector uses for `asset`.
    pub fn levels(&self, asset: AssetId) -> Option<Vec<DetailLevel>> {
        let descriptor = self.shared.catalog.descriptor(asset)?;
        Some(self.shared.policy.effective_levels(&descriptor))
    }

    /// Keep `key` out of eviction until the guard drops.
    pub fn pin(&self, key: CacheKey) -> PinGuard {
        self.shared.cache.pin(key)
    }

    pub fn policy(&self) -> &LodPolicy {
        &self.shared.policy
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.shared.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self) -> ResourceStats {
        let shared = &self.shared;
        let budget = shared.cache.budget();
        ResourceStats {
            memory_usage: budget.current_usage(),
            memory_ceiling: budget.ceiling(),
            cache: shared.cache.stats(),
            running_loads: shared.gate.running(),
            peak_loads: shared.gate.peak(),
            queued_loads: shared.gate.queued(),
            pending_operations: shared.pending.len(),
            tracked_assets: shared.states.len(),
            active_selectors: shared.selector.active_count(),
        }
    }
}
