//! Deduplicated, admission-controlled loading.
//!
//! Each cache key has at most one operation in flight. The first caller
//! spawns the operation; later callers attach to its result channel. The
//! operation resolves, in order: disk tier (no admission slot), then a
//! decoder on the blocking pool behind the
//! [`AdmissionGate`](crate::gate::AdmissionGate).
//!
//! Operations run in their own task so a caller dropping its future does
//! not strand the others. Cancellation is a per-operation `watch` signal
//! raced against the work with `tokio::select!`. A decode already on the
//! blocking pool keeps its admission slot until the decoder returns; its
//! result is dropped.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use vista_assets::{AssetDescriptor, AssetId, DecodedModel};
use vista_lod::TIER_TABLE;

use crate::cache::{EntryState, PinGuard};
use crate::error::LoadError;
use crate::events::ResourceEvent;
use crate::key::CacheKey;
use crate::manager::Shared;
use crate::state::{LoadingState, ModelHandle};

/// How often [`Shared::acquire`] reloads an entry evicted before it could be pinned.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Bookkeeping for one in-flight operation.
pub(crate) struct PendingLoad {
    pub(crate) op: u64,
    pub(crate) result: watch::Receiver<Option<LoadingState>>,
    pub(crate) cancel: watch::Sender<bool>,
}

/// A copy of a cached model whose entry stays pinned while the lease lives.
#[derive(Debug)]
pub struct ModelLease {
    model: DecodedModel,
    pin: PinGuard,
}

impl ModelLease {
    pub fn model(&self) -> &DecodedModel {
        &self.model
    }

    pub fn key(&self) -> CacheKey {
        self.pin.key()
    }

    /// Take the model, releasing the pin.
    pub fn into_model(self) -> DecodedModel {
        self.model
    }
}

impl Shared {
    /// Load `asset` at `level` and resolve at a terminal state.
    pub(crate) async fn load(self: &Arc<Self>, asset: AssetId, level: Option<u8>) -> LoadingState {
        let Some(descriptor) = self.catalog.descriptor(asset) else {
            tracing::debug!("Load requested for unknown asset {asset}");
            return LoadingState::Failed(LoadError::FileNotFound(asset.to_string()));
        };
        let (mut key, mut file_name) = match self.resolve(&descriptor, level) {
            Ok(resolved) => resolved,
            Err(err) => return LoadingState::Failed(err),
        };

        let current = self.states.get(asset);
        if current.is_failed() {
            return current;
        }

        // A variant whose file was missing before goes straight to the original.
        if !key.is_original() && self.cache.entry_state(&key) == Some(EntryState::Failed) {
            key = CacheKey::original(asset);
            file_name = descriptor.file_name.clone();
        }

        let outcome = self.load_key(key, file_name, &descriptor).await;
        match outcome {
            LoadingState::Failed(LoadError::FileNotFound(ref missing)) if !key.is_original() => {
                tracing::debug!("No file {missing} for {key}, serving the original");
                let original = CacheKey::original(asset);
                self.load_key(original, descriptor.file_name.clone(), &descriptor)
                    .await
            }
            outcome => outcome,
        }
    }

    async fn load_key(
        self: &Arc<Self>,
        key: CacheKey,
        file_name: String,
        descriptor: &Arc<AssetDescriptor>,
    ) -> LoadingState {
        if let Some(cost) = self.cache.touch(&key) {
            let handle = ModelHandle { key, cost };
            self.states.mark_loaded(key.asset, handle);
            return LoadingState::Loaded(handle);
        }
        let result = self.start_or_join(key, file_name, descriptor);
        wait_for_outcome(result).await
    }

    /// Map a requested level to the cache key that serves it and the file
    /// to decode. Levels without a file of their own resolve to the original.
    fn resolve(
        &self,
        descriptor: &AssetDescriptor,
        level: Option<u8>,
    ) -> Result<(CacheKey, String), LoadError> {
        let index = level.unwrap_or(0) as usize;
        if index >= TIER_TABLE.len() {
            return Err(LoadError::FileNotFound(format!(
                "{} has no detail level {index}",
                descriptor.file_name
            )));
        }
        let levels = self.policy.effective_levels(descriptor);
        match levels.get(index) {
            Some(level) if !level.is_original() && level.backing.has_artifact() => Ok((
                CacheKey::new(descriptor.id, Some(level.index)),
                level.file_name.clone(),
            )),
            _ => Ok((
                CacheKey::original(descriptor.id),
                descriptor.file_name.clone(),
            )),
        }
    }

    fn start_or_join(
        self: &Arc<Self>,
        key: CacheKey,
        file_name: String,
        descriptor: &Arc<AssetDescriptor>,
    ) -> watch::Receiver<Option<LoadingState>> {
        let (result_rx, started) = match self.pending.entry(key) {
            Entry::Occupied(entry) => {
                tracing::trace!("Joining in-flight load of {key}");
                (entry.get().result.clone(), None)
            }
            Entry::Vacant(entry) => {
                let op = self.next_op.fetch_add(1, Ordering::Relaxed);
                let (result_tx, result_rx) = watch::channel(None);
                let (cancel_tx, cancel_rx) = watch::channel(false);
                entry.insert(PendingLoad {
                    op,
                    result: result_rx.clone(),
                    cancel: cancel_tx,
                });
                (result_rx, Some((op, result_tx, cancel_rx)))
            }
        };

        if let Some((op, result_tx, cancel_rx)) = started {
            self.states.transition_if(
                key.asset,
                |state| !state.is_loaded() && !state.is_loading(),
                LoadingState::Loading { progress: 0.0 },
            );
            let shared = Arc::clone(self);
            let descriptor = Arc::clone(descriptor);
            tokio::spawn(async move {
                shared
                    .run_load(op, key, file_name, descriptor, result_tx, cancel_rx)
                    .await;
            });
        }
        result_rx
    }

    async fn run_load(
        self: Arc<Self>,
        op: u64,
        key: CacheKey,
        file_name: String,
        descriptor: Arc<AssetDescriptor>,
        result: watch::Sender<Option<LoadingState>>,
        mut cancel: watch::Receiver<bool>,
    ) {
        let outcome = tokio::select! {
            outcome = self.execute(op, key, file_name, &descriptor) => outcome,
            () = cancelled(&mut cancel) => self.abandon(key),
        };
        // The entry is in the cache by now; a late cancel no longer applies.
        if let LoadingState::Loaded(handle) = &outcome {
            self.reclaim(handle.key).await;
        }
        self.pending.remove_if(&key, |_, pending| pending.op == op);
        result.send_replace(Some(outcome));
    }

    /// Whether operation `op` still owns `key`.
    fn owns(&self, key: &CacheKey, op: u64) -> bool {
        self.pending.get(key).is_some_and(|pending| pending.op == op)
    }

    async fn execute(
        self: &Arc<Self>,
        op: u64,
        key: CacheKey,
        file_name: String,
        descriptor: &Arc<AssetDescriptor>,
    ) -> LoadingState {
        let asset = key.asset;
        self.cache.reserve(key);

        if self.cache.disk().is_some() {
            let cache = Arc::clone(&self.cache);
            let restored = tokio::task::spawn_blocking(move || cache.restore_from_disk(&key))
                .await
                .ok()
                .flatten();
            if let Some(model) = restored {
                return self.complete(key, model);
            }
        }

        let Some(admission) = self.gate.admit().await else {
            return self.fail(key, LoadError::DecodeFailed("admission gate closed".into()));
        };
        if self.owns(&key, op) {
            self.states.progress(asset, 0.25);
        }

        let Some(decoder) = self.decoders.get(descriptor.format) else {
            return self.fail(key, LoadError::UnsupportedFormat(descriptor.format));
        };

        tracing::debug!("Decoding {key} from {file_name}");
        let shared = Arc::clone(self);
        let descriptor = Arc::clone(descriptor);
        let decoded = tokio::task::spawn_blocking(move || -> Result<DecodedModel, LoadError> {
            let _admission = admission;
            let mut source = shared.storage.open(&descriptor, &file_name)?;
            if shared.owns(&key, op) {
                shared.states.progress(descriptor.id, 0.5);
            }
            Ok(decoder.decode(&descriptor, &mut source)?)
        })
        .await;

        match decoded {
            Ok(Ok(model)) => self.complete(key, model),
            Ok(Err(err)) => self.fail(key, err),
            Err(err) => self.fail(key, LoadError::DecodeFailed(err.to_string())),
        }
    }

    /// Cache a freshly produced model.
    fn complete(&self, key: CacheKey, mut model: DecodedModel) -> LoadingState {
        model.asset = key.asset;
        model.level = key.level;
        let cost = self.config.cost_model.cost_of(&model);
        self.cache.insert(key, model, cost);
        self.events.emit(ResourceEvent::EntryInserted { key, cost });

        let handle = ModelHandle { key, cost };
        self.states.mark_loaded(key.asset, handle);
        tracing::debug!("Loaded {key} ({cost} bytes)");
        LoadingState::Loaded(handle)
    }

    /// Evict down to the target if usage is over the ceiling, keeping `key`.
    async fn reclaim(self: &Arc<Self>, key: CacheKey) {
        let budget = self.cache.budget();
        if !budget.is_over_budget() {
            return;
        }
        let target = budget.target();
        let pin = self.cache.pin(key);
        let shared = Arc::clone(self);
        let reclaimed = tokio::task::spawn_blocking(move || {
            let freed = shared.evict_to(target);
            drop(pin);
            freed
        })
        .await;
        if let Err(err) = reclaimed {
            tracing::error!("Eviction after loading {key} panicked: {err}");
        }
    }

    fn fail(&self, key: CacheKey, err: LoadError) -> LoadingState {
        let asset = key.asset;
        self.cache.mark_failed(&key);
        if !key.is_original() && matches!(err, LoadError::FileNotFound(_)) {
            // A missing variant is not a failure of the asset.
            self.states
                .transition_if(asset, LoadingState::is_loading, LoadingState::NotLoaded);
            return LoadingState::Failed(err);
        }
        tracing::warn!("Failed to load {key}: {err}");
        self.states.transition_if(
            asset,
            LoadingState::is_loading,
            LoadingState::Failed(err.clone()),
        );
        LoadingState::Failed(err)
    }

    /// Clean up after a cancelled operation. `cancel` already moved the
    /// state to NotLoaded; the reservation is dropped only if no newer
    /// operation has claimed the key since.
    fn abandon(&self, key: CacheKey) -> LoadingState {
        tracing::debug!("Cancelled load of {key}");
        if let Entry::Vacant(_vacant) = self.pending.entry(key) {
            self.cache.release(&key);
        }
        LoadingState::NotLoaded
    }

    /// Evict least recently used entries until usage is at or below
    /// `target`. Returns the bytes freed.
    pub(crate) fn evict_to(&self, target: u64) -> u64 {
        let _exclusive = self.eviction.lock();
        let budget = self.cache.budget();
        let keys = budget.select_eviction_set(self.cache.eviction_candidates(), target);
        if keys.is_empty() {
            return 0;
        }

        let evicted = self.cache.evict(&keys);
        let mut freed = 0;
        let mut touched: Vec<AssetId> = Vec::new();
        for &(key, cost) in &evicted {
            freed += cost;
            self.events.emit(ResourceEvent::EntryEvicted { key, cost });
            if !touched.contains(&key.asset) {
                touched.push(key.asset);
            }
        }
        for asset in touched {
            self.settle(asset);
        }
        tracing::debug!(
            "Evicted {} entries, freed {freed} bytes, usage now {}",
            evicted.len(),
            budget.current_usage()
        );
        freed
    }

    /// Bring the state of `asset` in line with what is still resident.
    fn settle(&self, asset: AssetId) {
        let LoadingState::Loaded(handle) = self.states.get(asset) else {
            return;
        };
        let resident = self.cache.resident_keys(asset);
        if resident.contains(&handle.key) {
            return;
        }
        let next = resident
            .iter()
            .find_map(|&key| {
                self.cache
                    .entry_cost(&key)
                    .map(|cost| LoadingState::Loaded(ModelHandle { key, cost }))
            })
            .unwrap_or(LoadingState::NotLoaded);
        let expected = LoadingState::Loaded(handle);
        self.states
            .transition_if(asset, |state| *state == expected, next);
    }

    /// Load and pin: the returned lease keeps the entry resident.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        asset: AssetId,
        level: Option<u8>,
    ) -> Result<ModelLease, LoadError> {
        let mut held: Option<PinGuard> = None;
        for _ in 0..ACQUIRE_ATTEMPTS {
            let handle = match self.load(asset, level).await {
                LoadingState::Loaded(handle) => handle,
                LoadingState::Failed(err) => return Err(err),
                LoadingState::NotLoaded | LoadingState::Loading { .. } => {
                    return Err(LoadError::Cancelled(asset));
                }
            };
            let pin = match held.take() {
                Some(pin) if pin.key() == handle.key => pin,
                _ => self.cache.pin(handle.key),
            };
            if let Some(model) = self.cache.lookup(&handle.key) {
                return Ok(ModelLease { model, pin });
            }
            tracing::debug!("{} was evicted before it could be pinned", handle.key);
            held = Some(pin);
        }
        Err(LoadError::DecodeFailed(format!(
            "asset {asset} kept being evicted; memory ceiling too small"
        )))
    }

    /// Load a failed asset again. The request is validated before the
    /// asset leaves Failed, so an invalid retry leaves the state untouched.
    pub(crate) async fn retry(
        self: &Arc<Self>,
        asset: AssetId,
        level: Option<u8>,
    ) -> Result<LoadingState, LoadError> {
        if !self.states.get(asset).is_failed() {
            return Err(LoadError::NoOperationToRetry(asset));
        }
        let Some(descriptor) = self.catalog.descriptor(asset) else {
            return Ok(LoadingState::Failed(LoadError::FileNotFound(
                asset.to_string(),
            )));
        };
        if let Err(err) = self.resolve(&descriptor, level) {
            return Ok(LoadingState::Failed(err));
        }

        let restarted = self.states.transition_if(
            asset,
            LoadingState::is_failed,
            LoadingState::Loading { progress: 0.0 },
        );
        if !restarted {
            return Err(LoadError::NoOperationToRetry(asset));
        }
        tracing::info!("Retrying load of {asset}");
        self.cache.release_asset(asset);
        Ok(self.load(asset, level).await)
    }

    /// Signal every in-flight operation of `asset` to stop. Returns how many
    /// were signalled.
    pub(crate) fn cancel(&self, asset: AssetId) -> usize {
        let mut cancelled = 0;
        self.pending.retain(|key, pending| {
            if key.asset != asset {
                return true;
            }
            pending.cancel.send_replace(true);
            cancelled += 1;
            false
        });
        if cancelled > 0 {
            self.states
                .transition_if(asset, LoadingState::is_loading, LoadingState::NotLoaded);
            tracing::debug!("Cancelled {cancelled} in-flight loads of {asset}");
        }
        cancelled
    }

    /// Signal every in-flight operation to stop.
    pub(crate) fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        self.pending.retain(|_, pending| {
            pending.cancel.send_replace(true);
            cancelled += 1;
            false
        });
        cancelled
    }
}

async fn wait_for_outcome(mut result: watch::Receiver<Option<LoadingState>>) -> LoadingState {
    match result.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).clone().unwrap_or(LoadingState::NotLoaded),
        Err(_) => LoadingState::NotLoaded,
    }
}

/// Resolves once `signal` turns true. A dropped sender never resolves.
async fn cancelled(signal: &mut watch::Receiver<bool>) {
    if signal.wait_for(|&cancel| cancel).await.is_err() {
        std::future::pending::<()>().await;
    }
}
