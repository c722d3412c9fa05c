//! Two-tier resource cache keyed by model and detail level.
//!
//! The memory tier owns every decoded model and hands out clones. The
//! optional [`DiskTier`] receives entries evicted from memory and feeds them
//! back on a memory miss. Every cost change is reported to the shared
//! [`MemoryBudget`].

mod disk;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use vista_assets::{AssetId, DecodedModel};

use crate::budget::{EvictionCandidate, MemoryBudget};
use crate::key::CacheKey;

pub use disk::{DiskTier, DiskTierError};

/// Lifecycle of a cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// A load for the key is in flight; no representation yet.
    Reserved,
    /// The decoded model is available.
    Ready,
    /// The last load for the key failed; holds no representation and costs nothing.
    Failed,
}

/// One slot of the memory tier.
#[derive(Debug)]
pub struct CacheEntry {
    pub key: CacheKey,
    model: Option<DecodedModel>,
    pub cost: u64,
    /// Logical access stamp; higher is more recent.
    pub last_access: u64,
    pub state: EntryState,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub disk_hits: u64,
    pub evictions: u64,
    /// Ready entries in the memory tier.
    pub entries: usize,
}

#[derive(Default)]
struct MemoryTier {
    entries: HashMap<CacheKey, CacheEntry>,
    pins: HashMap<CacheKey, u32>,
    clock: u64,
}

impl MemoryTier {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn is_pinned(&self, key: &CacheKey) -> bool {
        self.pins.get(key).is_some_and(|&count| count > 0)
    }
}

/// The resource cache: sole owner of decoded models.
pub struct ResourceCache {
    memory: Mutex<MemoryTier>,
    disk: Option<DiskTier>,
    budget: Arc<MemoryBudget>,
    hits: AtomicU64,
    misses: AtomicU64,
    disk_hits: AtomicU64,
    evictions: AtomicU64,
}

impl ResourceCache {
    /// Create a cache reporting to `budget`, with an optional disk tier.
    pub fn new(budget: Arc<MemoryBudget>, disk: Option<DiskTier>) -> Self {
        Self {
            memory: Mutex::new(MemoryTier::default()),
            disk,
            budget,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn budget(&self) -> &Arc<MemoryBudget> {
        &self.budget
    }

    pub fn disk(&self) -> Option<&DiskTier> {
        self.disk.as_ref()
    }

    /// A copy of the model under `key`, refreshing its access stamp.
    pub fn lookup(&self, key: &CacheKey) -> Option<DecodedModel> {
        let model = {
            let mut memory = self.memory.lock();
            let stamp = memory.tick();
            memory
                .entries
                .get_mut(key)
                .filter(|entry| entry.state == EntryState::Ready)
                .and_then(|entry| {
                    entry.last_access = stamp;
                    entry.model.clone()
                })
        };
        let counter = if model.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        model
    }

    /// Refresh the access stamp of a ready entry without copying it.
    /// Returns the entry's cost on a hit.
    pub fn touch(&self, key: &CacheKey) -> Option<u64> {
        let mut memory = self.memory.lock();
        let stamp = memory.tick();
        let entry = memory
            .entries
            .get_mut(key)
            .filter(|entry| entry.state == EntryState::Ready)?;
        entry.last_access = stamp;
        let cost = entry.cost;
        drop(memory);
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(cost)
    }

    /// State of the slot for `key`, if any.
    pub fn entry_state(&self, key: &CacheKey) -> Option<EntryState> {
        self.memory.lock().entries.get(key).map(|entry| entry.state)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entry_state(key) == Some(EntryState::Ready)
    }

    /// Cost of a ready entry without refreshing its access stamp.
    pub fn entry_cost(&self, key: &CacheKey) -> Option<u64> {
        self.memory
            .lock()
            .entries
            .get(key)
            .filter(|entry| entry.state == EntryState::Ready)
            .map(|entry| entry.cost)
    }

    /// Mark `key` as being loaded. Existing ready entries are left alone.
    pub fn reserve(&self, key: CacheKey) {
        let mut memory = self.memory.lock();
        let stamp = memory.tick();
        let entry = memory.entries.entry(key).or_insert_with(|| CacheEntry {
            key,
            model: None,
            cost: 0,
            last_access: stamp,
            state: EntryState::Reserved,
        });
        if entry.state == EntryState::Failed {
            entry.state = EntryState::Reserved;
        }
    }

    /// Turn a reservation into a failure marker.
    pub fn mark_failed(&self, key: &CacheKey) {
        if let Some(entry) = self.memory.lock().entries.get_mut(key)
            && entry.state == EntryState::Reserved
        {
            entry.state = EntryState::Failed;
        }
    }

    /// Drop a reservation or failure marker. Ready entries are kept.
    pub fn release(&self, key: &CacheKey) {
        let mut memory = self.memory.lock();
        if memory
            .entries
            .get(key)
            .is_some_and(|entry| entry.state != EntryState::Ready)
        {
            memory.entries.remove(key);
        }
    }

    /// Drop every reservation and failure marker of `asset`.
    pub fn release_asset(&self, asset: AssetId) {
        self.memory
            .lock()
            .entries
            .retain(|key, entry| key.asset != asset || entry.state == EntryState::Ready);
    }

    /// Store `model` under `key`, replacing any previous entry.
    ///
    /// Returns the cost delta, which has already been reported to the budget.
    pub fn insert(&self, key: CacheKey, model: DecodedModel, cost: u64) -> i64 {
        let previous_cost = {
            let mut memory = self.memory.lock();
            let stamp = memory.tick();
            let previous = memory.entries.insert(
                key,
                CacheEntry {
                    key,
                    model: Some(model),
                    cost,
                    last_access: stamp,
                    state: EntryState::Ready,
                },
            );
            previous.map_or(0, |entry| entry.cost)
        };
        let delta = cost as i64 - previous_cost as i64;
        self.budget.report_delta(delta);
        delta
    }

    /// Read `key` from the disk tier. The caller re-inserts the model.
    /// Blocking I/O.
    pub fn restore_from_disk(&self, key: &CacheKey) -> Option<DecodedModel> {
        let model = self.disk.as_ref()?.read(key)?;
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Restored {key} from disk cache");
        Some(model)
    }

    /// Remove one entry from memory. Returns the (non-positive) cost delta.
    pub fn remove(&self, key: &CacheKey) -> i64 {
        let removed = self.memory.lock().entries.remove(key);
        let cost = removed.map_or(0, |entry| entry.cost);
        let delta = -(cost as i64);
        self.budget.report_delta(delta);
        delta
    }

    /// Remove every memory entry of `asset`. Returns the removed keys of
    /// ready entries.
    pub fn remove_asset(&self, asset: AssetId) -> Vec<CacheKey> {
        let (removed, freed) = {
            let mut memory = self.memory.lock();
            let keys: Vec<_> = memory
                .entries
                .keys()
                .filter(|key| key.asset == asset)
                .copied()
                .collect();
            let mut removed = Vec::new();
            let mut freed = 0u64;
            for key in keys {
                if let Some(entry) = memory.entries.remove(&key) {
                    freed += entry.cost;
                    if entry.state == EntryState::Ready {
                        removed.push(key);
                    }
                }
            }
            (removed, freed)
        };
        self.budget.report_delta(-(freed as i64));
        removed
    }

    /// Delete every disk file of `asset`.
    pub fn purge_disk_asset(&self, asset: AssetId) -> usize {
        self.disk.as_ref().map_or(0, |disk| disk.remove_asset(asset))
    }

    /// Ready keys of `asset`, lowest level index first.
    pub fn resident_keys(&self, asset: AssetId) -> Vec<CacheKey> {
        let mut keys: Vec<_> = self
            .memory
            .lock()
            .entries
            .values()
            .filter(|entry| entry.key.asset == asset && entry.state == EntryState::Ready)
            .map(|entry| entry.key)
            .collect();
        keys.sort_by_key(|key| key.level_index());
        keys
    }

    /// Snapshot of all ready entries for the eviction policy.
    pub fn eviction_candidates(&self) -> Vec<EvictionCandidate> {
        let memory = self.memory.lock();
        memory
            .entries
            .values()
            .filter(|entry| entry.state == EntryState::Ready)
            .map(|entry| EvictionCandidate {
                key: entry.key,
                cost: entry.cost,
                last_access: entry.last_access,
                pinned: memory.is_pinned(&entry.key),
            })
            .collect()
    }

    /// Evict `keys` from memory, skipping any that were pinned or removed
    /// since selection. Evicted models are mirrored to the disk tier.
    /// Returns `(key, cost)` of each evicted entry.
    pub fn evict(&self, keys: &[CacheKey]) -> Vec<(CacheKey, u64)> {
        let evicted: Vec<(CacheKey, u64, Option<DecodedModel>)> = {
            let mut memory = self.memory.lock();
            let mut evicted = Vec::with_capacity(keys.len());
            for key in keys {
                let evictable = !memory.is_pinned(key)
                    && memory
                        .entries
                        .get(key)
                        .is_some_and(|entry| entry.state == EntryState::Ready);
                if !evictable {
                    continue;
                }
                if let Some(entry) = memory.entries.remove(key) {
                    evicted.push((*key, entry.cost, entry.model));
                }
            }
            evicted
        };

        let mut result = Vec::with_capacity(evicted.len());
        for (key, cost, model) in evicted {
            self.budget.report_delta(-(cost as i64));
            self.evictions.fetch_add(1, Ordering::Relaxed);
            if let (Some(disk), Some(model)) = (&self.disk, model)
                && let Err(err) = disk.write(&key, &model)
            {
                tracing::warn!("Failed to mirror {key} to disk: {err}");
            }
            result.push((key, cost));
        }
        result
    }

    /// Empty both tiers. Returns the (non-positive) cost delta.
    pub fn clear(&self) -> i64 {
        let freed: u64 = {
            let mut memory = self.memory.lock();
            memory.entries.drain().map(|(_, entry)| entry.cost).sum()
        };
        if let Some(disk) = &self.disk {
            let removed = disk.clear();
            tracing::debug!("Cleared {removed} disk cache files");
        }
        let delta = -(freed as i64);
        self.budget.report_delta(delta);
        delta
    }

    /// Pin `key` so eviction skips it until the guard drops.
    pub fn pin(self: &Arc<Self>, key: CacheKey) -> PinGuard {
        *self.memory.lock().pins.entry(key).or_insert(0) += 1;
        PinGuard {
            cache: Arc::clone(self),
            key,
        }
    }

    pub fn is_pinned(&self, key: &CacheKey) -> bool {
        self.memory.lock().is_pinned(key)
    }

    fn unpin(&self, key: &CacheKey) {
        let mut memory = self.memory.lock();
        if let Some(count) = memory.pins.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                memory.pins.remove(key);
            }
        }
    }

    /// Aggregate cost of memory entries, summed from the table.
    pub fn total_cost(&self) -> u64 {
        self.memory.lock().entries.values().map(|e| e.cost).sum()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .memory
            .lock()
            .entries
            .values()
            .filter(|entry| entry.state == EntryState::Ready)
            .count();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
        }
    }
}

/// Keeps a cache key out of eviction while alive.
pub struct PinGuard {
    cache: Arc<ResourceCache>,
    key: CacheKey,
}

impl PinGuard {
    pub fn key(&self) -> CacheKey {
        self.key
    }
}

impl std::fmt::Debug for PinGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinGuard").field("key", &self.key).finish()
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.cache.unpin(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ceiling: u64) -> Arc<ResourceCache> {
        Arc::new(ResourceCache::new(
            Arc::new(MemoryBudget::new(ceiling, 0.8)),
            None,
        ))
    }

    fn key(asset: u64) -> CacheKey {
        CacheKey::original(AssetId(asset))
    }

    fn model(asset: u64) -> DecodedModel {
        let mut model = DecodedModel::new(AssetId(asset), None);
        model.positions = vec![[asset as f32; 3]];
        model
    }

    #[test]
    fn test_lookup_returns_copy_and_counts_hits() {
        let cache = cache(1000);
        cache.insert(key(1), model(1), 10);
        let mut copy = cache.lookup(&key(1)).unwrap();
        copy.positions.clear();
        // Mutating the copy does not touch the cached instance.
        assert_eq!(cache.lookup(&key(1)).unwrap(), model(1));
        assert!(cache.lookup(&key(2)).is_none());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (2, 1, 1));
    }

    /// Re-inserting a key replaces the entry and reports only the difference.
    #[test]
    fn test_insert_is_idempotent_per_key() {
        let cache = cache(1000);
        assert_eq!(cache.insert(key(1), model(1), 10), 10);
        assert_eq!(cache.insert(key(1), model(1), 25), 15);
        assert_eq!(cache.budget().current_usage(), 25);
        assert_eq!(cache.stats().entries, 1);
    }

    /// Lookups refresh recency, which changes eviction order.
    #[test]
    fn test_lookup_updates_last_access() {
        let cache = cache(1000);
        for id in 1..=3 {
            cache.insert(key(id), model(id), 10);
        }
        cache.lookup(&key(1));
        let mut candidates = cache.eviction_candidates();
        candidates.sort_by_key(|c| c.last_access);
        let order: Vec<_> = candidates.iter().map(|c| c.key).collect();
        assert_eq!(order, vec![key(2), key(3), key(1)]);
    }

    #[test]
    fn test_reservations_are_invisible_and_free() {
        let cache = cache(1000);
        cache.reserve(key(1));
        assert_eq!(cache.entry_state(&key(1)), Some(EntryState::Reserved));
        assert!(cache.lookup(&key(1)).is_none());
        assert!(cache.eviction_candidates().is_empty());
        cache.mark_failed(&key(1));
        assert_eq!(cache.entry_state(&key(1)), Some(EntryState::Failed));
        cache.release(&key(1));
        assert_eq!(cache.entry_state(&key(1)), None);
        assert_eq!(cache.budget().current_usage(), 0);
    }

    #[test]
    fn test_pinned_entries_survive_evict() {
        let cache = cache(1000);
        cache.insert(key(1), model(1), 10);
        cache.insert(key(2), model(2), 10);
        let guard = cache.pin(key(1));
        let evicted = cache.evict(&[key(1), key(2)]);
        assert_eq!(evicted, vec![(key(2), 10)]);
        assert!(cache.contains(&key(1)));
        drop(guard);
        assert!(!cache.is_pinned(&key(1)));
        assert_eq!(cache.evict(&[key(1)]), vec![(key(1), 10)]);
        assert_eq!(cache.budget().current_usage(), 0);
        assert_eq!(cache.stats().evictions, 2);
    }

    /// Evicted entries land on disk and can be restored after a memory miss.
    #[test]
    fn test_evicted_entries_are_mirrored_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskTier::open(dir.path()).unwrap();
        let cache = Arc::new(ResourceCache::new(
            Arc::new(MemoryBudget::new(1000, 0.8)),
            Some(disk),
        ));
        cache.insert(key(1), model(1), 10);
        cache.evict(&[key(1)]);
        assert!(cache.lookup(&key(1)).is_none());
        assert_eq!(cache.restore_from_disk(&key(1)), Some(model(1)));
        assert_eq!(cache.stats().disk_hits, 1);
    }

    #[test]
    fn test_clear_reports_negative_total() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskTier::open(dir.path()).unwrap();
        disk.write(&key(9), &model(9)).unwrap();
        let cache = Arc::new(ResourceCache::new(
            Arc::new(MemoryBudget::new(1000, 0.8)),
            Some(disk),
        ));
        cache.insert(key(1), model(1), 10);
        cache.insert(key(2), model(2), 15);
        assert_eq!(cache.clear(), -25);
        assert_eq!(cache.budget().current_usage(), 0);
        assert!(cache.restore_from_disk(&key(9)).is_none());
    }

    #[test]
    fn test_remove_asset_drops_all_levels() {
        let cache = cache(1000);
        cache.insert(CacheKey::new(AssetId(1), None), model(1), 10);
        cache.insert(CacheKey::new(AssetId(1), Some(3)), model(1), 10);
        cache.insert(key(2), model(2), 10);
        cache.reserve(CacheKey::new(AssetId(1), Some(4)));
        let mut removed = cache.remove_asset(AssetId(1));
        removed.sort();
        assert_eq!(
            removed,
            vec![CacheKey::new(AssetId(1), None), CacheKey::new(AssetId(1), Some(3))]
        );
        assert_eq!(cache.budget().current_usage(), 10);
        assert!(cache.resident_keys(AssetId(1)).is_empty());
        assert_eq!(cache.resident_keys(AssetId(2)), vec![key(2)]);
    }
}
