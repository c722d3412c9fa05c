//! Memory budget tracking and LRU eviction selection.
//!
//! Provides [`MemoryBudget`] to track the approximate memory cost of all
//! cached models, and [`select_evictions`] to pick which entries to drop when
//! the budget is exceeded. Costs are estimates from a [`CostModel`], not exact
//! accounting.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use vista_assets::DecodedModel;

use crate::key::CacheKey;

/// Default flat cost charged per cached model: 32 MB.
pub const DEFAULT_ENTRY_COST: u64 = 32 * 1024 * 1024;

/// Default memory ceiling: 512 MB.
pub const DEFAULT_CEILING: u64 = 512 * 1024 * 1024;

/// Fraction of the ceiling eviction aims for, leaving headroom against
/// immediate re-eviction.
pub const DEFAULT_TARGET_RATIO: f64 = 0.8;

/// How the memory cost of a decoded model is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostModel {
    /// Every model costs the same number of bytes.
    Flat { bytes: u64 },
    /// Cost is the measured size of the geometry buffers.
    Measured,
}

impl Default for CostModel {
    fn default() -> Self {
        CostModel::Flat {
            bytes: DEFAULT_ENTRY_COST,
        }
    }
}

impl CostModel {
    /// Estimated cost of keeping `model` in memory.
    pub fn cost_of(&self, model: &DecodedModel) -> u64 {
        match self {
            CostModel::Flat { bytes } => *bytes,
            CostModel::Measured => model.footprint_bytes(),
        }
    }
}

/// Snapshot of one cache entry as seen by the eviction policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub key: CacheKey,
    pub cost: u64,
    /// Logical access stamp; lower is older.
    pub last_access: u64,
    /// Pinned entries are never selected.
    pub pinned: bool,
}

/// Tracks the aggregate estimated cost of cached entries against a ceiling.
pub struct MemoryBudget {
    ceiling: u64,
    target_ratio: f64,
    usage: AtomicU64,
}

impl MemoryBudget {
    /// Create a budget with a hard `ceiling` and an eviction target of
    /// `ceiling * target_ratio`.
    pub fn new(ceiling: u64, target_ratio: f64) -> Self {
        Self {
            ceiling,
            target_ratio: target_ratio.clamp(0.0, 1.0),
            usage: AtomicU64::new(0),
        }
    }

    /// Apply a signed cost change. Returns `true` when usage now exceeds
    /// the ceiling. Usage saturates at zero.
    pub fn report_delta(&self, delta: i64) -> bool {
        let magnitude = delta.unsigned_abs();
        let previous = self
            .usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |usage| {
                Some(if delta >= 0 {
                    usage.saturating_add(magnitude)
                } else {
                    usage.saturating_sub(magnitude)
                })
            })
            .unwrap_or_else(|usage| usage);
        let now = if delta >= 0 {
            previous.saturating_add(magnitude)
        } else {
            previous.saturating_sub(magnitude)
        };
        if delta != 0 {
            tracing::trace!("Memory usage {previous} -> {now} bytes");
        }
        now > self.ceiling
    }

    /// Current aggregate estimated cost.
    pub fn current_usage(&self) -> u64 {
        self.usage.load(Ordering::Acquire)
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Usage eviction aims for: `ceiling * target_ratio`.
    pub fn target(&self) -> u64 {
        self.target_for(self.target_ratio)
    }

    /// `ceiling * ratio`, for callers that need a lower target.
    pub fn target_for(&self, ratio: f64) -> u64 {
        (self.ceiling as f64 * ratio.clamp(0.0, 1.0)) as u64
    }

    pub fn is_over_budget(&self) -> bool {
        self.current_usage() > self.ceiling
    }

    /// Bytes above the ceiling (0 when within budget).
    pub fn overage(&self) -> u64 {
        self.current_usage().saturating_sub(self.ceiling)
    }

    /// Entries to evict to bring current usage down to `target`.
    pub fn select_eviction_set(
        &self,
        candidates: Vec<EvictionCandidate>,
        target: u64,
    ) -> Vec<CacheKey> {
        select_evictions(self.current_usage(), target, candidates)
    }
}

/// Choose entries to evict so that `usage` drops to `target` or below.
///
/// Unpinned candidates are taken oldest access first until the projected
/// usage reaches the target. When unpinned entries are not enough, every
/// unpinned entry is returned. Returned keys are in eviction order.
pub fn select_evictions(
    usage: u64,
    target: u64,
    mut candidates: Vec<EvictionCandidate>,
) -> Vec<CacheKey> {
    if usage <= target {
        return Vec::new();
    }

    candidates.retain(|c| !c.pinned);
    candidates.sort_by_key(|c| (c.last_access, c.key));

    let mut projected = usage;
    let mut evictions = Vec::new();
    for candidate in candidates {
        if projected <= target {
            break;
        }
        projected = projected.saturating_sub(candidate.cost);
        evictions.push(candidate.key);
    }

    evictions
}
