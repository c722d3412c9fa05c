//! Runtime settings of a [`ModelResourceManager`](crate::ModelResourceManager).

use std::path::PathBuf;
use std::time::Duration;

use vista_lod::LodThresholds;

use crate::budget::{CostModel, DEFAULT_CEILING, DEFAULT_TARGET_RATIO};
use crate::gate::DEFAULT_MAX_CONCURRENT;

#[derive(Debug, Clone)]
pub struct ResourceConfig {
    /// Aggregate estimated cost allowed in memory, in bytes.
    pub memory_ceiling: u64,
    /// Fraction of the ceiling reactive eviction brings usage down to.
    pub eviction_target_ratio: f64,
    pub cost_model: CostModel,
    /// Decodes allowed to run at once.
    pub max_concurrent_loads: usize,
    /// Mirror evicted entries to disk and read them back on a miss.
    pub disk_cache: bool,
    /// Disk tier location. `None` asks the storage for its cache directory.
    pub disk_cache_dir: Option<PathBuf>,
    /// Fraction of the ceiling the first low-memory signal evicts down to.
    pub low_memory_target_ratio: f64,
    /// A second low-memory signal within this window clears every unpinned entry.
    pub low_memory_repeat_window: Duration,
    /// Events buffered per subscriber before it lags.
    pub event_capacity: usize,
    pub lod: LodThresholds,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory_ceiling: DEFAULT_CEILING,
            eviction_target_ratio: DEFAULT_TARGET_RATIO,
            cost_model: CostModel::default(),
            max_concurrent_loads: DEFAULT_MAX_CONCURRENT,
            disk_cache: true,
            disk_cache_dir: None,
            low_memory_target_ratio: 0.1,
            low_memory_repeat_window: Duration::from_secs(10),
            event_capacity: 256,
            lod: LodThresholds::default(),
        }
    }
}
