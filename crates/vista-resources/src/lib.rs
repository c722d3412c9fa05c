//! Model resource management: a budgeted two-tier cache of decoded models,
//! deduplicated admission-controlled loading, per-asset loading state, and
//! distance-driven detail level switching.

mod budget;
mod cache;
mod config;
mod error;
mod events;
mod gate;
mod key;
mod loader;
mod manager;
mod progressive;
mod state;

#[cfg(test)]
mod testing;

pub use budget::{
    CostModel, DEFAULT_CEILING, DEFAULT_ENTRY_COST, DEFAULT_TARGET_RATIO, EvictionCandidate,
    MemoryBudget, select_evictions,
};
pub use cache::{CacheEntry, CacheStats, DiskTier, DiskTierError, EntryState, PinGuard, ResourceCache};
pub use config::ResourceConfig;
pub use error::{LoadError, ResourceError};
pub use events::{EventBus, ResourceEvent};
pub use gate::{Admission, AdmissionGate, DEFAULT_MAX_CONCURRENT};
pub use key::CacheKey;
pub use loader::ModelLease;
pub use manager::{ModelResourceManager, ResourceStats};
pub use progressive::LevelUpdate;
pub use state::{LoadingState, ModelHandle, StateTable};
