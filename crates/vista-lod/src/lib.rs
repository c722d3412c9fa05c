//! Level-of-detail policy for models: quality tiers, size/triangle estimates, and distance-based selection.

mod policy;
mod selector;

pub use policy::{
    DetailLevel, LevelBacking, LodCapability, LodPolicy, LodThresholds, LodTableError, QualityTier,
    TIER_TABLE,
};
pub use selector::{LodSelector, camera_distance};
