//! Detail-level tier table and the estimates derived from it.
//!
//! The policy never touches geometry: it only decides which reduced variants
//! a model should have and predicts their triangle counts and file sizes.
//! Whether a variant has a real file behind it depends on the source format
//! (see [`LodCapability`]).

use vista_assets::{AssetDescriptor, SourceFormat};

/// Quality tier of a detail level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QualityTier {
    Original,
    High,
    Medium,
    Low,
    Minimal,
}

/// Fixed tier table: `(tier, triangle reduction, max viewing distance)`.
///
/// Distances strictly increase; the last one is unbounded.
pub const TIER_TABLE: [(QualityTier, f32, f32); 5] = [
    (QualityTier::Original, 0.0, 2.0),
    (QualityTier::High, 0.25, 5.0),
    (QualityTier::Medium, 0.5, 10.0),
    (QualityTier::Low, 0.75, 20.0),
    (QualityTier::Minimal, 0.9, f32::INFINITY),
];

/// Share of the reduction that carries over to file size. Textures and
/// materials do not shrink with geometry.
const SIZE_REDUCTION_FACTOR: f64 = 0.8;

/// What a source format allows for reduced variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LodCapability {
    /// Reduced files can be regenerated from the source.
    FullRegeneration,
    /// Only metadata estimates exist; no reduced file is produced.
    EstimateOnly,
}

impl LodCapability {
    pub fn for_format(format: SourceFormat) -> Self {
        match format {
            SourceFormat::Usdz | SourceFormat::Scn | SourceFormat::Gltf | SourceFormat::Glb => {
                LodCapability::FullRegeneration
            }
            SourceFormat::Obj | SourceFormat::Dae | SourceFormat::Stl => {
                LodCapability::EstimateOnly
            }
        }
    }
}

/// What backs a detail level on storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelBacking {
    /// The original source file (level 0).
    Source,
    /// A generated reduced file.
    Generated,
    /// Estimate only; loading this level falls back to the original.
    EstimateOnly,
}

impl LevelBacking {
    /// Whether a real file exists for the level.
    pub fn has_artifact(self) -> bool {
        !matches!(self, LevelBacking::EstimateOnly)
    }
}

/// One reduced-fidelity variant of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailLevel {
    /// 0 = original, ascending = more reduced.
    pub index: u8,
    pub tier: QualityTier,
    /// Fraction of triangles removed, in `[0, 1)`.
    pub reduction: f32,
    /// Largest viewing distance this level serves.
    pub max_distance: f32,
    pub file_name: String,
    pub estimated_bytes: u64,
    pub estimated_triangles: u64,
    pub backing: LevelBacking,
}

impl DetailLevel {
    pub fn is_original(&self) -> bool {
        self.index == 0
    }

    /// Whether this level is the unbounded fallback.
    pub fn is_fallback(&self) -> bool {
        self.max_distance.is_infinite()
    }
}

/// Size limits above which a model gets reduced variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodThresholds {
    /// Triangle count that must be exceeded. Default: 50,000.
    pub triangle_count: u64,
    /// Source size in bytes that must be exceeded. Default: 5 MB.
    pub byte_size: u64,
}

impl Default for LodThresholds {
    fn default() -> Self {
        Self {
            triangle_count: 50_000,
            byte_size: 5 * 1024 * 1024,
        }
    }
}

/// A level sequence that breaks the ordering invariants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LodTableError {
    #[error("level table is empty")]
    Empty,
    #[error("level at position {position} has index {index}")]
    IndexOutOfOrder { position: usize, index: u8 },
    #[error("distance of level {index} does not increase")]
    DistanceNotIncreasing { index: u8 },
    #[error("expected exactly one unbounded level, found {0}")]
    UnboundedCount(usize),
    #[error("unbounded level {index} is not last")]
    UnboundedNotLast { index: u8 },
    #[error("expected exactly one original level, found {0}")]
    OriginalCount(usize),
}

/// Pure mapping from a descriptor to its detail levels.
#[derive(Debug, Clone, Default)]
pub struct LodPolicy {
    thresholds: LodThresholds,
}

impl LodPolicy {
    pub fn new(thresholds: LodThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &LodThresholds {
        &self.thresholds
    }

    /// Whether `descriptor` warrants reduced variants.
    pub fn should_generate(&self, descriptor: &AssetDescriptor) -> bool {
        descriptor.metadata.complexity.recommends_lod()
            || descriptor.metadata.triangle_count > self.thresholds.triangle_count
            || descriptor.byte_size > self.thresholds.byte_size
    }

    /// The full tier table applied to `descriptor`, ordered by level index.
    pub fn levels_for(&self, descriptor: &AssetDescriptor) -> Vec<DetailLevel> {
        let capability = LodCapability::for_format(descriptor.format);
        TIER_TABLE
            .iter()
            .enumerate()
            .map(|(i, &(tier, reduction, max_distance))| {
                let index = i as u8;
                let backing = match (index, capability) {
                    (0, _) => LevelBacking::Source,
                    (_, LodCapability::FullRegeneration) => LevelBacking::Generated,
                    (_, LodCapability::EstimateOnly) => LevelBacking::EstimateOnly,
                };
                DetailLevel {
                    index,
                    tier,
                    reduction,
                    max_distance,
                    file_name: level_file_name(descriptor, index),
                    estimated_bytes: estimate_bytes(descriptor.byte_size, reduction),
                    estimated_triangles: estimate_triangles(
                        descriptor.metadata.triangle_count,
                        reduction,
                    ),
                    backing,
                }
            })
            .collect()
    }

    /// Levels the selector should use: the full table when the model
    /// warrants reduction, otherwise the original alone serving every distance.
    pub fn effective_levels(&self, descriptor: &AssetDescriptor) -> Vec<DetailLevel> {
        let mut levels = self.levels_for(descriptor);
        if !self.should_generate(descriptor) {
            levels.truncate(1);
            levels[0].max_distance = f32::INFINITY;
        }
        levels
    }

    /// Check the ordering invariants the selector relies on.
    pub fn validate(levels: &[DetailLevel]) -> Result<(), LodTableError> {
        if levels.is_empty() {
            return Err(LodTableError::Empty);
        }
        for (position, level) in levels.iter().enumerate() {
            if level.index as usize != position {
                return Err(LodTableError::IndexOutOfOrder {
                    position,
                    index: level.index,
                });
            }
        }
        let unbounded = levels.iter().filter(|l| l.is_fallback()).count();
        if unbounded != 1 {
            return Err(LodTableError::UnboundedCount(unbounded));
        }
        if let Some(level) = levels[..levels.len() - 1].iter().find(|l| l.is_fallback()) {
            return Err(LodTableError::UnboundedNotLast { index: level.index });
        }
        for pair in levels.windows(2) {
            if pair[1].max_distance <= pair[0].max_distance {
                return Err(LodTableError::DistanceNotIncreasing {
                    index: pair[1].index,
                });
            }
        }
        let originals = levels.iter().filter(|l| l.reduction == 0.0).count();
        if originals != 1 {
            return Err(LodTableError::OriginalCount(originals));
        }
        Ok(())
    }
}

/// File name of a level: the source name for level 0, `{stem}_lod{n}.{ext}` otherwise.
fn level_file_name(descriptor: &AssetDescriptor, index: u8) -> String {
    if index == 0 {
        return descriptor.file_name.clone();
    }
    format!(
        "{}_lod{index}.{}",
        descriptor.file_stem(),
        descriptor.file_extension()
    )
}

fn estimate_triangles(original: u64, reduction: f32) -> u64 {
    (original as f64 * (1.0 - reduction as f64)).round() as u64
}

fn estimate_bytes(original: u64, reduction: f32) -> u64 {
    (original as f64 * (1.0 - reduction as f64 * SIZE_REDUCTION_FACTOR)).round() as u64
}
