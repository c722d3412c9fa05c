//! Distance-based detail-level selection.

use glam::Vec3;

use crate::policy::DetailLevel;

/// Picks the detail level that serves a given viewing distance.
///
/// Stateless: hysteresis, if wanted, belongs to the caller.
pub struct LodSelector;

impl LodSelector {
    /// Position of the first level whose `max_distance >= distance`.
    ///
    /// Levels must be ordered by non-decreasing distance. Distances beyond
    /// every bound (or NaN) select the last level.
    pub fn select_index(levels: &[DetailLevel], distance: f32) -> usize {
        debug_assert!(!levels.is_empty(), "level table must not be empty");
        levels
            .iter()
            .position(|level| level.max_distance >= distance)
            .unwrap_or(levels.len().saturating_sub(1))
    }

    /// The level serving `distance`, or `None` for an empty table.
    pub fn select(levels: &[DetailLevel], distance: f32) -> Option<&DetailLevel> {
        if levels.is_empty() {
            return None;
        }
        levels.get(Self::select_index(levels, distance))
    }
}

/// Euclidean distance from a model's position to the camera.
pub fn camera_distance(model_position: Vec3, camera_position: Vec3) -> f32 {
    model_position.distance(camera_position)
}
