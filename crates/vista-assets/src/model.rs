//! In-memory renderable representation produced by a format decoder.

use serde::{Deserialize, Serialize};

use crate::descriptor::AssetId;

/// A decoded, renderable model.
///
/// The resource cache owns the authoritative instance; everyone else
/// receives a clone, so evicting an entry never invalidates a copy in use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedModel {
    pub asset: AssetId,
    /// Detail level this representation was decoded from (`None` = original).
    pub level: Option<u8>,
    /// Vertex positions.
    pub positions: Vec<[f32; 3]>,
    /// Triangle list indices into `positions`.
    pub indices: Vec<u32>,
    pub material_count: u32,
}

impl DecodedModel {
    /// Create an empty model for the given asset and level.
    pub fn new(asset: AssetId, level: Option<u8>) -> Self {
        Self {
            asset,
            level,
            positions: Vec::new(),
            indices: Vec::new(),
            material_count: 0,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Approximate heap footprint of the geometry buffers in bytes.
    pub fn footprint_bytes(&self) -> u64 {
        let positions = self.positions.len() * std::mem::size_of::<[f32; 3]>();
        let indices = self.indices.len() * std::mem::size_of::<u32>();
        (positions + indices + std::mem::size_of::<Self>()) as u64
    }
}
