//! Immutable records describing one model in the catalog.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Opaque, stable identifier of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(pub u64);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Source file format of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceFormat {
    /// Universal Scene Description package.
    Usdz,
    /// Native scene archive.
    Scn,
    /// glTF JSON with external buffers.
    Gltf,
    /// Binary glTF.
    Glb,
    /// Wavefront OBJ.
    Obj,
    /// COLLADA.
    Dae,
    /// Stereolithography mesh.
    Stl,
}

impl SourceFormat {
    /// All known formats.
    pub const ALL: [SourceFormat; 7] = [
        SourceFormat::Usdz,
        SourceFormat::Scn,
        SourceFormat::Gltf,
        SourceFormat::Glb,
        SourceFormat::Obj,
        SourceFormat::Dae,
        SourceFormat::Stl,
    ];

    /// Canonical lowercase file extension.
    pub fn extension(self) -> &'static str {
        match self {
            SourceFormat::Usdz => "usdz",
            SourceFormat::Scn => "scn",
            SourceFormat::Gltf => "gltf",
            SourceFormat::Glb => "glb",
            SourceFormat::Obj => "obj",
            SourceFormat::Dae => "dae",
            SourceFormat::Stl => "stl",
        }
    }

    /// Guess the format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL.into_iter().find(|f| f.extension() == ext)
    }

    /// Guess the format from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// Coarse complexity bucket attached to a model by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComplexityClass {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl ComplexityClass {
    /// Classify a model by its triangle count.
    pub fn classify(triangle_count: u64) -> Self {
        match triangle_count {
            0..10_000 => ComplexityClass::Simple,
            10_000..50_000 => ComplexityClass::Moderate,
            50_000..250_000 => ComplexityClass::Complex,
            _ => ComplexityClass::VeryComplex,
        }
    }

    /// Whether models in this class should get reduced-detail variants.
    pub fn recommends_lod(self) -> bool {
        matches!(self, ComplexityClass::Complex | ComplexityClass::VeryComplex)
    }
}

/// Geometry statistics recorded for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub triangle_count: u64,
    pub vertex_count: u64,
    pub material_count: u32,
    pub texture_count: u32,
    pub complexity: ComplexityClass,
}

impl ModelMetadata {
    /// Metadata with the complexity class derived from the triangle count.
    pub fn from_counts(triangle_count: u64, vertex_count: u64) -> Self {
        Self {
            triangle_count,
            vertex_count,
            material_count: 1,
            texture_count: 0,
            complexity: ComplexityClass::classify(triangle_count),
        }
    }
}

/// Immutable description of one model, owned by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub id: AssetId,
    pub name: String,
    /// File name of the original source, relative to the storage roots.
    pub file_name: String,
    pub format: SourceFormat,
    /// Size of the source file in bytes.
    pub byte_size: u64,
    pub metadata: ModelMetadata,
}

impl AssetDescriptor {
    /// File name without its extension.
    pub fn file_stem(&self) -> &str {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.file_name)
    }

    /// Extension of the source file, falling back to the format's canonical one.
    pub fn file_extension(&self) -> &str {
        Path::new(&self.file_name)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or(self.format.extension())
    }
}
