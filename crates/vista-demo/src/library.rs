//! Demo model library: a Wavefront OBJ decoder, directory scanning into a
//! catalog, and a generated sample library.

use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::Read;
use std::path::Path;

use tracing::{debug, info, warn};
use vista_assets::{
    AssetDescriptor, AssetId, DecodeError, DecodedModel, FormatDecoder, InMemoryCatalog,
    ModelMetadata, SourceFormat,
};

/// Decodes the `v` and `f` records of ASCII Wavefront OBJ files. Polygons
/// are fan-triangulated; every other record is skipped.
pub(crate) struct ObjDecoder;

impl FormatDecoder for ObjDecoder {
    fn format(&self) -> SourceFormat {
        SourceFormat::Obj
    }

    fn decode(
        &self,
        descriptor: &AssetDescriptor,
        source: &mut dyn Read,
    ) -> Result<DecodedModel, DecodeError> {
        let mut text = String::new();
        source
            .read_to_string(&mut text)
            .map_err(|e| DecodeError::Corrupted(format!("not UTF-8 text: {e}")))?;

        let mut model = DecodedModel::new(descriptor.id, None);
        let mut materials = HashSet::new();
        for (number, line) in text.lines().enumerate() {
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("v") => model.positions.push(parse_vertex(fields, number + 1)?),
                Some("f") => {
                    let corners = parse_face(fields, model.positions.len(), number + 1)?;
                    for i in 1..corners.len().saturating_sub(1) {
                        model
                            .indices
                            .extend_from_slice(&[corners[0], corners[i], corners[i + 1]]);
                    }
                }
                Some("usemtl") => {
                    materials.insert(fields.next().unwrap_or_default().to_string());
                }
                _ => {}
            }
        }

        if model.indices.is_empty() {
            return Err(DecodeError::Failed(format!(
                "{} contains no faces",
                descriptor.file_name
            )));
        }
        model.material_count = materials.len().max(1) as u32;
        debug!(
            "Decoded {}: {} vertices, {} triangles",
            descriptor.file_name,
            model.vertex_count(),
            model.triangle_count()
        );
        Ok(model)
    }
}

fn parse_vertex<'a>(
    fields: impl Iterator<Item = &'a str>,
    line: usize,
) -> Result<[f32; 3], DecodeError> {
    let coords: Vec<f32> = fields
        .take(3)
        .map(|f| {
            f.parse()
                .map_err(|_| DecodeError::Corrupted(format!("line {line}: bad coordinate {f:?}")))
        })
        .collect::<Result<_, _>>()?;
    match coords.as_slice() {
        &[x, y, z] => Ok([x, y, z]),
        _ => Err(DecodeError::Corrupted(format!(
            "line {line}: vertex needs three coordinates"
        ))),
    }
}

/// Face corners as zero-based vertex indices. Accepts `i`, `i/t`, `i/t/n`
/// and negative (relative) indices.
fn parse_face<'a>(
    fields: impl Iterator<Item = &'a str>,
    vertex_count: usize,
    line: usize,
) -> Result<Vec<u32>, DecodeError> {
    let corners = fields
        .map(|field| {
            let index: i64 = field
                .split('/')
                .next()
                .and_then(|i| i.parse().ok())
                .ok_or_else(|| DecodeError::Corrupted(format!("line {line}: bad face {field:?}")))?;
            let resolved = if index < 0 {
                vertex_count as i64 + index
            } else {
                index - 1
            };
            if resolved < 0 || resolved >= vertex_count as i64 {
                return Err(DecodeError::Corrupted(format!(
                    "line {line}: vertex {index} out of range"
                )));
            }
            Ok(resolved as u32)
        })
        .collect::<Result<Vec<_>, _>>()?;
    if corners.len() < 3 {
        return Err(DecodeError::Corrupted(format!(
            "line {line}: face needs at least three vertices"
        )));
    }
    Ok(corners)
}

/// Stable id derived from the file name.
pub(crate) fn asset_id_for(file_name: &str) -> AssetId {
    let mut hasher = DefaultHasher::new();
    file_name.hash(&mut hasher);
    AssetId(hasher.finish())
}

/// Build a catalog from the model files directly inside `dirs`. Detail
/// level files (`*_lodN.*`) and hidden entries are skipped. Earlier
/// directories win on name clashes.
pub(crate) fn scan_library(dirs: &[&Path]) -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    for dir in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot scan {}: {e}", dir.display());
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name.starts_with('.') || is_level_file(file_name) || !path.is_file() {
                continue;
            }
            let Some(format) = SourceFormat::from_path(&path) else {
                continue;
            };
            let id = asset_id_for(file_name);
            if catalog.ids().contains(&id) {
                continue;
            }
            let byte_size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let metadata = estimate_metadata(&path, format, byte_size);
            catalog.insert(AssetDescriptor {
                id,
                name: path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(file_name)
                    .to_string(),
                file_name: file_name.to_string(),
                format,
                byte_size,
                metadata,
            });
        }
    }
    info!("Catalog holds {} models", catalog.len());
    catalog
}

fn is_level_file(file_name: &str) -> bool {
    let stem = file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem);
    stem.rsplit_once("_lod")
        .is_some_and(|(_, n)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Counts for OBJ files; a size-based guess for binary formats.
fn estimate_metadata(path: &Path, format: SourceFormat, byte_size: u64) -> ModelMetadata {
    if format == SourceFormat::Obj
        && let Ok(text) = std::fs::read_to_string(path)
    {
        let vertices = text.lines().filter(|l| l.starts_with("v ")).count() as u64;
        let triangles: usize = text
            .lines()
            .filter(|l| l.starts_with("f "))
            .map(|l| l.split_whitespace().count().saturating_sub(3))
            .sum();
        return ModelMetadata::from_counts(triangles as u64, vertices);
    }
    let triangles = byte_size / 50;
    ModelMetadata::from_counts(triangles, triangles / 2)
}

/// Write a flat `cells x cells` grid as OBJ text.
fn grid_obj(cells: usize) -> String {
    let mut out = String::new();
    let side = cells + 1;
    for z in 0..side {
        for x in 0..side {
            let height = ((x as f32 * 0.3).sin() + (z as f32 * 0.2).cos()) * 0.1;
            out.push_str(&format!("v {x} {height:.3} {z}\n"));
        }
    }
    for z in 0..cells {
        for x in 0..cells {
            let a = z * side + x + 1;
            let b = a + 1;
            let c = a + side;
            let d = c + 1;
            out.push_str(&format!("f {a} {b} {d} {c}\n"));
        }
    }
    out
}

/// Populate `dir` with sample models unless it already holds some.
/// Returns how many files were written.
pub(crate) fn write_sample_library(dir: &Path) -> std::io::Result<usize> {
    std::fs::create_dir_all(dir)?;
    let has_models = std::fs::read_dir(dir)?
        .flatten()
        .any(|e| SourceFormat::from_path(&e.path()).is_some());
    if has_models {
        return Ok(0);
    }

    let samples = [
        ("crate.obj", grid_obj(4)),
        ("bench.obj", grid_obj(16)),
        ("statue.obj", grid_obj(64)),
        ("terrain.obj", grid_obj(180)),
        ("broken.obj", "v 0 0 0\nv 1 zero 0\nf 1 2 3\n".to_string()),
    ];
    for (name, contents) in &samples {
        std::fs::write(dir.join(name), contents)?;
    }
    info!("Wrote {} sample models to {}", samples.len(), dir.display());
    Ok(samples.len())
}
