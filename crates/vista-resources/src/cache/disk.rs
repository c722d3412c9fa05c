//! Disk tier of the resource cache.
//!
//! Each cache key maps to one file `{asset}_{orig|lodN}.vmc` in the cache
//! directory. Files are written when the memory tier evicts an entry and
//! read back on a memory miss.
//!
//! ## File Layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | Magic bytes `b"VMDC"` |
//! | 4 | 1 | Format version (`u8`, currently 1) |
//! | 5 | N | postcard-encoded [`DecodedModel`] |

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use vista_assets::{AssetId, DecodedModel};

use crate::key::CacheKey;

/// Magic bytes identifying a disk cache file.
const MAGIC: [u8; 4] = *b"VMDC";

/// Current format version.
const FORMAT_VERSION: u8 = 1;

/// Extension of disk cache files.
const EXTENSION: &str = "vmc";

const HEADER_LEN: usize = MAGIC.len() + 1;

/// Errors from reading or writing disk cache files.
#[derive(Debug, thiserror::Error)]
pub enum DiskTierError {
    #[error("disk cache I/O: {0}")]
    Io(#[from] std::io::Error),
    /// The file does not start with the expected magic bytes.
    #[error("invalid magic bytes")]
    InvalidMagic,
    /// The format version is not supported by this build.
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),
    /// The body could not be encoded or decoded.
    #[error("invalid payload: {0}")]
    Payload(#[from] postcard::Error),
    /// The file decodes to a different key than its name says.
    #[error("file holds {found}, expected {expected}")]
    KeyMismatch { expected: CacheKey, found: CacheKey },
}

/// Directory-backed store of serialized models.
#[derive(Debug, Clone)]
pub struct DiskTier {
    dir: PathBuf,
}

impl DiskTier {
    /// Open (creating if needed) a disk tier rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DiskTierError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", key.file_stem()))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Write `model` under `key`, replacing any previous file.
    pub fn write(&self, key: &CacheKey, model: &DecodedModel) -> Result<(), DiskTierError> {
        let bytes = encode(model)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &path)?;
        tracing::trace!("Mirrored {key} to disk ({} bytes)", bytes.len());
        Ok(())
    }

    /// Read the model stored under `key`.
    ///
    /// A missing file is a miss. A file that fails to decode is deleted and
    /// also reported as a miss.
    pub fn read(&self, key: &CacheKey) -> Option<DecodedModel> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!("Failed to read disk cache entry {key}: {err}");
                return None;
            }
        };
        match decode(&bytes).and_then(|model| check_key(key, model)) {
            Ok(model) => Some(model),
            Err(err) => {
                tracing::warn!("Dropping corrupt disk cache entry {key}: {err}");
                if let Err(err) = std::fs::remove_file(&path) {
                    tracing::warn!("Failed to delete {}: {err}", path.display());
                }
                None
            }
        }
    }

    /// Delete the file for `key`. Returns whether one existed.
    pub fn remove(&self, key: &CacheKey) -> bool {
        std::fs::remove_file(self.path_for(key)).is_ok()
    }

    /// Delete every file belonging to `asset`. Returns how many were removed.
    pub fn remove_asset(&self, asset: AssetId) -> usize {
        let prefix = format!("{asset}_");
        self.remove_matching(|name| name.starts_with(&prefix))
    }

    /// Delete every cache file. Returns how many were removed.
    pub fn clear(&self) -> usize {
        self.remove_matching(|_| true)
    }

    fn remove_matching(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("Failed to list {}: {err}", self.dir.display());
                return 0;
            }
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_cache_file = path.extension().and_then(|e| e.to_str()) == Some(EXTENSION);
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(&predicate);
            if is_cache_file && matches && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        removed
    }
}

fn encode(model: &DecodedModel) -> Result<Vec<u8>, DiskTierError> {
    let mut buf = Vec::with_capacity(HEADER_LEN + model.footprint_bytes() as usize);
    buf.extend_from_slice(&MAGIC);
    buf.push(FORMAT_VERSION);
    Ok(postcard::to_extend(model, buf)?)
}

fn decode(data: &[u8]) -> Result<DecodedModel, DiskTierError> {
    if data.len() < MAGIC.len() || data[..MAGIC.len()] != MAGIC {
        return Err(DiskTierError::InvalidMagic);
    }
    let Some(&version) = data.get(MAGIC.len()) else {
        return Err(DiskTierError::UnsupportedVersion(0));
    };
    if version != FORMAT_VERSION {
        return Err(DiskTierError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(&data[HEADER_LEN..])?)
}

fn check_key(key: &CacheKey, model: DecodedModel) -> Result<DecodedModel, DiskTierError> {
    let found = CacheKey::new(model.asset, model.level);
    if found != *key {
        return Err(DiskTierError::KeyMismatch {
            expected: *key,
            found,
        });
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(asset: u64, level: Option<u8>) -> DecodedModel {
        let mut model = DecodedModel::new(AssetId(asset), level);
        model.positions = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        model.indices = vec![0, 1, 2];
        model.material_count = 1;
        model
    }

    #[test]
    fn test_written_entry_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path()).unwrap();
        let key = CacheKey::new(AssetId(1), Some(2));
        tier.write(&key, &model(1, Some(2))).unwrap();
        assert!(tier.contains(&key));
        assert_eq!(tier.read(&key), Some(model(1, Some(2))));
    }

    #[test]
    fn test_missing_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path()).unwrap();
        assert_eq!(tier.read(&CacheKey::original(AssetId(9))), None);
    }

    /// A corrupt file is a miss and is removed from disk.
    #[test]
    fn test_corrupt_entry_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path()).unwrap();
        let key = CacheKey::original(AssetId(3));
        tier.write(&key, &model(3, None)).unwrap();

        let path = tier.path_for(&key);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() / 2);
        std::fs::write(&path, &bytes).unwrap();

        assert_eq!(tier.read(&key), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_bad_magic_and_version_are_rejected() {
        assert!(matches!(decode(b"NOPE\x01"), Err(DiskTierError::InvalidMagic)));
        assert!(matches!(
            decode(b"VMDC\x09rest"),
            Err(DiskTierError::UnsupportedVersion(9))
        ));
    }

    /// A file renamed to another key is treated as corrupt.
    #[test]
    fn test_key_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path()).unwrap();
        let key = CacheKey::original(AssetId(4));
        tier.write(&key, &model(5, None)).unwrap();
        assert_eq!(tier.read(&key), None);
        assert!(!tier.contains(&key));
    }

    #[test]
    fn test_remove_asset_only_touches_that_asset() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path()).unwrap();
        for (asset, level) in [(1, None), (1, Some(2)), (2, None)] {
            tier.write(&CacheKey::new(AssetId(asset), level), &model(asset, level))
                .unwrap();
        }
        assert_eq!(tier.remove_asset(AssetId(1)), 2);
        assert!(tier.contains(&CacheKey::original(AssetId(2))));
        assert_eq!(tier.clear(), 1);
    }
}
