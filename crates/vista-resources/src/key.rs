//! Cache slot identity.

use std::fmt;

use vista_assets::AssetId;

/// Identifies one cache slot: a model at one detail level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub asset: AssetId,
    /// Detail level index; `None` is the original.
    pub level: Option<u8>,
}

impl CacheKey {
    /// Key for `asset` at `level`. Level 0 is the original and maps to `None`.
    pub fn new(asset: AssetId, level: Option<u8>) -> Self {
        Self {
            asset,
            level: level.filter(|&l| l != 0),
        }
    }

    /// Key of the original representation.
    pub fn original(asset: AssetId) -> Self {
        Self { asset, level: None }
    }

    pub fn is_original(&self) -> bool {
        self.level.is_none()
    }

    /// Level index with the original as 0.
    pub fn level_index(&self) -> u8 {
        self.level.unwrap_or(0)
    }

    /// Stable file stem for the disk tier: `{asset}_orig` or `{asset}_lod{n}`.
    pub fn file_stem(&self) -> String {
        match self.level {
            None => format!("{}_orig", self.asset),
            Some(level) => format!("{}_lod{level}", self.asset),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            None => write!(f, "{}/orig", self.asset),
            Some(level) => write!(f, "{}/lod{level}", self.asset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_zero_is_original() {
        let a = CacheKey::new(AssetId(3), Some(0));
        let b = CacheKey::original(AssetId(3));
        assert_eq!(a, b);
        assert!(a.is_original());
        assert_eq!(CacheKey::new(AssetId(3), Some(2)).level_index(), 2);
    }

    #[test]
    fn test_file_stem_and_display() {
        let key = CacheKey::new(AssetId(0xab), Some(4));
        assert_eq!(key.file_stem(), "00000000000000ab_lod4");
        assert_eq!(key.to_string(), "00000000000000ab/lod4");
        assert_eq!(
            CacheKey::original(AssetId(1)).file_stem(),
            "0000000000000001_orig"
        );
    }
}
