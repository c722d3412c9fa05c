//! Resolution of model source files and of the on-disk cache location.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::descriptor::AssetDescriptor;

/// Name of the cache-tier directory created under the library directory.
pub const CACHE_DIR_NAME: &str = ".vista-cache";

/// Errors raised while resolving storage locations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No storage root contains the requested file.
    #[error("file not found: {0}")]
    NotFound(String),
    /// The file exists but could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The cache directory could not be created.
    #[error("failed to create cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where model source files live.
pub trait AssetStorage: Send + Sync {
    /// Open `file_name` (the source file or a derived detail-level file) of
    /// `descriptor` for reading.
    fn open(
        &self,
        descriptor: &AssetDescriptor,
        file_name: &str,
    ) -> Result<Box<dyn Read + Send>, StorageError>;

    /// Directory for the disk cache tier, created on demand.
    /// `Ok(None)` means this storage provides no disk tier.
    fn cache_dir(&self) -> Result<Option<PathBuf>, StorageError>;
}

/// Storage backed by a writable library directory with an optional
/// read-only directory of bundled models searched second.
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    library_dir: PathBuf,
    bundled_dir: Option<PathBuf>,
}

impl DirectoryStorage {
    pub fn new(library_dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: library_dir.into(),
            bundled_dir: None,
        }
    }

    /// Also search `bundled_dir` when a file is not in the library.
    pub fn with_bundled(mut self, bundled_dir: impl Into<PathBuf>) -> Self {
        self.bundled_dir = Some(bundled_dir.into());
        self
    }

    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    /// First existing path for `file_name`, library before bundled.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        std::iter::once(self.library_dir.as_path())
            .chain(self.bundled_dir.as_deref())
            .map(|root| root.join(file_name))
            .find(|path| path.is_file())
    }
}

impl AssetStorage for DirectoryStorage {
    fn open(
        &self,
        descriptor: &AssetDescriptor,
        file_name: &str,
    ) -> Result<Box<dyn Read + Send>, StorageError> {
        let Some(path) = self.resolve(file_name) else {
            tracing::debug!("No file {file_name} for asset {}", descriptor.id);
            return Err(StorageError::NotFound(file_name.to_string()));
        };
        let file = File::open(&path).map_err(|source| StorageError::Open { path, source })?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn cache_dir(&self) -> Result<Option<PathBuf>, StorageError> {
        let path = self.library_dir.join(CACHE_DIR_NAME);
        std::fs::create_dir_all(&path).map_err(|source| StorageError::CacheDir {
            path: path.clone(),
            source,
        })?;
        Ok(Some(path))
    }
}
