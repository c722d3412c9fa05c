//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the config file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Memory ceiling, eviction and disk tier settings.
    pub cache: CacheConfig,
    /// Decode concurrency and event settings.
    pub loader: LoaderConfig,
    /// Detail level thresholds.
    pub lod: LodConfig,
    /// Where model files live.
    pub storage: StorageConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// How cached model costs are estimated.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum CostKind {
    /// Every model costs `flat_cost_mb`.
    #[default]
    Flat,
    /// Cost is the measured size of the decoded geometry.
    Measured,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Memory ceiling in megabytes.
    pub memory_ceiling_mb: u64,
    /// Fraction of the ceiling eviction brings usage down to.
    pub eviction_target_ratio: f64,
    pub cost: CostKind,
    /// Cost charged per model with `CostKind::Flat`, in megabytes.
    pub flat_cost_mb: u64,
    /// Mirror evicted models to disk.
    pub disk_cache: bool,
    /// Disk tier directory. Defaults to `.vista-cache` in the library.
    pub disk_cache_dir: Option<PathBuf>,
    /// Fraction of the ceiling a low-memory signal evicts down to.
    pub low_memory_target_ratio: f64,
    /// A repeated low-memory signal within this many milliseconds clears
    /// every unpinned model.
    pub low_memory_repeat_window_ms: u64,
}

/// Loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoaderConfig {
    /// Decodes allowed to run at once.
    pub max_concurrent_loads: usize,
    /// Events buffered per subscriber.
    pub event_capacity: usize,
}

/// Detail level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LodConfig {
    /// Models with more triangles than this get reduced levels.
    pub triangle_threshold: u64,
    /// Models with a larger source file than this (in megabytes) get reduced levels.
    pub size_threshold_mb: u64,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Writable model library. Defaults to the platform data directory.
    pub library_dir: Option<PathBuf>,
    /// Read-only bundled models, searched after the library.
    pub bundled_dir: Option<PathBuf>,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Periodically log cache statistics.
    pub log_cache_stats: bool,
}

// --- Default implementations ---

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_ceiling_mb: 512,
            eviction_target_ratio: 0.8,
            cost: CostKind::Flat,
            flat_cost_mb: 32,
            disk_cache: true,
            disk_cache_dir: None,
            low_memory_target_ratio: 0.1,
            low_memory_repeat_window_ms: 10_000,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: 3,
            event_capacity: 256,
        }
    }
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            triangle_threshold: 50_000,
            size_threshold_mb: 5,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_cache_stats: false,
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Platform config directory for Vista, e.g. `~/.config/vista` on Linux.
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("vista"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::Write {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        std::fs::write(&config_path, serialized).map_err(|source| ConfigError::Write {
            path: config_path,
            source,
        })

    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE_NAME))?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Parse and validate one config file.
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = ron::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the resource manager cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio = |field: &'static str, value: f64, allow_zero: bool| {
            let low_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
            if low_ok && value <= 1.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is not a fraction of the ceiling"),
                })
            }
        };
        ratio(
            "cache.eviction_target_ratio",
            self.cache.eviction_target_ratio,
            false,
        )?;
        ratio(
            "cache.low_memory_target_ratio",
            self.cache.low_memory_target_ratio,
            true,
        )?;
        if self.cache.memory_ceiling_mb == 0 {
            return Err(ConfigError::Invalid {
                field: "cache.memory_ceiling_mb",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.loader.max_concurrent_loads == 0 {
            return Err(ConfigError::Invalid {
                field: "loader.max_concurrent_loads",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Memory ceiling in bytes.
    pub fn memory_ceiling_bytes(&self) -> u64 {
        self.cache.memory_ceiling_mb * 1024 * 1024
    }

    /// Flat per-model cost in bytes.
    pub fn flat_cost_bytes(&self) -> u64 {
        self.cache.flat_cost_mb * 1024 * 1024
    }

    /// LOD size threshold in bytes.
    pub fn size_threshold_bytes(&self) -> u64 {
        self.lod.size_threshold_mb * 1024 * 1024
    }
}
