//! Configuration for the Vista model resource manager.
//!
//! Settings persist to disk as a RON file. Every section defaults missing
//! fields, so config files written by older builds keep loading. CLI flags
//! override file values.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    CONFIG_FILE_NAME, CacheConfig, Config, CostKind, DebugConfig, LoaderConfig, LodConfig,
    StorageConfig,
};
pub use error::ConfigError;
