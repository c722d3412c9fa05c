//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Vista command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "vista", about = "Vista model resource manager")]
pub struct CliArgs {
    /// Memory ceiling in megabytes.
    #[arg(long)]
    pub memory_ceiling_mb: Option<u64>,

    /// Maximum number of concurrent decodes.
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Enable or disable the disk cache tier.
    #[arg(long)]
    pub disk_cache: Option<bool>,

    /// Model library directory.
    #[arg(long)]
    pub library: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(mb) = args.memory_ceiling_mb {
            self.cache.memory_ceiling_mb = mb;
        }
        if let Some(n) = args.max_concurrent {
            self.loader.max_concurrent_loads = n;
        }
        if let Some(enabled) = args.disk_cache {
            self.cache.disk_cache = enabled;
        }
        if let Some(ref dir) = args.library {
            self.storage.library_dir = Some(dir.clone());
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
