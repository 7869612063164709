use crate::error::{Result, UpstageError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_chunk_min_size() -> u64 {
    1 << 20 // 1 MB
}

fn default_chunk_max_size() -> u64 {
    64 << 20 // 64 MB
}

fn default_checksum() -> String {
    "xxh3_64".to_string()
}

fn default_chunk_storage() -> PathBuf {
    PathBuf::from("/var/lib/upstage/chunks")
}

fn default_copy_block_size() -> usize {
    1 << 20 // 1 MB per read/write while reassembling
}

fn default_create_dirs() -> bool {
    true
}

fn default_dir_mode() -> u32 {
    0o770
}

fn default_catalog_db() -> PathBuf {
    PathBuf::from("/var/lib/upstage/catalog.db")
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// Runtime configuration for the staging service.
///
/// Loaded from a TOML file; every field has a default so a missing or
/// partial file still yields a working configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Smallest chunk size ever recommended to clients.
    #[serde(default = "default_chunk_min_size")]
    pub chunk_min_size: u64,

    /// Hard cap on a single uploaded chunk.
    #[serde(default = "default_chunk_max_size")]
    pub chunk_max_size: u64,

    /// Checksum algorithm in force ("xxh3_64" or "blake3").
    #[serde(default = "default_checksum")]
    pub checksum: String,

    /// Root directory of the chunk staging tree.
    #[serde(default = "default_chunk_storage")]
    pub chunk_storage: PathBuf,

    /// Block size for streaming copies during reassembly.
    #[serde(default = "default_copy_block_size")]
    pub copy_block_size: usize,

    /// Create missing destination/staging directories automatically.
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,

    /// Unix mode applied to created staging directories.
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,

    /// SQLite database holding the host's destination catalog.
    #[serde(default = "default_catalog_db")]
    pub catalog_db: PathBuf,

    /// Seconds between janitor sweeps when running as a daemon.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        // serde fills every field from its default fn
        toml::from_str("").expect("empty config must deserialize")
    }
}

impl Config {
    /// Default config file location (`~/.config/upstage/config.toml`).
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| UpstageError::Config("Cannot determine config directory".into()))?;
        Ok(base.join("upstage").join("config.toml"))
    }

    /// Load configuration from `path`, or from the default location when
    /// `path` is `None`. A missing default file yields `Config::default()`;
    /// an explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path()?, false),
        };

        if !path.exists() {
            if explicit {
                return Err(UpstageError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| UpstageError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_min_size == 0 {
            return Err(UpstageError::Config("chunk_min_size must be positive".into()));
        }
        if self.chunk_max_size < self.chunk_min_size {
            return Err(UpstageError::Config(
                "chunk_max_size must be >= chunk_min_size".into(),
            ));
        }
        if self.copy_block_size == 0 {
            return Err(UpstageError::Config("copy_block_size must be positive".into()));
        }
        if crate::checksum::Algorithm::from_name(&self.checksum).is_none() {
            return Err(UpstageError::Config(format!(
                "Unknown checksum algorithm: {}",
                self.checksum
            )));
        }
        Ok(())
    }
}
