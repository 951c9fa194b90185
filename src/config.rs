//! Configuration file support for cellport.
//!
//! A single JSON document carries the storage locations, job retention, the
//! archive safety limits applied to uploads and the size table used to
//! estimate export archives.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Format version written into new configuration files. Files with a
/// higher version are refused.
pub const CONFIG_VERSION: u32 = 1;

/// Verbosity of the command line front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Filter handed to `env_logger`.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Version of the configuration file format
    pub version: u32,

    /// Root of the per-user/per-experiment file tree
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Directory holding validated uploads until they are executed
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Seconds a job record survives in the job store
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,

    /// Log verbosity for the command line front-end
    #[serde(default)]
    pub log_level: LogLevel,

    /// Safety limits for uploaded archives
    #[serde(default)]
    pub limits: ArchiveLimits,

    /// Per-item size table for export estimates
    #[serde(default)]
    pub estimates: SizeEstimates,
}

/// Per-user data directory holding storage and staging.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("cellport")
}

fn default_storage_root() -> PathBuf {
    default_data_dir().join("storage")
}

fn default_staging_dir() -> PathBuf {
    default_data_dir().join("staging")
}

fn default_job_ttl_secs() -> u64 {
    24 * 60 * 60
}

/// Limits enforced while validating and reading uploaded archives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveLimits {
    /// Maximum total uncompressed size of all entries
    #[serde(default = "default_max_uncompressed_bytes")]
    pub max_uncompressed_bytes: u64,

    /// Maximum ratio of uncompressed to compressed archive size
    #[serde(default = "default_max_compression_ratio")]
    pub max_compression_ratio: f64,

    /// Annotation/metadata entries above this size are skipped with a warning
    #[serde(default = "default_max_annotation_entry_bytes")]
    pub max_annotation_entry_bytes: u64,

    /// Size of the chunks an export stream yields
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_max_uncompressed_bytes() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_max_compression_ratio() -> f64 {
    100.0
}

fn default_max_annotation_entry_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_chunk_size() -> usize {
    64 * 1024
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_uncompressed_bytes: default_max_uncompressed_bytes(),
            max_compression_ratio: default_max_compression_ratio(),
            max_annotation_entry_bytes: default_max_annotation_entry_bytes(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Heuristic sizes (bytes) used to estimate an export archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeEstimates {
    /// MIP + SUM projection pair of one field of view
    pub fov_projection_pair: u64,
    /// Projection files of one crop
    pub crop_image: u64,
    /// One 1024-float embedding vector
    pub embedding: u64,
    /// One serialized mask
    pub mask: u64,
    /// One `metadata.json`/`experiment.json` document
    pub metadata_file: u64,
    /// One annotation row/object in any annotation format
    pub annotation_entry: u64,
    /// Manifest plus fixed annotation file overhead
    pub fixed_overhead: u64,
}

impl Default for SizeEstimates {
    fn default() -> Self {
        Self {
            fov_projection_pair: 2 * 1024 * 1024,
            crop_image: 100 * 1024,
            embedding: 4 * 1024,
            mask: 50 * 1024,
            metadata_file: 1024,
            annotation_entry: 256,
            fixed_overhead: 16 * 1024,
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            storage_root: default_storage_root(),
            staging_dir: default_staging_dir(),
            job_ttl_secs: default_job_ttl_secs(),
            log_level: LogLevel::default(),
            limits: ArchiveLimits::default(),
            estimates: SizeEstimates::default(),
        }
    }

    /// Configuration rooted at a single directory (storage + staging below it).
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            storage_root: root.join("storage"),
            staging_dir: root.join("staging"),
            ..Self::new()
        }
    }

    /// Job retention as a duration.
    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }
        if config.limits.chunk_size == 0 {
            return Err(ConfigError::Invalid("limits.chunk_size must be non-zero".into()));
        }
        if config.limits.max_compression_ratio <= 0.0 {
            return Err(ConfigError::Invalid(
                "limits.max_compression_ratio must be positive".into(),
            ));
        }

        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Write configuration to a JSON file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Failure to read, parse or write a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error(
        "Configuration file version {file_version} is newer than supported version {supported_version}"
    )]
    VersionTooNew {
        file_version: u32,
        supported_version: u32,
    },

    /// A value is out of its accepted range
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
