//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryConfig;
use crate::select::SelectionConfig;
use tessera_common::{Backend, Error, Result};
use tessera_storage::{CloudConfig, ProviderSettings, TieringConfig};

/// Metadata database file name under the data root.
pub const METADATA_FILENAME: &str = "metadata.db";

/// Worker pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Provider calls allowed in flight at once.
    pub max_concurrent: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_concurrent: 16 }
    }
}

/// Full engine configuration, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Data root. Backends and the metadata database live underneath.
    pub root: PathBuf,
    /// Largest accepted content in bytes.
    #[serde(default = "default_max_content_size")]
    pub max_content_size: u64,
    /// Deadline for a single provider call.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout: Duration,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub tiering: TieringConfig,
    /// Backend used as the hybrid cold tier.
    #[serde(default = "default_hybrid_cold")]
    pub hybrid_cold: Backend,
    /// Cloud backend settings; the backend is off when absent.
    #[serde(default)]
    pub cloud: Option<CloudConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_content_size() -> u64 {
    1024 * 1024 * 1024
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_hybrid_cold() -> Backend {
    Backend::Disk
}

impl EngineConfig {
    /// Defaults rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_content_size: default_max_content_size(),
            operation_timeout: default_operation_timeout(),
            selection: SelectionConfig::default(),
            pool: PoolConfig::default(),
            tiering: TieringConfig::default(),
            hybrid_cold: default_hybrid_cold(),
            cloud: None,
            retry: RetryConfig::default(),
        }
    }

    /// Settings for building the provider registry.
    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            root: self.root.clone(),
            cloud: self.cloud.clone(),
            tiering: self.tiering.clone(),
            hybrid_cold: self.hybrid_cold,
        }
    }

    /// Path of the SQLite metadata database.
    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILENAME)
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Write the configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
