//! Provider registry keyed by backend kind.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::cloud::{CloudConfig, CloudProvider};
use crate::disk::DiskProvider;
use crate::hybrid::{HybridCoordinator, TieringConfig};
use crate::memory::MemoryProvider;
use crate::provider::StorageProvider;
use crate::versioned::VersionedProvider;
use tessera_common::{Backend, Error, Result};

/// What the registry needs to build every backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Data root; each backend gets a subdirectory.
    pub root: PathBuf,
    /// Cloud backend settings. The backend is unavailable when `None`.
    #[serde(default)]
    pub cloud: Option<CloudConfig>,
    /// Hybrid tiering policy.
    #[serde(default)]
    pub tiering: TieringConfig,
    /// Backend used as the hybrid cold tier.
    #[serde(default = "default_hybrid_cold")]
    pub hybrid_cold: Backend,
}

fn default_hybrid_cold() -> Backend {
    Backend::Disk
}

impl ProviderSettings {
    /// Local-only settings rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cloud: None,
            tiering: TieringConfig::default(),
            hybrid_cold: default_hybrid_cold(),
        }
    }
}

/// Registry mapping each backend kind to its provider instance.
///
/// Dispatch is an explicit lookup by [`Backend`]; a kind that was never
/// configured resolves to `UnsupportedOperation`.
pub struct ProviderRegistry {
    providers: HashMap<Backend, Arc<dyn StorageProvider>>,
    memory: Option<MemoryProvider>,
    hybrid: Option<Arc<HybridCoordinator>>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            memory: None,
            hybrid: None,
        }
    }

    /// Register a provider under its own backend kind.
    ///
    /// # Errors
    /// - `AlreadyExists` if the kind already has a provider
    pub fn register(&mut self, provider: Arc<dyn StorageProvider>) -> Result<()> {
        let backend = provider.backend();
        if self.providers.contains_key(&backend) {
            return Err(Error::AlreadyExists(format!(
                "Backend '{}' is already registered",
                backend
            )));
        }
        self.providers.insert(backend, provider);
        Ok(())
    }

    /// Register the memory backend, keeping a handle for statistics.
    pub fn register_memory(&mut self, memory: MemoryProvider) -> Result<()> {
        self.register(Arc::new(memory.clone()))?;
        self.memory = Some(memory);
        Ok(())
    }

    /// Register the hybrid coordinator, keeping its concrete handle for
    /// tiering control and statistics.
    pub fn register_hybrid(&mut self, hybrid: Arc<HybridCoordinator>) -> Result<()> {
        self.register(hybrid.clone())?;
        self.hybrid = Some(hybrid);
        Ok(())
    }

    /// Provider for a backend kind.
    ///
    /// # Errors
    /// - `UnsupportedOperation` if the kind is not configured
    pub fn resolve(&self, backend: Backend) -> Result<Arc<dyn StorageProvider>> {
        self.providers.get(&backend).cloned().ok_or_else(|| {
            Error::UnsupportedOperation(format!("Backend '{}' is not configured", backend))
        })
    }

    /// Configured backend kinds, in declaration order.
    pub fn backends(&self) -> Vec<Backend> {
        Backend::ALL
            .into_iter()
            .filter(|b| self.providers.contains_key(b))
            .collect()
    }

    pub fn has_backend(&self, backend: Backend) -> bool {
        self.providers.contains_key(&backend)
    }

    /// The memory backend, if configured.
    pub fn memory(&self) -> Option<&MemoryProvider> {
        self.memory.as_ref()
    }

    /// The hybrid coordinator, if configured.
    pub fn hybrid(&self) -> Option<&Arc<HybridCoordinator>> {
        self.hybrid.as_ref()
    }

    /// Build every backend the settings allow.
    ///
    /// # Errors
    /// - `Validation` if the hybrid cold tier is not disk, versioned or a
    ///   configured cloud backend
    /// - I/O errors creating backend directories
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        let mut registry = Self::new();

        let disk: Arc<dyn StorageProvider> = Arc::new(DiskProvider::new(settings.root.join("disk"))?);
        let versioned: Arc<dyn StorageProvider> =
            Arc::new(VersionedProvider::new(settings.root.join("versioned"))?);
        let cloud: Option<Arc<dyn StorageProvider>> = match &settings.cloud {
            Some(config) => Some(Arc::new(CloudProvider::from_config(config)?)),
            None => None,
        };

        let cold = match settings.hybrid_cold {
            Backend::Disk => disk.clone(),
            Backend::Versioned => versioned.clone(),
            Backend::Cloud => cloud.clone().ok_or_else(|| {
                Error::Validation("Hybrid cold tier is cloud but no cloud backend is configured".to_string())
            })?,
            other => {
                return Err(Error::Validation(format!(
                    "Backend '{}' cannot serve as the hybrid cold tier",
                    other
                )))
            }
        };
        let backup: Arc<dyn StorageProvider> =
            Arc::new(DiskProvider::new(settings.root.join("backup"))?);
        let hybrid = Arc::new(HybridCoordinator::new(
            MemoryProvider::new(),
            cold,
            Some(backup),
            settings.tiering.clone(),
        ));

        registry.register(disk)?;
        registry.register_memory(MemoryProvider::new())?;
        registry.register(versioned)?;
        if let Some(cloud) = cloud {
            registry.register(cloud)?;
        }
        registry.register_hybrid(hybrid)?;

        info!(
            "Storage backends ready under {}: {:?}",
            settings.root.display(),
            registry.backends()
        );
        Ok(registry)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
