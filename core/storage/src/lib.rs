//! Storage providers for Tessera.
//!
//! Every backend implements [`StorageProvider`]; the [`ProviderRegistry`]
//! maps each [`Backend`](tessera_common::Backend) kind to its instance.
//!
//! # Backends
//! - [`DiskProvider`]: files under a root directory
//! - [`MemoryProvider`]: volatile in-process map
//! - [`VersionedProvider`]: commit history with git-format references
//! - [`CloudProvider`]: remote object store with native versioning
//! - [`HybridCoordinator`]: memory hot tier over a cold tier, with backup

pub mod cloud;
pub mod disk;
pub mod hybrid;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod versioned;

pub use cloud::{CloudConfig, CloudProvider};
pub use disk::DiskProvider;
pub use hybrid::{HybridCoordinator, HybridStats, TierState, TieringConfig};
pub use memory::{MemoryProvider, MemoryStats};
pub use provider::{Capabilities, Metadata, StorageProvider, Version, WriteOptions};
pub use registry::{ProviderRegistry, ProviderSettings};
pub use versioned::{HeadState, ObjectId, RefManager, VersionedProvider};
