//! Tessera storage engine.
//!
//! Ties the storage providers together into one service:
//! - [`StorageEngine`]: backend selection, bounded provider dispatch, metadata records
//! - [`MetadataStore`]: where [`StorageResource`] records live
//! - [`LocalJobQueue`]: background processing, cleanup and versioning jobs
//! - [`TieringScheduler`]: periodic hybrid tier sweeps

pub mod config;
pub mod engine;
pub mod jobs;
pub mod metadata;
pub mod pool;
pub mod resource;
pub mod retry;
pub mod scheduler;
pub mod select;

pub use config::{EngineConfig, PoolConfig};
pub use engine::{BackendUsage, EngineStats, StorageEngine, StoreOptions};
pub use jobs::{
    Job, JobHandle, JobHandler, JobKind, JobOutcome, JobPriority, JobQueue, LocalJobQueue,
    VersionPayload,
};
pub use metadata::{MemoryMetadataStore, MetadataStore, SqliteMetadataStore};
pub use pool::{PoolStats, WorkerPool};
pub use resource::{ResourceFilter, StorageResource, StorageResourceBuilder};
pub use retry::{RetryConfig, RetryExecutor};
pub use scheduler::{TieringScheduler, TieringSchedulerHandle};
pub use select::{SelectionConfig, SelectionHints};
