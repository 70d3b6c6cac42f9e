//! Storage engine: backend selection, provider dispatch and metadata records.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::jobs::{Job, JobHandler, JobKind, VersionPayload};
use crate::metadata::{MetadataStore, SqliteMetadataStore};
use crate::pool::{PoolStats, WorkerPool};
use crate::resource::{ResourceFilter, StorageResource, StorageResourceBuilder};
use crate::retry::RetryExecutor;
use crate::scheduler::TieringScheduler;
use crate::select::{choose_backend, validate_mime, SelectionHints};
use tessera_common::{checksum, Backend, Error, Locator, Result};
use tessera_storage::{
    Capabilities, HybridStats, MemoryStats, Metadata, ProviderRegistry, StorageProvider,
    Version, WriteOptions,
};

/// Per-call options for [`StorageEngine::store`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Overrides the mime type guessed from the file name.
    pub mime_type: Option<String>,
    /// History message for versioned backends.
    pub message: Option<String>,
    /// Aborts the provider call; no record is written when it fires.
    pub cancel: Option<CancellationToken>,
}

/// Records and bytes per backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendUsage {
    pub resources: usize,
    pub bytes: u64,
}

/// Monitoring snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub resources: usize,
    pub total_bytes: u64,
    pub by_backend: BTreeMap<Backend, BackendUsage>,
    /// Configured backends.
    pub backends: Vec<Backend>,
    pub memory: Option<MemoryStats>,
    pub hybrid: Option<HybridStats>,
    pub pool: PoolStats,
}

/// Orchestrates storage of artifacts across backends.
///
/// Content goes to a provider first; the [`StorageResource`] record is
/// persisted only once the provider call succeeded, so a failed, timed out or
/// cancelled store never leaves a record behind. Failures on an existing
/// resource are recorded under `last_error` in its backend metadata.
pub struct StorageEngine {
    config: EngineConfig,
    registry: ProviderRegistry,
    metadata: Arc<dyn MetadataStore>,
    pool: WorkerPool,
}

impl StorageEngine {
    /// Build every configured backend and use `metadata` for records.
    pub fn new(config: EngineConfig, metadata: Arc<dyn MetadataStore>) -> Result<Self> {
        let registry = ProviderRegistry::from_settings(&config.provider_settings())?;
        Ok(Self::with_registry(config, registry, metadata))
    }

    /// Engine over an already built registry.
    pub fn with_registry(
        config: EngineConfig,
        registry: ProviderRegistry,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let pool = WorkerPool::new(&config.pool, config.operation_timeout);
        Self {
            config,
            registry,
            metadata,
            pool,
        }
    }

    /// Engine with records in the SQLite database under the data root.
    pub fn open(config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.root)?;
        let metadata = Arc::new(SqliteMetadataStore::open(config.metadata_path())?);
        Self::new(config, metadata)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Backend the heuristics pick for `content`.
    pub fn select_backend(&self, content: &[u8], hints: &SelectionHints) -> Backend {
        choose_backend(
            content.len() as u64,
            &hints.resolved_mime(),
            hints.backend,
            &self.config.selection,
            self.registry.has_backend(Backend::Cloud),
        )
    }

    /// Store new content and record it.
    ///
    /// # Errors
    /// - `Validation` for oversized content, an empty file name or a malformed mime type
    /// - `UnsupportedOperation` if the chosen backend is not configured
    /// - `Timeout` / `Cancelled` from the worker pool
    /// - provider and metadata errors
    pub async fn store(
        &self,
        content: Bytes,
        file_name: &str,
        backend: Option<Backend>,
        options: &StoreOptions,
    ) -> Result<StorageResource> {
        self.check_size(content.len())?;
        if file_name.trim().is_empty() {
            return Err(Error::Validation("File name cannot be empty".to_string()));
        }

        let hints = SelectionHints {
            backend,
            mime_type: options.mime_type.clone(),
            file_name: Some(file_name.to_string()),
        };
        let mime = hints.resolved_mime();
        validate_mime(&mime)?;

        let backend = self.select_backend(&content, &hints);
        let provider = self.registry.resolve(backend)?;
        let locator = Locator::generate();

        let mut write_options = WriteOptions::default().with_mime_type(mime.clone());
        if let Some(message) = &options.message {
            write_options = write_options.with_message(message.clone());
        }
        let builder = StorageResourceBuilder::new(locator.clone(), file_name, backend)
            .mime_type(mime)
            .content(&content);

        let metadata = self
            .pool
            .run(
                "store",
                options.cancel.as_ref(),
                provider.write(&locator, content, &write_options),
            )
            .await
            .inspect_err(|e| warn!("Storing {} on {} failed: {}", file_name, backend, e))?;

        let resource = builder
            .backend_metadata(metadata.provider_data)
            .versioned(tracks_versions(backend, provider.capabilities()))
            .build();

        if let Err(e) = self.persist(&resource).await {
            warn!("Recording {} failed, removing its content: {}", locator, e);
            if let Err(cleanup) = provider.delete(&locator).await {
                warn!("Could not remove unrecorded content {}: {}", locator, cleanup);
            }
            return Err(e);
        }

        info!(
            "Stored {} ({} bytes) on {} as {}",
            resource.file_name, resource.file_size, backend, locator
        );
        Ok(resource)
    }

    /// Read a resource's current content.
    pub async fn retrieve(&self, resource: &StorageResource) -> Result<Bytes> {
        let provider = self.registry.resolve(resource.backend)?;
        match self
            .pool
            .run("retrieve", None, provider.read(&resource.locator))
            .await
        {
            Ok(content) => Ok(content),
            Err(e) => Err(self.record_failure(&resource.locator, "retrieve", e).await),
        }
    }

    /// Store a new version of a versioned resource and return the updated record.
    ///
    /// # Errors
    /// - `UnsupportedOperation` if the resource is not versioned or its
    ///   provider cannot create versions
    pub async fn create_version(
        &self,
        resource: &StorageResource,
        content: Bytes,
        message: Option<&str>,
    ) -> Result<StorageResource> {
        if !resource.is_versioned {
            return Err(Error::UnsupportedOperation(format!(
                "Resource {} on {} is not versioned",
                resource.locator, resource.backend
            )));
        }
        self.check_size(content.len())?;

        let provider = self.registry.resolve(resource.backend)?;
        if !provider.capabilities().versioning {
            return Err(Error::UnsupportedOperation(format!(
                "Backend {} cannot create versions",
                resource.backend
            )));
        }

        let next = resource.next_version();
        let message = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("Version {} of {}", next, resource.file_name));
        let options = WriteOptions::default().with_mime_type(resource.mime_type.clone());
        let digest = checksum(&content);
        let size = content.len() as u64;

        let write = {
            let locator = resource.locator.clone();
            async move { provider.create_version(&locator, content, &message, &options).await }
        };
        let base = resource.clone();
        let updated = self
            .mutate(resource, "create_version", write, move |(version, metadata): (Version, Metadata)| {
                let mut updated = base;
                updated.version = next;
                updated.checksum = digest;
                updated.file_size = size;
                updated.updated_at = Utc::now();
                updated.backend_metadata.remove("last_error");
                updated.merge_backend_metadata(metadata.provider_data);
                updated
                    .backend_metadata
                    .insert("version_id".to_string(), version.version_id.into());
                updated
                    .backend_metadata
                    .insert("sequence".to_string(), version.sequence.into());
                updated
            })
            .await?;

        info!(
            "Created version {} of {} on {}",
            updated.version, updated.locator, updated.backend
        );
        Ok(updated)
    }

    /// Overwrite a resource's content in place, keeping its version label.
    pub async fn update(&self, resource: &StorageResource, content: Bytes) -> Result<StorageResource> {
        self.check_size(content.len())?;
        let provider = self.registry.resolve(resource.backend)?;

        let options = WriteOptions::forced().with_mime_type(resource.mime_type.clone());
        let digest = checksum(&content);
        let size = content.len() as u64;

        let write = {
            let locator = resource.locator.clone();
            async move { provider.write(&locator, content, &options).await }
        };
        let base = resource.clone();
        let updated = self
            .mutate(resource, "update", write, move |metadata: Metadata| {
                let mut updated = base;
                updated.checksum = digest;
                updated.file_size = size;
                updated.updated_at = Utc::now();
                updated.backend_metadata.remove("last_error");
                updated.merge_backend_metadata(metadata.provider_data);
                updated
            })
            .await?;

        debug!("Updated {} ({} bytes)", updated.locator, size);
        Ok(updated)
    }

    /// Delete a resource's content. The record stays until [`forget`](Self::forget).
    pub async fn delete(&self, resource: &StorageResource) -> Result<()> {
        let provider = self.registry.resolve(resource.backend)?;
        match self
            .pool
            .run("delete", None, provider.delete(&resource.locator))
            .await
        {
            Ok(()) => {
                info!("Deleted {} from {}", resource.locator, resource.backend);
                Ok(())
            }
            Err(e) => Err(self.record_failure(&resource.locator, "delete", e).await),
        }
    }

    /// Versions of a resource, newest first.
    pub async fn list_versions(&self, resource: &StorageResource) -> Result<Vec<Version>> {
        let provider = self.registry.resolve(resource.backend)?;
        self.pool
            .run("list_versions", None, provider.list_versions(&resource.locator))
            .await
    }

    /// Content of one historical version.
    pub async fn retrieve_version(
        &self,
        resource: &StorageResource,
        version_id: &str,
    ) -> Result<Bytes> {
        let provider = self.registry.resolve(resource.backend)?;
        self.pool
            .run(
                "retrieve_version",
                None,
                provider.read_version(&resource.locator, version_id),
            )
            .await
    }

    /// Record for a locator.
    pub async fn get(&self, locator: &Locator) -> Result<Option<StorageResource>> {
        self.metadata.get(locator).await
    }

    pub async fn query(&self, filter: &ResourceFilter) -> Result<Vec<StorageResource>> {
        self.metadata.query(filter).await
    }

    /// Remove a record. Returns whether one existed.
    pub async fn forget(&self, locator: &Locator) -> Result<bool> {
        self.metadata.remove(locator).await
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        let records = self.metadata.query(&ResourceFilter::all()).await?;

        let mut by_backend: BTreeMap<Backend, BackendUsage> = BTreeMap::new();
        for record in &records {
            let usage = by_backend.entry(record.backend).or_default();
            usage.resources += 1;
            usage.bytes += record.file_size;
        }

        let hybrid = match self.registry.hybrid() {
            Some(hybrid) => Some(hybrid.stats().await),
            None => None,
        };

        Ok(EngineStats {
            resources: records.len(),
            total_bytes: records.iter().map(|r| r.file_size).sum(),
            by_backend,
            backends: self.registry.backends(),
            memory: self.registry.memory().map(|m| m.stats()),
            hybrid,
            pool: self.pool.stats(),
        })
    }

    /// Spawn the periodic hybrid sweep. `None` without a hybrid backend.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start_tiering(&self) -> Option<TieringScheduler> {
        let hybrid = self.registry.hybrid()?.clone();
        let (scheduler, handle) = TieringScheduler::new(hybrid.config().sweep_interval);
        tokio::spawn(handle.run(move || {
            let hybrid = hybrid.clone();
            async move { hybrid.trigger_tiering().await }
        }));
        Some(scheduler)
    }

    async fn require(&self, locator: &Locator) -> Result<StorageResource> {
        self.metadata
            .get(locator)
            .await?
            .ok_or_else(|| Error::NotFound(format!("No record for {}", locator)))
    }

    /// Check stored content against the recorded checksum and stamp `processed_at`.
    async fn process(&self, locator: &Locator) -> Result<()> {
        let resource = self.require(locator).await?;
        let content = self.retrieve(&resource).await?;

        if checksum(&content) != resource.checksum {
            let mismatch = Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Stored content of {} does not match its checksum", locator),
            ));
            return Err(self.record_failure(locator, "process", mismatch).await);
        }

        let mut processed = self.require(locator).await?;
        processed
            .backend_metadata
            .insert("processed_at".to_string(), Utc::now().to_rfc3339().into());
        self.metadata.put(&processed).await
    }

    /// Delete content and record. A locator without a record is a no-op.
    async fn cleanup(&self, locator: &Locator) -> Result<()> {
        match self.metadata.get(locator).await? {
            Some(resource) => {
                self.delete(&resource).await?;
                self.forget(locator).await?;
                Ok(())
            }
            None => {
                debug!("Nothing to clean up for {}", locator);
                Ok(())
            }
        }
    }

    /// Run a provider mutation of an existing resource and persist the record
    /// `build` derives from its output.
    ///
    /// The mutation runs as its own task. When it outlives the pool timeout it
    /// is not abandoned: the timeout is recorded first, and the record is
    /// brought up to date once the mutation lands.
    async fn mutate<T, W, B>(
        &self,
        resource: &StorageResource,
        operation: &'static str,
        write: W,
        build: B,
    ) -> Result<StorageResource>
    where
        T: Send + 'static,
        W: Future<Output = Result<T>> + Send + 'static,
        B: FnOnce(T) -> StorageResource + Send + 'static,
    {
        let mut task = tokio::spawn(write);
        let outcome = self.pool.run(operation, None, joined(&mut task)).await;
        match outcome {
            Ok(output) => {
                let updated = build(output);
                match self.persist(&updated).await {
                    Ok(()) => Ok(updated),
                    Err(e) => Err(self.record_failure(&updated.locator, operation, e).await),
                }
            }
            Err(Error::Timeout(reason)) => {
                let err = self
                    .record_failure(&resource.locator, operation, Error::Timeout(reason))
                    .await;

                let metadata = self.metadata.clone();
                let retry = RetryExecutor::new(self.config.retry.clone());
                let locator = resource.locator.clone();
                tokio::spawn(async move {
                    match joined(&mut task).await {
                        Ok(output) => {
                            let updated = build(output);
                            let attempted = retry
                                .execute(|| metadata.put(&updated), |e| !e.is_caller_error())
                                .await;
                            match attempted.result {
                                Ok(()) => info!("Recorded late {} of {}", operation, locator),
                                Err(e) => warn!("Could not record late {} of {}: {}", operation, locator, e),
                            }
                        }
                        Err(e) => debug!("Late {} of {} failed: {}", operation, locator, e),
                    }
                });
                Err(err)
            }
            Err(e) => Err(self.record_failure(&resource.locator, operation, e).await),
        }
    }

    /// Write a record, retrying failures that are not the caller's fault.
    async fn persist(&self, record: &StorageResource) -> Result<()> {
        RetryExecutor::new(self.config.retry.clone())
            .execute(|| self.metadata.put(record), |e| !e.is_caller_error())
            .await
            .result
    }

    fn check_size(&self, len: usize) -> Result<()> {
        if len as u64 > self.config.max_content_size {
            return Err(Error::Validation(format!(
                "Content of {} bytes exceeds the {} byte limit",
                len, self.config.max_content_size
            )));
        }
        Ok(())
    }

    /// Persist `err` as `last_error` on the locator's record, then hand it back.
    async fn record_failure(&self, locator: &Locator, operation: &str, err: Error) -> Error {
        warn!("{} of {} failed: {}", operation, locator, err);

        let mut resource = match self.metadata.get(locator).await {
            Ok(Some(resource)) => resource,
            Ok(None) => return err,
            Err(e) => {
                warn!("Could not load record {} to note the failure: {}", locator, e);
                return err;
            }
        };
        resource.backend_metadata.insert(
            "last_error".to_string(),
            serde_json::json!({
                "operation": operation,
                "kind": err.kind(),
                "message": err.to_string(),
                "at": Utc::now().to_rfc3339(),
            }),
        );
        if let Err(e) = self.metadata.put(&resource).await {
            warn!("Could not record failure on {}: {}", locator, e);
        }
        err
    }
}

/// Output of a spawned provider call.
async fn joined<T>(task: &mut JoinHandle<Result<T>>) -> Result<T> {
    task.await
        .map_err(|e| Error::Io(std::io::Error::other(format!("provider task failed: {}", e))))?
}

/// Whether a resource stored on `backend` keeps retrievable history.
fn tracks_versions(backend: Backend, capabilities: Capabilities) -> bool {
    match backend {
        Backend::Versioned => true,
        Backend::Hybrid => capabilities.history,
        Backend::Disk | Backend::Memory | Backend::Cloud => false,
    }
}

#[async_trait]
impl JobHandler for StorageEngine {
    async fn handle(&self, job: &Job) -> Result<()> {
        match job.kind {
            JobKind::Process => self.process(&job.locator).await,
            JobKind::Cleanup => self.cleanup(&job.locator).await,
            JobKind::CreateVersion => {
                let resource = self.require(&job.locator).await?;
                let payload = VersionPayload::from_value(&job.payload)?;
                let content = Bytes::from(payload.decode()?);
                self.create_version(&resource, content, payload.message.as_deref())
                    .await
                    .map(|_| ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobPriority, JobQueue, LocalJobQueue};
    use crate::metadata::MemoryMetadataStore;
    use crate::retry::RetryConfig;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tessera_storage::MemoryProvider;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn engine_at(temp: &TempDir) -> StorageEngine {
        let config = EngineConfig::with_root(temp.path());
        StorageEngine::new(config, Arc::new(MemoryMetadataStore::new())).unwrap()
    }

    fn engine_with(provider: Arc<dyn StorageProvider>, config: EngineConfig) -> StorageEngine {
        let mut registry = ProviderRegistry::new();
        registry.register(provider).unwrap();
        StorageEngine::with_registry(config, registry, Arc::new(MemoryMetadataStore::new()))
    }

    fn memory_engine() -> StorageEngine {
        let mut registry = ProviderRegistry::new();
        registry.register_memory(MemoryProvider::new()).unwrap();
        StorageEngine::with_registry(
            EngineConfig::with_root("memory-only"),
            registry,
            Arc::new(MemoryMetadataStore::new()),
        )
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(1)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    fn memory_engine_with(records: Arc<dyn MetadataStore>) -> StorageEngine {
        let mut registry = ProviderRegistry::new();
        registry.register_memory(MemoryProvider::new()).unwrap();
        let mut config = EngineConfig::with_root("memory-only");
        config.retry = fast_retry();
        StorageEngine::with_registry(config, registry, records)
    }

    async fn put(engine: &StorageEngine, content: &'static [u8], name: &str, backend: Option<Backend>) -> StorageResource {
        engine
            .store(Bytes::from_static(content), name, backend, &StoreOptions::default())
            .await
            .unwrap()
    }

    /// Disk-kind provider that never finishes a write in time.
    struct StalledProvider;

    #[async_trait]
    impl StorageProvider for StalledProvider {
        fn name(&self) -> &str {
            "stalled"
        }

        fn backend(&self) -> Backend {
            Backend::Disk
        }

        async fn write(&self, _: &Locator, content: Bytes, _: &WriteOptions) -> Result<Metadata> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Metadata::new(content.len() as u64))
        }

        async fn read(&self, locator: &Locator) -> Result<Bytes> {
            Err(Error::NotFound(locator.to_string()))
        }

        async fn delete(&self, _: &Locator) -> Result<()> {
            Ok(())
        }

        async fn exists(&self, _: &Locator) -> Result<bool> {
            Ok(false)
        }
    }

    /// Disk-kind provider whose network is down.
    struct UnreachableProvider;

    #[async_trait]
    impl StorageProvider for UnreachableProvider {
        fn name(&self) -> &str {
            "unreachable"
        }

        fn backend(&self) -> Backend {
            Backend::Disk
        }

        async fn write(&self, _: &Locator, _: Bytes, _: &WriteOptions) -> Result<Metadata> {
            Err(Error::Network("connection refused".to_string()))
        }

        async fn read(&self, _: &Locator) -> Result<Bytes> {
            Err(Error::Network("connection refused".to_string()))
        }

        async fn delete(&self, _: &Locator) -> Result<()> {
            Err(Error::Network("connection refused".to_string()))
        }

        async fn exists(&self, _: &Locator) -> Result<bool> {
            Err(Error::Network("connection refused".to_string()))
        }
    }

    /// Record store whose next `n` puts fail.
    struct FlakyRecords {
        inner: MemoryMetadataStore,
        failing_puts: AtomicU32,
    }

    impl FlakyRecords {
        fn new() -> Self {
            Self {
                inner: MemoryMetadataStore::new(),
                failing_puts: AtomicU32::new(0),
            }
        }

        fn fail_next_puts(&self, n: u32) {
            self.failing_puts.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MetadataStore for FlakyRecords {
        async fn get(&self, locator: &Locator) -> Result<Option<StorageResource>> {
            self.inner.get(locator).await
        }

        async fn put(&self, resource: &StorageResource) -> Result<()> {
            let left = self.failing_puts.load(Ordering::SeqCst);
            if left > 0 {
                self.failing_puts.store(left - 1, Ordering::SeqCst);
                return Err(Error::Database("disk I/O error".to_string()));
            }
            self.inner.put(resource).await
        }

        async fn remove(&self, locator: &Locator) -> Result<bool> {
            self.inner.remove(locator).await
        }

        async fn query(&self, filter: &ResourceFilter) -> Result<Vec<StorageResource>> {
            self.inner.query(filter).await
        }
    }

    /// Disk-kind provider over memory whose writes take `delay_ms`.
    struct SlowWrites {
        inner: MemoryProvider,
        delay_ms: AtomicU64,
    }

    #[async_trait]
    impl StorageProvider for SlowWrites {
        fn name(&self) -> &str {
            "slow"
        }

        fn backend(&self) -> Backend {
            Backend::Disk
        }

        async fn write(&self, locator: &Locator, content: Bytes, options: &WriteOptions) -> Result<Metadata> {
            let delay = self.delay_ms.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.inner.write(locator, content, options).await
        }

        async fn read(&self, locator: &Locator) -> Result<Bytes> {
            self.inner.read(locator).await
        }

        async fn delete(&self, locator: &Locator) -> Result<()> {
            self.inner.delete(locator).await
        }

        async fn exists(&self, locator: &Locator) -> Result<bool> {
            self.inner.exists(locator).await
        }
    }

    #[tokio::test]
    async fn test_store_hello_on_disk() {
        let temp = TempDir::new().unwrap();
        let engine = engine_at(&temp);

        let resource = put(&engine, b"hello", "hello.txt", Some(Backend::Disk)).await;
        assert_eq!(resource.file_size, 5);
        assert_eq!(resource.checksum, HELLO_SHA256);
        assert_eq!(resource.mime_type, "text/plain");
        assert_eq!(resource.version, "1");
        assert!(!resource.is_versioned);
        assert!(resource.backend_metadata.contains_key("path"));

        assert_eq!(engine.retrieve(&resource).await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(engine.get(&resource.locator).await.unwrap(), Some(resource.clone()));

        let result = engine
            .create_version(&resource, Bytes::from_static(b"hello again"), None)
            .await;
        assert!(matches!(result, Err(Error::UnsupportedOperation(_))));
    }

    #[tokio::test]
    async fn test_small_text_defaults_to_versioned() {
        let temp = TempDir::new().unwrap();
        let engine = engine_at(&temp);

        let resource = put(&engine, b"# notes", "notes.md", None).await;
        assert_eq!(resource.backend, Backend::Versioned);
        assert!(resource.is_versioned);

        let binary = put(&engine, b"\x89PNG", "pixel.png", None).await;
        assert_eq!(binary.backend, Backend::Disk);
    }

    #[tokio::test]
    async fn test_versions_increment() {
        let temp = TempDir::new().unwrap();
        let engine = engine_at(&temp);

        let v1 = put(&engine, b"draft", "essay.txt", Some(Backend::Versioned)).await;
        let v2 = engine
            .create_version(&v1, Bytes::from_static(b"second draft"), Some("rework intro"))
            .await
            .unwrap();
        let v3 = engine
            .create_version(&v2, Bytes::from_static(b"final"), None)
            .await
            .unwrap();

        assert_eq!(v2.version, "2");
        assert_eq!(v3.version, "3");
        assert_eq!(v3.checksum, checksum(b"final"));
        assert_eq!(v3.file_size, 5);
        assert_eq!(v3.backend_metadata["sequence"], 3);
        assert_eq!(engine.get(&v1.locator).await.unwrap(), Some(v3.clone()));

        let versions = engine.list_versions(&v3).await.unwrap();
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[1].message, "rework intro");
        assert_eq!(engine.retrieve(&v3).await.unwrap(), Bytes::from_static(b"final"));
        assert_eq!(
            engine.retrieve_version(&v3, "v1").await.unwrap(),
            Bytes::from_static(b"draft")
        );
    }

    #[tokio::test]
    async fn test_validation_happens_before_io() {
        let temp = TempDir::new().unwrap();
        let mut config = EngineConfig::with_root(temp.path());
        config.max_content_size = 4;
        let engine = StorageEngine::new(config, Arc::new(MemoryMetadataStore::new())).unwrap();

        let oversized = engine
            .store(Bytes::from_static(b"hello"), "a.txt", None, &StoreOptions::default())
            .await;
        assert!(matches!(oversized, Err(Error::Validation(_))));

        let options = StoreOptions {
            mime_type: Some("not a mime".to_string()),
            ..StoreOptions::default()
        };
        let malformed = engine
            .store(Bytes::from_static(b"hi"), "a.txt", None, &options)
            .await;
        assert!(matches!(malformed, Err(Error::Validation(_))));

        assert!(engine.query(&ResourceFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_backend() {
        let temp = TempDir::new().unwrap();
        let engine = engine_at(&temp);
        let result = engine
            .store(Bytes::from_static(b"x"), "x.bin", Some(Backend::Cloud), &StoreOptions::default())
            .await;
        assert!(matches!(result, Err(Error::UnsupportedOperation(_))));
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_no_record() {
        let engine = engine_with(
            Arc::new(UnreachableProvider),
            EngineConfig::with_root("unused"),
        );

        let result = engine
            .store(Bytes::from_static(b"x"), "x.bin", Some(Backend::Disk), &StoreOptions::default())
            .await;
        assert!(matches!(result, Err(Error::Network(_))));
        assert!(engine.query(&ResourceFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_leaves_no_record() {
        let engine = engine_with(Arc::new(StalledProvider), EngineConfig::with_root("unused"));
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let options = StoreOptions {
            cancel: Some(token),
            ..StoreOptions::default()
        };
        let result = engine
            .store(Bytes::from_static(b"x"), "x.bin", Some(Backend::Disk), &options)
            .await;

        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert!(engine.query(&ResourceFilter::all()).await.unwrap().is_empty());
        assert_eq!(engine.stats().await.unwrap().pool.cancellations, 1);
    }

    #[tokio::test]
    async fn test_timeout_leaves_no_record() {
        let mut config = EngineConfig::with_root("unused");
        config.operation_timeout = Duration::from_millis(20);
        let engine = engine_with(Arc::new(StalledProvider), config);

        let result = engine
            .store(Bytes::from_static(b"x"), "x.bin", Some(Backend::Disk), &StoreOptions::default())
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(engine.query(&ResourceFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_recorded_on_existing_resource() {
        let engine = memory_engine();
        let resource = put(&engine, b"volatile", "v.bin", Some(Backend::Memory)).await;

        engine.registry().memory().unwrap().clear();
        let result = engine.retrieve(&resource).await;
        assert!(matches!(result, Err(Error::NotFound(_))));

        let record = engine.get(&resource.locator).await.unwrap().unwrap();
        let last_error = record.last_error().unwrap();
        assert_eq!(last_error["operation"], "retrieve");
        assert_eq!(last_error["kind"], "not_found");

        let repaired = engine
            .update(&record, Bytes::from_static(b"restored"))
            .await
            .unwrap();
        assert!(repaired.last_error().is_none());
    }

    #[tokio::test]
    async fn test_record_write_is_retried() {
        let records = Arc::new(FlakyRecords::new());
        let engine = memory_engine_with(records.clone());
        let resource = put(&engine, b"one", "r.bin", Some(Backend::Memory)).await;

        records.fail_next_puts(1);
        let updated = engine
            .update(&resource, Bytes::from_static(b"two"))
            .await
            .unwrap();
        let record = engine.get(&resource.locator).await.unwrap().unwrap();
        assert_eq!(record, updated);
        assert_eq!(record.checksum, checksum(b"two"));
    }

    #[tokio::test]
    async fn test_unrecorded_update_is_flagged() {
        let records = Arc::new(FlakyRecords::new());
        let engine = memory_engine_with(records.clone());
        let resource = put(&engine, b"one", "r.bin", Some(Backend::Memory)).await;

        // Both attempts of the record write fail; noting the failure succeeds.
        records.fail_next_puts(2);
        let result = engine.update(&resource, Bytes::from_static(b"two")).await;
        assert!(matches!(result, Err(Error::Database(_))));

        let record = engine.get(&resource.locator).await.unwrap().unwrap();
        assert_eq!(record.checksum, checksum(b"one"));
        let last_error = record.last_error().unwrap();
        assert_eq!(last_error["operation"], "update");
        assert_eq!(last_error["kind"], "database");
        assert_eq!(engine.retrieve(&record).await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_update_past_timeout_is_recorded_when_it_lands() {
        let provider = Arc::new(SlowWrites {
            inner: MemoryProvider::new(),
            delay_ms: AtomicU64::new(0),
        });
        let mut config = EngineConfig::with_root("unused");
        config.operation_timeout = Duration::from_millis(50);
        config.retry = fast_retry();
        let engine = engine_with(provider.clone(), config);
        let resource = put(&engine, b"one", "s.bin", Some(Backend::Disk)).await;

        provider.delay_ms.store(200, Ordering::SeqCst);
        let result = engine.update(&resource, Bytes::from_static(b"two")).await;
        assert!(matches!(result, Err(Error::Timeout(_))));

        let flagged = engine.get(&resource.locator).await.unwrap().unwrap();
        assert_eq!(flagged.checksum, checksum(b"one"));
        assert_eq!(flagged.last_error().unwrap()["kind"], "timeout");

        tokio::time::sleep(Duration::from_millis(400)).await;
        let record = engine.get(&resource.locator).await.unwrap().unwrap();
        assert_eq!(record.checksum, checksum(b"two"));
        assert!(record.last_error().is_none());
        assert_eq!(engine.retrieve(&record).await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_update_refreshes_content_fields() {
        let engine = memory_engine();
        let resource = put(&engine, b"one", "n.txt", Some(Backend::Memory)).await;

        let updated = engine
            .update(&resource, Bytes::from_static(b"three"))
            .await
            .unwrap();
        assert_eq!(updated.file_size, 5);
        assert_eq!(updated.checksum, checksum(b"three"));
        assert_eq!(updated.version, resource.version);
        assert!(updated.updated_at >= resource.updated_at);
        assert_eq!(engine.retrieve(&updated).await.unwrap(), Bytes::from_static(b"three"));
    }

    #[tokio::test]
    async fn test_delete_then_forget() {
        let temp = TempDir::new().unwrap();
        let engine = engine_at(&temp);
        let resource = put(&engine, b"gone soon", "g.txt", Some(Backend::Disk)).await;

        engine.delete(&resource).await.unwrap();
        assert!(matches!(engine.retrieve(&resource).await, Err(Error::NotFound(_))));
        // Deleting absent content is a no-op.
        engine.delete(&resource).await.unwrap();

        assert!(engine.forget(&resource.locator).await.unwrap());
        assert!(engine.get(&resource.locator).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hybrid_versioning_follows_cold_tier() {
        let temp = TempDir::new().unwrap();
        let engine = engine_at(&temp);
        let on_disk = put(&engine, b"hot", "h.bin", Some(Backend::Hybrid)).await;
        assert!(!on_disk.is_versioned);
        assert_eq!(on_disk.backend_metadata["tier"], "hot");

        let temp = TempDir::new().unwrap();
        let mut config = EngineConfig::with_root(temp.path());
        config.hybrid_cold = Backend::Versioned;
        let engine = StorageEngine::new(config, Arc::new(MemoryMetadataStore::new())).unwrap();

        let resource = put(&engine, b"hot", "h.txt", Some(Backend::Hybrid)).await;
        assert!(resource.is_versioned);
        let next = engine
            .create_version(&resource, Bytes::from_static(b"warmer"), None)
            .await
            .unwrap();
        assert_eq!(next.version, "2");
        assert_eq!(next.backend_metadata["sequence"], 2);
        assert_eq!(engine.retrieve(&next).await.unwrap(), Bytes::from_static(b"warmer"));

        // The hot first write is part of the history.
        assert_eq!(engine.list_versions(&next).await.unwrap().len(), 2);
        assert_eq!(
            engine.retrieve_version(&next, "v1").await.unwrap(),
            Bytes::from_static(b"hot")
        );
    }

    #[tokio::test]
    async fn test_jobs_run_against_engine() {
        let temp = TempDir::new().unwrap();
        let engine = Arc::new(engine_at(&temp));
        let retry = RetryConfig::new(1)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false);
        let queue = LocalJobQueue::start(engine.clone(), retry, 2);

        let resource = put(&engine, b"v1", "doc.txt", Some(Backend::Versioned)).await;

        let payload = VersionPayload::new(b"v2", Some("from a job")).to_value().unwrap();
        let outcome = queue
            .enqueue(JobKind::CreateVersion, resource.locator.clone(), payload, JobPriority::High)
            .await
            .unwrap()
            .wait()
            .await;
        assert!(outcome.is_success(), "{:?}", outcome);
        let versioned = engine.get(&resource.locator).await.unwrap().unwrap();
        assert_eq!(versioned.version, "2");

        let outcome = queue
            .enqueue(JobKind::Process, resource.locator.clone(), serde_json::Value::Null, JobPriority::Normal)
            .await
            .unwrap()
            .wait()
            .await;
        assert!(outcome.is_success(), "{:?}", outcome);
        let processed = engine.get(&resource.locator).await.unwrap().unwrap();
        assert!(processed.backend_metadata.contains_key("processed_at"));

        let outcome = queue
            .enqueue(JobKind::Cleanup, resource.locator.clone(), serde_json::Value::Null, JobPriority::Low)
            .await
            .unwrap()
            .wait()
            .await;
        assert!(outcome.is_success(), "{:?}", outcome);
        assert!(engine.get(&resource.locator).await.unwrap().is_none());
        assert!(matches!(engine.retrieve(&resource).await, Err(Error::NotFound(_))));

        let missing = queue
            .enqueue(JobKind::Process, resource.locator.clone(), serde_json::Value::Null, JobPriority::Normal)
            .await
            .unwrap()
            .wait()
            .await;
        assert!(!missing.is_success());

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_stats() {
        let temp = TempDir::new().unwrap();
        let engine = engine_at(&temp);
        put(&engine, b"hello", "a.txt", Some(Backend::Disk)).await;
        put(&engine, b"hi", "b.txt", Some(Backend::Disk)).await;
        put(&engine, b"ram", "c.bin", Some(Backend::Memory)).await;

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.resources, 3);
        assert_eq!(stats.total_bytes, 10);
        assert_eq!(
            stats.by_backend[&Backend::Disk],
            BackendUsage { resources: 2, bytes: 7 }
        );
        assert_eq!(stats.memory.unwrap().entries, 1);
        assert!(stats.hybrid.is_some());
        assert_eq!(stats.pool.in_flight, 0);
    }

    #[tokio::test]
    async fn test_start_tiering() {
        let temp = TempDir::new().unwrap();
        let engine = engine_at(&temp);
        put(&engine, b"fresh", "f.bin", Some(Backend::Hybrid)).await;

        let scheduler = engine.start_tiering().unwrap();
        let report = scheduler.request_sweep().await.unwrap();
        // Nothing is past its hot TTL yet.
        assert_eq!(report.demoted, 0);
        scheduler.shutdown().await;

        assert!(memory_engine().start_tiering().is_none());
    }

    #[tokio::test]
    async fn test_sequential_updates_keep_the_last() {
        let engine = memory_engine();
        let resource = put(&engine, b"0", "seq.bin", Some(Backend::Memory)).await;
        for content in [&b"1"[..], b"22", b"333"] {
            engine
                .update(&resource, Bytes::copy_from_slice(content))
                .await
                .unwrap();
        }
        let record = engine.get(&resource.locator).await.unwrap().unwrap();
        assert_eq!(record.checksum, checksum(b"333"));
        assert_eq!(engine.retrieve(&record).await.unwrap(), Bytes::from_static(b"333"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_concurrent_writers_one_wins(
            contents in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..64), 2..6)
        ) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let engine = Arc::new(memory_engine());
                let resource = engine
                    .store(Bytes::from_static(b"seed"), "race.bin", Some(Backend::Memory), &StoreOptions::default())
                    .await
                    .unwrap();

                let writers: Vec<_> = contents
                    .iter()
                    .cloned()
                    .map(|content| {
                        let engine = engine.clone();
                        let resource = resource.clone();
                        tokio::spawn(async move { engine.update(&resource, Bytes::from(content)).await })
                    })
                    .collect();
                for writer in writers {
                    writer.await.unwrap().unwrap();
                }

                let stored = engine.retrieve(&resource).await.unwrap();
                let record = engine.get(&resource.locator).await.unwrap().unwrap();
                assert!(contents.iter().any(|c| c.as_slice() == stored.as_ref()));
                assert!(contents.iter().any(|c| checksum(c) == record.checksum));
                assert_eq!(record.version, resource.version);
            });
        }
    }
}
