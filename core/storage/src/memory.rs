//! In-memory storage provider.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

use crate::provider::{check_overwrite, Metadata, StorageProvider, WriteOptions};
use tessera_common::{Backend, Error, Locator, Result};

/// In-memory storage entry.
#[derive(Debug, Clone)]
struct Entry {
    data: Bytes,
    metadata: Metadata,
}

/// Size and entry-count statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    /// Number of stored entries.
    pub entries: usize,
    /// Total stored bytes.
    pub bytes: u64,
}

/// In-memory storage provider.
///
/// High-speed and volatile: all data is lost on drop. Used directly as the
/// `memory` backend and as the hot tier of the hybrid coordinator.
#[derive(Clone)]
pub struct MemoryProvider {
    storage: Arc<RwLock<HashMap<Locator, Entry>>>,
}

impl MemoryProvider {
    /// Create a new empty memory provider.
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    // A poisoned lock only means another task panicked mid-insert; the map
    // itself is still consistent.
    fn read_map(&self) -> RwLockReadGuard<'_, HashMap<Locator, Entry>> {
        self.storage.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<Locator, Entry>> {
        self.storage.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Current size statistics.
    pub fn stats(&self) -> MemoryStats {
        let storage = self.read_map();
        MemoryStats {
            entries: storage.len(),
            bytes: storage.values().map(|e| e.data.len() as u64).sum(),
        }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.write_map().clear();
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn backend(&self) -> Backend {
        Backend::Memory
    }

    async fn write(
        &self,
        locator: &Locator,
        content: Bytes,
        options: &WriteOptions,
    ) -> Result<Metadata> {
        let mut storage = self.write_map();

        let existing = storage.get(locator);
        if !check_overwrite(locator, existing.map(|e| e.data.as_ref()), &content, options)? {
            if let Some(entry) = existing {
                return Ok(entry.metadata.clone());
            }
        }

        let metadata = Metadata::new(content.len() as u64)
            .with_etag(Uuid::new_v4().to_string())
            .with_field("key", locator.as_str());

        debug!("memory: stored {} ({} bytes)", locator, content.len());
        storage.insert(
            locator.clone(),
            Entry {
                data: content,
                metadata: metadata.clone(),
            },
        );

        Ok(metadata)
    }

    async fn read(&self, locator: &Locator) -> Result<Bytes> {
        self.read_map()
            .get(locator)
            .map(|e| e.data.clone())
            .ok_or_else(|| Error::NotFound(format!("Content not found: {}", locator)))
    }

    async fn delete(&self, locator: &Locator) -> Result<()> {
        if self.write_map().remove(locator).is_some() {
            debug!("memory: deleted {}", locator);
        }
        Ok(())
    }

    async fn exists(&self, locator: &Locator) -> Result<bool> {
        Ok(self.read_map().contains_key(locator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(s: &str) -> Locator {
        Locator::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_write_read() {
        let provider = MemoryProvider::new();
        let locator = loc("test.txt");
        let data = Bytes::from_static(b"Hello, World!");

        provider
            .write(&locator, data.clone(), &WriteOptions::default())
            .await
            .unwrap();
        let read = provider.read(&locator).await.unwrap();

        assert_eq!(read, data);
    }

    #[tokio::test]
    async fn test_read_missing() {
        let provider = MemoryProvider::new();
        let result = provider.read(&loc("missing")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_exists_and_delete() {
        let provider = MemoryProvider::new();
        let locator = loc("test.txt");

        assert!(!provider.exists(&locator).await.unwrap());
        provider
            .write(&locator, Bytes::from_static(&[1, 2, 3]), &WriteOptions::default())
            .await
            .unwrap();
        assert!(provider.exists(&locator).await.unwrap());

        provider.delete(&locator).await.unwrap();
        assert!(!provider.exists(&locator).await.unwrap());

        // Deleting again is a no-op.
        provider.delete(&locator).await.unwrap();
    }

    #[tokio::test]
    async fn test_overwrite_requires_force() {
        let provider = MemoryProvider::new();
        let locator = loc("doc");
        let plain = WriteOptions::default();

        provider.write(&locator, Bytes::from_static(b"one"), &plain).await.unwrap();
        // Same bytes again is idempotent.
        provider.write(&locator, Bytes::from_static(b"one"), &plain).await.unwrap();

        let conflict = provider.write(&locator, Bytes::from_static(b"two"), &plain).await;
        assert!(matches!(conflict, Err(Error::AlreadyExists(_))));
        assert_eq!(provider.read(&locator).await.unwrap(), Bytes::from_static(b"one"));

        provider
            .write(&locator, Bytes::from_static(b"two"), &WriteOptions::forced())
            .await
            .unwrap();
        assert_eq!(provider.read(&locator).await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_stats() {
        let provider = MemoryProvider::new();
        provider
            .write(&loc("a"), Bytes::from_static(b"12345"), &WriteOptions::default())
            .await
            .unwrap();
        provider
            .write(&loc("b"), Bytes::from_static(b"123"), &WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(provider.stats(), MemoryStats { entries: 2, bytes: 8 });

        provider.delete(&loc("a")).await.unwrap();
        assert_eq!(provider.stats(), MemoryStats { entries: 1, bytes: 3 });
    }

    #[tokio::test]
    async fn test_no_versioning() {
        let provider = MemoryProvider::new();
        let result = provider
            .create_version(&loc("a"), Bytes::new(), "msg", &WriteOptions::default())
            .await;
        assert!(matches!(result, Err(Error::UnsupportedOperation(_))));
        assert!(!provider.capabilities().versioning);
    }
}
