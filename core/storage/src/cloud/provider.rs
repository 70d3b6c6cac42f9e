//! Cloud storage provider implementation.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::client::{HttpObjectStore, MemoryObjectStore, ObjectInfo, ObjectStore};
use super::CloudConfig;
use crate::provider::{check_overwrite, Capabilities, Metadata, StorageProvider, Version, WriteOptions};
use tessera_common::{Backend, Error, Locator, Result};

/// Suffix of the per-object version manifest key.
const MANIFEST_SUFFIX: &str = ".versions.json";

/// One recorded version of an object.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    /// Version marker assigned by the bucket.
    marker: String,
    sequence: u64,
    message: String,
    created_at: DateTime<Utc>,
}

/// Version history of one object, oldest first.
#[derive(Debug, Default, Serialize, Deserialize)]
struct VersionManifest {
    versions: Vec<ManifestEntry>,
}

impl VersionManifest {
    fn find(&self, version_id: &str) -> Option<&ManifestEntry> {
        let sequence = version_id
            .strip_prefix('v')
            .unwrap_or(version_id)
            .parse::<u64>()
            .ok();
        self.versions.iter().find(|entry| match sequence {
            Some(n) => entry.sequence == n,
            None => entry.marker == version_id,
        })
    }
}

/// Storage provider backed by a remote object store.
///
/// Locators map to `<prefix>/<locator>` keys. History relies on the bucket's
/// native versioning: each write records the returned version marker in a
/// JSON manifest stored beside the object.
pub struct CloudProvider {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl CloudProvider {
    /// Create a provider over an existing object store.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Option<String>) -> Self {
        Self { store, prefix }
    }

    /// Build the provider described by a cloud configuration.
    pub fn from_config(config: &CloudConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match config.endpoint {
            Some(_) => Arc::new(HttpObjectStore::new(config)?),
            None => Arc::new(MemoryObjectStore::new(config.bucket.clone())),
        };
        Ok(Self::new(store, config.prefix.clone()))
    }

    /// Object key for a locator.
    pub fn key_for(&self, locator: &Locator) -> String {
        match &self.prefix {
            Some(prefix) if !prefix.trim_matches('/').is_empty() => {
                format!("{}/{}", prefix.trim_matches('/'), locator)
            }
            _ => locator.to_string(),
        }
    }

    fn manifest_key(key: &str) -> String {
        format!("{}{}", key, MANIFEST_SUFFIX)
    }

    async fn load_manifest(&self, key: &str) -> Result<VersionManifest> {
        match self.store.get_object(&Self::manifest_key(key), None).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(Error::NotFound(_)) => Ok(VersionManifest::default()),
            Err(e) => Err(e),
        }
    }

    /// Append the marker of a fresh upload to the manifest.
    async fn record_version(&self, key: &str, info: &ObjectInfo, message: &str) -> Result<ManifestEntry> {
        let marker = info.version_id.clone().ok_or_else(|| {
            Error::UnsupportedOperation(format!(
                "Bucket {} did not return a version marker for {}",
                self.store.bucket(),
                key
            ))
        })?;

        let mut manifest = self.load_manifest(key).await?;
        let entry = ManifestEntry {
            marker,
            sequence: manifest.versions.last().map(|e| e.sequence + 1).unwrap_or(1),
            message: message.to_string(),
            created_at: info.last_modified,
        };
        manifest.versions.push(entry.clone());

        let raw = serde_json::to_vec(&manifest)?;
        self.store
            .put_object(&Self::manifest_key(key), Bytes::from(raw), Some("application/json"))
            .await?;
        Ok(entry)
    }

    fn create_metadata(&self, info: &ObjectInfo) -> Metadata {
        let mut metadata = Metadata::new(info.size)
            .with_field("bucket", self.store.bucket())
            .with_field("key", info.key.as_str());
        if let Some(etag) = &info.etag {
            metadata = metadata.with_etag(etag.as_str()).with_field("etag", etag.as_str());
        }
        if let Some(version) = &info.version_id {
            metadata = metadata.with_field("version_id", version.as_str());
        }
        metadata.modified = info.last_modified;
        metadata
    }
}

#[async_trait]
impl StorageProvider for CloudProvider {
    fn name(&self) -> &str {
        "cloud"
    }

    fn backend(&self) -> Backend {
        Backend::Cloud
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::HISTORY
    }

    async fn write(
        &self,
        locator: &Locator,
        content: Bytes,
        options: &WriteOptions,
    ) -> Result<Metadata> {
        let key = self.key_for(locator);

        if let Some(current) = self.store.head_object(&key).await? {
            let existing = self.store.get_object(&key, None).await?;
            if !check_overwrite(locator, Some(existing.as_ref()), &content, options)? {
                return Ok(self.create_metadata(&current));
            }
        }

        let info = self
            .store
            .put_object(&key, content, options.mime_type.as_deref())
            .await?;
        if info.version_id.is_some() {
            let message = options
                .message
                .clone()
                .unwrap_or_else(|| format!("Write {}", locator));
            self.record_version(&key, &info, &message).await?;
        }

        debug!("cloud: uploaded {}/{} ({} bytes)", self.store.bucket(), key, info.size);
        Ok(self.create_metadata(&info))
    }

    async fn read(&self, locator: &Locator) -> Result<Bytes> {
        self.store.get_object(&self.key_for(locator), None).await
    }

    async fn delete(&self, locator: &Locator) -> Result<()> {
        let key = self.key_for(locator);
        self.store.delete_object(&key).await?;
        self.store.delete_object(&Self::manifest_key(&key)).await?;
        debug!("cloud: deleted {}/{}", self.store.bucket(), key);
        Ok(())
    }

    async fn exists(&self, locator: &Locator) -> Result<bool> {
        Ok(self.store.head_object(&self.key_for(locator)).await?.is_some())
    }

    async fn create_version(
        &self,
        locator: &Locator,
        content: Bytes,
        message: &str,
        options: &WriteOptions,
    ) -> Result<(Version, Metadata)> {
        let key = self.key_for(locator);
        let info = self
            .store
            .put_object(&key, content, options.mime_type.as_deref())
            .await?;
        let entry = self.record_version(&key, &info, message).await?;

        info!("cloud: {} version {} ({})", key, entry.sequence, entry.marker);
        let version = Version {
            version_id: entry.marker,
            sequence: entry.sequence,
            message: entry.message,
            created_at: entry.created_at,
        };
        Ok((version, self.create_metadata(&info)))
    }

    async fn list_versions(&self, locator: &Locator) -> Result<Vec<Version>> {
        let key = self.key_for(locator);
        let manifest = self.load_manifest(&key).await?;
        if manifest.versions.is_empty() && self.store.head_object(&key).await?.is_none() {
            return Err(Error::NotFound(format!("Content not found: {}", locator)));
        }

        Ok(manifest
            .versions
            .into_iter()
            .rev()
            .map(|entry| Version {
                version_id: entry.marker,
                sequence: entry.sequence,
                message: entry.message,
                created_at: entry.created_at,
            })
            .collect())
    }

    async fn read_version(&self, locator: &Locator, version_id: &str) -> Result<Bytes> {
        let key = self.key_for(locator);
        let manifest = self.load_manifest(&key).await?;
        let marker = match manifest.find(version_id) {
            Some(entry) => entry.marker.clone(),
            None => version_id.to_string(),
        };
        self.store.get_object(&key, Some(&marker)).await
    }
}
