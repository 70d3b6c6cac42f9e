//! Storage provider trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tessera_common::{Backend, BackendMetadata, Error, Locator, Result};

/// Metadata returned by a provider for a stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// ETag or revision ID.
    pub etag: Option<String>,
    /// Provider-specific metadata (path, object key, commit id, ...).
    pub provider_data: BackendMetadata,
}

impl Metadata {
    /// Create metadata for `size` bytes written now.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            modified: Utc::now(),
            etag: None,
            provider_data: BackendMetadata::new(),
        }
    }

    /// Set the etag.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Add a provider-specific field.
    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.provider_data.insert(key.to_string(), value.into());
        self
    }
}

/// Options for write and versioning calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    /// Overwrite existing content that differs from the new content.
    #[serde(default)]
    pub force: bool,
    /// Mime type hint forwarded to backends that store it.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Message recorded by history-keeping backends.
    #[serde(default)]
    pub message: Option<String>,
}

impl WriteOptions {
    /// Options that overwrite existing content.
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    /// Set the mime type hint.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Set the history message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A version recorded by a versioning backend. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Backend-specific version identifier (commit id, object version marker, ...).
    pub version_id: String,
    /// 1-based position in the artifact's history.
    pub sequence: u64,
    /// Message supplied when the version was created.
    pub message: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// What a provider can do beyond plain read/write/delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// `create_version` is implemented.
    pub versioning: bool,
    /// Older versions stay readable after a new one is created.
    pub history: bool,
}

impl Capabilities {
    /// Plain read/write/delete only.
    pub const BASIC: Self = Self {
        versioning: false,
        history: false,
    };

    /// Versioning with retained history.
    pub const HISTORY: Self = Self {
        versioning: true,
        history: true,
    };
}

/// Storage provider trait implemented by every backend.
///
/// Operations on different locators are independent and may run
/// concurrently. Operations on the same locator are not serialized by the
/// provider: concurrent writers race and the last one wins.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get the provider name (e.g., "disk", "memory", "cloud").
    fn name(&self) -> &str;

    /// Backend kind implemented by this provider.
    fn backend(&self) -> Backend;

    /// Optional operations this provider implements.
    fn capabilities(&self) -> Capabilities {
        Capabilities::BASIC
    }

    /// Store content under a locator.
    ///
    /// # Postconditions
    /// - Reading the locator returns `content` unchanged
    /// - Retrying with the same locator and content succeeds
    ///
    /// # Errors
    /// - `AlreadyExists` if different content is stored and `options.force` is false
    /// - I/O or network errors
    async fn write(&self, locator: &Locator, content: Bytes, options: &WriteOptions)
        -> Result<Metadata>;

    /// Read the content stored under a locator.
    ///
    /// # Errors
    /// - `NotFound` if nothing is stored
    async fn read(&self, locator: &Locator) -> Result<Bytes>;

    /// Delete the content stored under a locator. Absent content is a no-op.
    async fn delete(&self, locator: &Locator) -> Result<()>;

    /// Check whether content is stored under a locator.
    async fn exists(&self, locator: &Locator) -> Result<bool>;

    /// Store a new version of the content.
    ///
    /// Only available when [`Capabilities::versioning`] is set.
    async fn create_version(
        &self,
        locator: &Locator,
        _content: Bytes,
        _message: &str,
        _options: &WriteOptions,
    ) -> Result<(Version, Metadata)> {
        Err(unsupported(self.name(), "create_version", locator))
    }

    /// List versions, newest first.
    async fn list_versions(&self, locator: &Locator) -> Result<Vec<Version>> {
        Err(unsupported(self.name(), "list_versions", locator))
    }

    /// Read the content of one historical version.
    async fn read_version(&self, locator: &Locator, _version_id: &str) -> Result<Bytes> {
        Err(unsupported(self.name(), "read_version", locator))
    }
}

fn unsupported(provider: &str, operation: &str, locator: &Locator) -> Error {
    Error::UnsupportedOperation(format!(
        "{} backend does not support {} (locator {})",
        provider, operation, locator
    ))
}

/// Resolve a write against content already stored under the locator.
///
/// Returns `Ok(true)` when the write should proceed, `Ok(false)` when the
/// stored bytes already equal the new content.
pub(crate) fn check_overwrite(
    locator: &Locator,
    existing: Option<&[u8]>,
    content: &[u8],
    options: &WriteOptions,
) -> Result<bool> {
    match existing {
        None => Ok(true),
        Some(current) if current == content => Ok(false),
        Some(_) if options.force => Ok(true),
        Some(_) => Err(Error::AlreadyExists(format!(
            "Content already exists for {}",
            locator
        ))),
    }
}
