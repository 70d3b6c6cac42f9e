//! Storage resources: the metadata record describing one stored artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tessera_common::{Backend, BackendMetadata, Locator};

/// Version label given to freshly stored content.
pub const INITIAL_VERSION: &str = "1";

/// Metadata record for one stored artifact.
///
/// `checksum` and `file_size` always describe the content last written
/// through the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageResource {
    pub locator: Locator,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: u64,
    /// SHA-256 of the content, lowercase hex.
    pub checksum: String,
    pub version: String,
    pub backend: Backend,
    /// Provider-owned fields plus engine annotations (`last_error`, `processed_at`).
    pub backend_metadata: BackendMetadata,
    pub is_versioned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StorageResource {
    /// Version label following the current one.
    pub fn next_version(&self) -> String {
        match self.version.parse::<u64>() {
            Ok(n) => (n + 1).to_string(),
            Err(_) => format!("{}.1", self.version),
        }
    }

    /// Merge provider fields into `backend_metadata`, overwriting same keys.
    pub fn merge_backend_metadata(&mut self, fields: BackendMetadata) {
        self.backend_metadata.extend(fields);
    }

    /// Last failure recorded on this resource.
    pub fn last_error(&self) -> Option<&serde_json::Value> {
        self.backend_metadata.get("last_error")
    }
}

/// Assembles a [`StorageResource`] from the shared fields and whatever the
/// provider returned.
pub struct StorageResourceBuilder {
    resource: StorageResource,
}

impl StorageResourceBuilder {
    pub fn new(locator: Locator, file_name: impl Into<String>, backend: Backend) -> Self {
        let now = Utc::now();
        Self {
            resource: StorageResource {
                locator,
                file_name: file_name.into(),
                mime_type: crate::select::DEFAULT_MIME.to_string(),
                file_size: 0,
                checksum: String::new(),
                version: INITIAL_VERSION.to_string(),
                backend,
                backend_metadata: BackendMetadata::new(),
                is_versioned: false,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.resource.mime_type = mime_type.into();
        self
    }

    /// Size and checksum of `content`.
    pub fn content(mut self, content: &[u8]) -> Self {
        self.resource.file_size = content.len() as u64;
        self.resource.checksum = tessera_common::checksum(content);
        self
    }

    pub fn backend_metadata(mut self, fields: BackendMetadata) -> Self {
        self.resource.merge_backend_metadata(fields);
        self
    }

    pub fn versioned(mut self, is_versioned: bool) -> Self {
        self.resource.is_versioned = is_versioned;
        self
    }

    pub fn build(self) -> StorageResource {
        self.resource
    }
}

/// Filter for metadata queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFilter {
    pub backend: Option<Backend>,
    /// Matches when the mime type starts with this prefix (`"text/"`).
    pub mime_prefix: Option<String>,
    /// Case-sensitive substring of the file name.
    pub name_contains: Option<String>,
    pub versioned: Option<bool>,
    /// Maximum number of records, oldest first.
    pub limit: Option<usize>,
}

impl ResourceFilter {
    /// Match every record.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_mime_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.mime_prefix = Some(prefix.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `resource` passes every set criterion. `limit` is not applied.
    pub fn matches(&self, resource: &StorageResource) -> bool {
        self.backend.map_or(true, |b| resource.backend == b)
            && self
                .mime_prefix
                .as_deref()
                .map_or(true, |p| resource.mime_type.starts_with(p))
            && self
                .name_contains
                .as_deref()
                .map_or(true, |n| resource.file_name.contains(n))
            && self.versioned.map_or(true, |v| resource.is_versioned == v)
    }
}
