//! Remote object storage backend.
//!
//! [`CloudProvider`] maps locators to object keys and delegates to an
//! [`ObjectStore`]: either [`HttpObjectStore`] for an S3-compatible endpoint
//! or [`MemoryObjectStore`] for tests and single-node setups.

mod client;
mod provider;

pub use client::{HttpObjectStore, MemoryObjectStore, ObjectInfo, ObjectStore};
pub use provider::CloudProvider;

use serde::{Deserialize, Serialize};
use url::Url;

/// Connection settings for the cloud backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfig {
    /// S3-compatible endpoint. `None` selects the in-process store.
    #[serde(default)]
    pub endpoint: Option<Url>,
    /// Bucket name.
    pub bucket: String,
    /// Key prefix prepended to every locator.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Bearer token sent with every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl CloudConfig {
    /// In-process bucket with the given name.
    pub fn in_memory(bucket: impl Into<String>) -> Self {
        Self {
            endpoint: None,
            bucket: bucket.into(),
            prefix: None,
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}
