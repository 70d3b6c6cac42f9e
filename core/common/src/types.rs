//! Common types used throughout Tessera.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::{Error, Result};

/// Provider-owned metadata attached to a stored artifact.
pub type BackendMetadata = serde_json::Map<String, serde_json::Value>;

/// Maximum accepted locator length in bytes.
pub const MAX_LOCATOR_LEN: usize = 512;

static LOCATOR_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Opaque identifier addressing one stored artifact across backends.
///
/// A locator is independent of content and backend. It can only be obtained
/// through [`Locator::generate`] or [`Locator::parse`], so every value in
/// circulation is valid for provider dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locator(String);

impl Locator {
    /// Generate a fresh locator.
    ///
    /// The random UUID makes cross-process collisions negligible, and the
    /// process-wide sequence suffix guarantees no two calls in one process
    /// ever return the same value.
    pub fn generate() -> Self {
        let seq = LOCATOR_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}-{:x}", Uuid::new_v4().simple(), seq))
    }

    /// Parse and validate a caller-supplied locator.
    ///
    /// # Errors
    /// - Empty or longer than [`MAX_LOCATOR_LEN`]
    /// - Absolute path, backslash or control characters
    /// - A `/` separated segment that is empty, `.` or `..`
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::Validation("Locator cannot be empty".to_string()));
        }
        if value.len() > MAX_LOCATOR_LEN {
            return Err(Error::Validation(format!(
                "Locator exceeds {} bytes",
                MAX_LOCATOR_LEN
            )));
        }
        if value.starts_with('/') {
            return Err(Error::Validation(format!(
                "Locator cannot be an absolute path: {}",
                value
            )));
        }
        if value.contains('\\') || value.chars().any(|c| c.is_control()) {
            return Err(Error::Validation(format!(
                "Locator contains forbidden characters: {:?}",
                value
            )));
        }
        for segment in value.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(Error::Validation(format!(
                    "Locator has an invalid segment: {}",
                    value
                )));
            }
        }
        Ok(Self(value))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments of the locator.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Locator {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> Self {
        locator.0
    }
}

impl FromStr for Locator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Storage backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Filesystem under a configured root.
    Disk,
    /// Process-local volatile map.
    Memory,
    /// Commit-style history tracked by references.
    Versioned,
    /// Remote object store with native versioning.
    Cloud,
    /// Hot/cold tiering over the other backends.
    Hybrid,
}

impl Backend {
    /// All backend kinds.
    pub const ALL: [Backend; 5] = [
        Backend::Disk,
        Backend::Memory,
        Backend::Versioned,
        Backend::Cloud,
        Backend::Hybrid,
    ];

    /// Lowercase name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Disk => "disk",
            Backend::Memory => "memory",
            Backend::Versioned => "versioned",
            Backend::Cloud => "cloud",
            Backend::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disk" => Ok(Backend::Disk),
            "memory" => Ok(Backend::Memory),
            "versioned" => Ok(Backend::Versioned),
            "cloud" => Ok(Backend::Cloud),
            "hybrid" => Ok(Backend::Hybrid),
            other => Err(Error::Validation(format!("Unknown backend: {}", other))),
        }
    }
}

/// SHA-256 checksum of content as lowercase hex.
pub fn checksum(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
