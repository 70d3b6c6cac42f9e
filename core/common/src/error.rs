//! Common error types for Tessera.

use thiserror::Error;

/// Top-level error type for Tessera operations.
///
/// Expected conditions (missing content, missing reference, bad input) are
/// always returned as values; nothing in the engine panics on them.
#[derive(Debug, Error)]
pub enum Error {
    /// Input rejected before any I/O (oversized content, malformed mime, bad locator).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The backend does not implement the requested operation.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A SHA-1 value is not exactly 40 hex characters.
    #[error("Invalid SHA-1: {0}")]
    InvalidSha1(String),

    /// A reference file has unparseable content.
    #[error("Invalid reference format: {0}")]
    InvalidRefFormat(String),

    /// The HEAD file is neither symbolic nor a direct SHA-1.
    #[error("Invalid HEAD format: {0}")]
    InvalidHeadFormat(String),

    /// Reference file does not exist.
    #[error("Reference not found: {0}")]
    RefNotFound(String),

    /// HEAD points at a reference that does not exist.
    #[error("HEAD points at a missing reference: {0}")]
    DetachedHeadInvalid(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote store operation failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Operation did not finish within its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Operation was cancelled by the caller.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Metadata persistence failed.
    #[error("Database error: {0}")]
    Database(String),
}

impl Error {
    /// Whether retrying the same call may succeed (environment failure).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Network(_) | Error::Timeout(_))
    }

    /// Whether the error is caused by bad input rather than the environment.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::InvalidSha1(_)
                | Error::InvalidRefFormat(_)
                | Error::InvalidHeadFormat(_)
        )
    }

    /// Short stable name for the variant, used when recording failures.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::UnsupportedOperation(_) => "unsupported_operation",
            Error::InvalidSha1(_) => "invalid_sha1",
            Error::InvalidRefFormat(_) => "invalid_ref_format",
            Error::InvalidHeadFormat(_) => "invalid_head_format",
            Error::RefNotFound(_) => "ref_not_found",
            Error::DetachedHeadInvalid(_) => "detached_head_invalid",
            Error::Io(_) | Error::Network(_) => "provider_io",
            Error::Timeout(_) => "timeout",
            Error::Cancelled(_) => "cancelled",
            Error::Serialization(_) => "serialization",
            Error::Database(_) => "database",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
