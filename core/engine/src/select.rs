//! Backend selection heuristics and mime handling.

use serde::{Deserialize, Serialize};

use tessera_common::{Backend, Error, Result};

/// Fallback mime type for unknown content.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Size thresholds driving backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Non-text content above this size goes to the cloud backend.
    pub large_object_threshold: u64,
    /// Text content up to this size goes to the versioned backend.
    pub small_text_threshold: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            large_object_threshold: 16 * 1024 * 1024,
            small_text_threshold: 1024 * 1024,
        }
    }
}

/// Caller hints for selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionHints {
    /// Explicit backend; always wins.
    pub backend: Option<Backend>,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

impl SelectionHints {
    /// Hints derived from a file name.
    pub fn for_file(file_name: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            ..Self::default()
        }
    }

    /// Mime type from the explicit hint, else the file extension.
    pub fn resolved_mime(&self) -> String {
        match (&self.mime_type, &self.file_name) {
            (Some(mime), _) => mime.clone(),
            (None, Some(name)) => mime_for_name(name).to_string(),
            (None, None) => DEFAULT_MIME.to_string(),
        }
    }
}

/// Pick the backend for `size` bytes of `mime` content.
///
/// Deterministic for identical inputs. `cloud_available` tells whether the
/// cloud backend is configured; without it large objects go to disk.
pub fn choose_backend(
    size: u64,
    mime: &str,
    explicit: Option<Backend>,
    config: &SelectionConfig,
    cloud_available: bool,
) -> Backend {
    if let Some(backend) = explicit {
        return backend;
    }

    let text = is_text_mime(mime);
    if size > config.large_object_threshold && !text {
        if cloud_available {
            Backend::Cloud
        } else {
            Backend::Disk
        }
    } else if size <= config.small_text_threshold && text {
        Backend::Versioned
    } else {
        Backend::Disk
    }
}

/// Whether a mime type denotes human-editable text.
pub fn is_text_mime(mime: &str) -> bool {
    let essence = mime
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    essence.starts_with("text/")
        || essence.ends_with("+json")
        || essence.ends_with("+xml")
        || matches!(
            essence.as_str(),
            "application/json"
                | "application/xml"
                | "application/javascript"
                | "application/toml"
                | "application/x-yaml"
                | "application/yaml"
                | "application/x-sh"
                | "application/sql"
        )
}

/// Check that a mime type is `type/subtype` with optional parameters.
///
/// # Errors
/// - `Validation` on any malformed part
pub fn validate_mime(mime: &str) -> Result<()> {
    let malformed = || Error::Validation(format!("Malformed mime type: {:?}", mime));

    let mut parts = mime.split(';');
    let essence = parts.next().unwrap_or_default().trim();
    let (kind, subtype) = essence.split_once('/').ok_or_else(malformed)?;
    if !is_token(kind) || !is_token(subtype) {
        return Err(malformed());
    }

    for param in parts {
        let (name, value) = param.trim().split_once('=').ok_or_else(malformed)?;
        if !is_token(name.trim()) || value.trim().is_empty() {
            return Err(malformed());
        }
    }
    Ok(())
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$&-^_.+".contains(c))
}

/// Mime type guessed from a file extension.
pub fn mime_for_name(file_name: &str) -> &'static str {
    let extension = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => return DEFAULT_MIME,
    };

    match extension.as_str() {
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "rs" => "text/x-rust",
        "py" => "text/x-python",
        "c" | "h" => "text/x-c",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        "sh" => "application/x-sh",
        "sql" => "application/sql",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "wasm" => "application/wasm",
        _ => DEFAULT_MIME,
    }
}
