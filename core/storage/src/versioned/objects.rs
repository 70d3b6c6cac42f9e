//! Loose object storage for the versioned backend.
//!
//! Objects are addressed the way git addresses them: the id of an object of
//! kind `k` with body `b` is `SHA1("<k> <len(b)>\0" + b)`, and the object is
//! stored at `objects/<first 2 hex>/<remaining 38 hex>`. Files hold the
//! header and body uncompressed.

use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::refs::ObjectId;
use tessera_common::{Error, Result};

/// Directory holding objects inside a repository root.
pub const OBJECTS_DIR: &str = "objects";

/// Object kinds stored by the versioned backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Commit,
}

impl ObjectKind {
    fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Commit => "commit",
        }
    }
}

fn header(kind: ObjectKind, len: usize) -> String {
    format!("{} {}\0", kind.as_str(), len)
}

/// Compute the git object id of `body`.
pub fn hash_object(kind: ObjectKind, body: &[u8]) -> ObjectId {
    let mut hasher = Sha1::new();
    hasher.update(header(kind, body.len()).as_bytes());
    hasher.update(body);
    ObjectId::from_digest(hasher.finalize().as_slice())
}

/// Content-addressed object directory of one repository.
#[derive(Debug, Clone)]
pub struct LooseObjects {
    dir: PathBuf,
}

impl LooseObjects {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            dir: repo_root.join(OBJECTS_DIR),
        }
    }

    fn path_for(&self, id: &ObjectId) -> PathBuf {
        let hex = id.as_str().to_ascii_lowercase();
        let (fanout, rest) = hex.split_at(2);
        self.dir.join(fanout).join(rest)
    }

    /// Store an object and return its id. Existing objects are left as is.
    pub fn write(&self, kind: ObjectKind, body: &[u8]) -> Result<ObjectId> {
        let id = hash_object(kind, body);
        let path = self.path_for(&id);
        if path.is_file() {
            return Ok(id);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut raw = header(kind, body.len()).into_bytes();
        raw.extend_from_slice(body);

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &raw)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(id)
    }

    /// Read the body of an object, checking its kind and length.
    ///
    /// # Errors
    /// - `NotFound` if the object is missing
    /// - `Serialization` if the stored header does not match
    pub fn read(&self, id: &ObjectId, kind: ObjectKind) -> Result<Vec<u8>> {
        let raw = match fs::read(self.path_for(id)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("Object not found: {}", id)))
            }
            Err(e) => return Err(e.into()),
        };

        let corrupt = || Error::Serialization(format!("Corrupt object {}", id));
        let nul = raw.iter().position(|b| *b == 0).ok_or_else(corrupt)?;
        let expected = header(kind, raw.len() - nul - 1);
        if raw[..=nul] != *expected.as_bytes() {
            return Err(corrupt());
        }
        Ok(raw[nul + 1..].to_vec())
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.path_for(id).is_file()
    }
}

/// One version of an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub blob: ObjectId,
    pub parent: Option<ObjectId>,
    pub sequence: u64,
    pub created: DateTime<Utc>,
    pub message: String,
}

impl Commit {
    /// Text body of the commit object.
    pub fn encode(&self) -> String {
        let mut body = format!("blob {}\n", self.blob);
        if let Some(parent) = &self.parent {
            body.push_str(&format!("parent {}\n", parent));
        }
        body.push_str(&format!("sequence {}\n", self.sequence));
        body.push_str(&format!("created {}\n", self.created.to_rfc3339()));
        body.push('\n');
        body.push_str(&self.message);
        body
    }

    pub fn decode(body: &str) -> Result<Self> {
        let invalid = |what: &str| Error::Serialization(format!("Invalid commit: {}", what));

        let (headers, message) = body.split_once("\n\n").ok_or_else(|| invalid("no message"))?;

        let mut blob = None;
        let mut parent = None;
        let mut sequence = None;
        let mut created = None;
        for line in headers.lines() {
            let (key, value) = line.split_once(' ').ok_or_else(|| invalid(line))?;
            match key {
                "blob" => blob = Some(ObjectId::parse(value)?),
                "parent" => parent = Some(ObjectId::parse(value)?),
                "sequence" => {
                    sequence = Some(value.parse::<u64>().map_err(|_| invalid("sequence"))?)
                }
                "created" => {
                    created = Some(
                        DateTime::parse_from_rfc3339(value)
                            .map_err(|_| invalid("created"))?
                            .with_timezone(&Utc),
                    )
                }
                _ => {}
            }
        }

        Ok(Self {
            blob: blob.ok_or_else(|| invalid("missing blob"))?,
            parent,
            sequence: sequence.ok_or_else(|| invalid("missing sequence"))?,
            created: created.ok_or_else(|| invalid("missing created"))?,
            message: message.to_string(),
        })
    }
}
