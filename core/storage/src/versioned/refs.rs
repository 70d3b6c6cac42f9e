//! Git-compatible reference storage.
//!
//! References are small text files under `<root>/refs/`, byte-compatible with
//! git's loose refs:
//!
//! - direct reference: 40 hex characters followed by `\n`
//! - symbolic reference: `ref: <target-name>\n`
//! - `HEAD` lives at `<root>/HEAD` and takes either form
//!
//! Names may be given fully qualified (`refs/heads/main`) or short
//! (`heads/main`); `refs/` is prefixed only when absent.
//!
//! There is no locking protocol: concurrent `update_ref` calls on the same
//! reference race and the last rename wins.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use tessera_common::{Error, Result};

/// Name of the HEAD file inside a repository root.
pub const HEAD_FILE: &str = "HEAD";
/// Directory holding all references.
pub const REFS_DIR: &str = "refs";
/// Prefix of branch references.
pub const HEADS_PREFIX: &str = "refs/heads/";
/// Prefix of tag references.
pub const TAGS_PREFIX: &str = "refs/tags/";

const SYMREF_PREFIX: &str = "ref: ";
const LOCK_SUFFIX: &str = ".lock";
/// Same limit git applies when peeling symbolic references.
const MAX_SYMREF_DEPTH: usize = 5;

/// A 40-character hex SHA-1 object id. Case is preserved as given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(String);

impl ObjectId {
    /// Hex length of a SHA-1 id.
    pub const HEX_LEN: usize = 40;

    /// Parse a SHA-1 hex string.
    ///
    /// # Errors
    /// - `InvalidSha1` unless the value is exactly 40 hex characters
    pub fn parse(value: &str) -> Result<Self> {
        if Self::is_valid(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(Error::InvalidSha1(format!(
                "expected {} hex characters, got {:?}",
                Self::HEX_LEN,
                value
            )))
        }
    }

    /// Whether `value` is exactly 40 hex characters (either case).
    pub fn is_valid(value: &str) -> bool {
        value.len() == Self::HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Build an id from a raw 20-byte digest.
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    /// Get the hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

/// What HEAD currently points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadState {
    /// HEAD is `ref: refs/heads/<name>`.
    Branch(String),
    /// HEAD holds a commit id directly.
    Detached(ObjectId),
}

/// Parsed content of a reference file.
enum RefContent {
    Direct(ObjectId),
    Symbolic(String),
}

/// Reads and writes references under one repository root.
#[derive(Debug, Clone)]
pub struct RefManager {
    root: PathBuf,
}

impl RefManager {
    /// Create a manager for the repository rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Repository root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create `refs/heads`, `refs/tags` and, if missing, a HEAD pointing at
    /// `refs/heads/main`.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.refs_root().join("heads"))?;
        fs::create_dir_all(self.refs_root().join("tags"))?;
        if !self.head_path().exists() {
            self.set_head("main")?;
        }
        Ok(())
    }

    /// Validate a reference name and prefix `refs/` when absent.
    ///
    /// # Errors
    /// - `Validation` for names git would reject (empty components, `..`,
    ///   leading dots, `.lock` suffix, whitespace or `~^:?*[\`)
    pub fn normalize_name(name: &str) -> Result<String> {
        let invalid = |reason: &str| {
            Error::Validation(format!("Invalid reference name {:?}: {}", name, reason))
        };

        if name.is_empty() {
            return Err(invalid("empty"));
        }
        if name.starts_with('/') || name.ends_with('/') {
            return Err(invalid("leading or trailing slash"));
        }
        if name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c))
        {
            return Err(invalid("forbidden character"));
        }
        for component in name.split('/') {
            if component.is_empty() {
                return Err(invalid("empty component"));
            }
            if component.starts_with('.') {
                return Err(invalid("component starts with '.'"));
            }
            if component.ends_with(LOCK_SUFFIX) {
                return Err(invalid("component ends with .lock"));
            }
        }
        if name.contains("..") {
            return Err(invalid("contains '..'"));
        }

        if name == REFS_DIR || name.starts_with("refs/") {
            Ok(name.to_string())
        } else {
            Ok(format!("refs/{}", name))
        }
    }

    /// Resolve a reference to its object id, following symbolic indirection.
    ///
    /// # Errors
    /// - `RefNotFound` if the reference (or any symbolic target) is missing
    /// - `InvalidRefFormat` if a file holds neither form, or the symbolic
    ///   chain is deeper than git allows
    pub fn read_ref(&self, name: &str) -> Result<ObjectId> {
        self.resolve(name, 0)
    }

    fn resolve(&self, name: &str, depth: usize) -> Result<ObjectId> {
        if depth > MAX_SYMREF_DEPTH {
            return Err(Error::InvalidRefFormat(format!(
                "symbolic reference chain too deep at {}",
                name
            )));
        }

        let normalized = Self::normalize_name(name)?;
        match self.load(&normalized)? {
            RefContent::Direct(id) => Ok(id),
            RefContent::Symbolic(target) => self.resolve(&target, depth + 1),
        }
    }

    /// Target of a symbolic reference, or `None` for a direct reference.
    pub fn read_symbolic(&self, name: &str) -> Result<Option<String>> {
        let normalized = Self::normalize_name(name)?;
        match self.load(&normalized)? {
            RefContent::Direct(_) => Ok(None),
            RefContent::Symbolic(target) => Ok(Some(target)),
        }
    }

    /// Point a reference directly at `sha1`, creating parent directories.
    ///
    /// # Errors
    /// - `InvalidSha1` unless `sha1` is exactly 40 hex characters
    pub fn update_ref(&self, name: &str, sha1: &str) -> Result<()> {
        let id = ObjectId::parse(sha1)?;
        let normalized = Self::normalize_name(name)?;
        self.write_file(&self.ref_path(&normalized), &format!("{}\n", id))?;
        debug!("refs: {} -> {}", normalized, id);
        Ok(())
    }

    /// Make `name` a symbolic reference to `target_name`.
    pub fn create_symbolic(&self, name: &str, target_name: &str) -> Result<()> {
        let normalized = Self::normalize_name(name)?;
        let target = Self::normalize_name(target_name)?;
        self.write_file(
            &self.ref_path(&normalized),
            &format!("{}{}\n", SYMREF_PREFIX, target),
        )?;
        debug!("refs: {} -> {}", normalized, target);
        Ok(())
    }

    /// Remove a reference. Absent references are a no-op.
    ///
    /// Directories emptied by the removal are pruned upwards, stopping at
    /// `refs/` and its category directories (`refs/heads`, `refs/tags`, ...).
    pub fn delete_ref(&self, name: &str) -> Result<()> {
        let normalized = Self::normalize_name(name)?;
        let path = self.ref_path(&normalized);

        match fs::remove_file(&path) {
            Ok(()) => debug!("refs: deleted {}", normalized),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let refs_root = self.refs_root();
        let mut dir = path.parent();
        while let Some(current) = dir {
            if !current.starts_with(&refs_root)
                || current == refs_root
                || current.parent() == Some(refs_root.as_path())
            {
                break;
            }
            // Fails on non-empty directories, which ends the walk.
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }

        Ok(())
    }

    /// Whether a reference file exists.
    pub fn exists(&self, name: &str) -> bool {
        Self::normalize_name(name)
            .map(|normalized| self.ref_path(&normalized).is_file())
            .unwrap_or(false)
    }

    /// List references under `refs/<kind>` (or all of `refs/` when `kind` is
    /// empty), with names relative to the listed directory, sorted.
    ///
    /// A missing directory yields an empty list.
    pub fn list_refs(&self, kind: &str) -> Result<Vec<String>> {
        let kind = kind.trim_matches('/');
        let kind = kind.strip_prefix("refs/").unwrap_or(kind);
        let base = if kind.is_empty() || kind == REFS_DIR {
            self.refs_root()
        } else {
            self.refs_root().join(kind)
        };

        let mut names = Vec::new();
        if base.is_dir() {
            Self::collect(&base, "", &mut names)?;
        }
        names.sort();
        Ok(names)
    }

    fn collect(dir: &Path, prefix: &str, names: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.ends_with(LOCK_SUFFIX) {
                continue;
            }
            let relative = if prefix.is_empty() {
                file_name
            } else {
                format!("{}/{}", prefix, file_name)
            };

            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                Self::collect(&entry.path(), &relative, names)?;
            } else if file_type.is_file() {
                names.push(relative);
            }
        }
        Ok(())
    }

    /// Branch names under `refs/heads`.
    pub fn list_branches(&self) -> Result<Vec<String>> {
        self.list_refs("heads")
    }

    /// Tag names under `refs/tags`.
    pub fn list_tags(&self) -> Result<Vec<String>> {
        self.list_refs("tags")
    }

    /// Resolve HEAD to an object id.
    ///
    /// # Errors
    /// - `RefNotFound` if there is no HEAD file
    /// - `DetachedHeadInvalid` if HEAD is symbolic and its target is missing
    /// - `InvalidHeadFormat` if HEAD holds neither form
    pub fn read_head(&self) -> Result<ObjectId> {
        match self.load_head()? {
            RefContent::Direct(id) => Ok(id),
            RefContent::Symbolic(target) => match self.read_ref(&target) {
                Err(Error::RefNotFound(_)) => Err(Error::DetachedHeadInvalid(target)),
                other => other,
            },
        }
    }

    /// Point HEAD at `refs/heads/<branch_name>`.
    pub fn set_head(&self, branch_name: &str) -> Result<()> {
        let branch = branch_name.strip_prefix(HEADS_PREFIX).unwrap_or(branch_name);
        let target = Self::normalize_name(&format!("heads/{}", branch))?;
        self.write_file(&self.head_path(), &format!("{}{}\n", SYMREF_PREFIX, target))?;
        debug!("refs: HEAD -> {}", target);
        Ok(())
    }

    /// Write a commit id directly into HEAD.
    pub fn set_head_detached(&self, sha1: &str) -> Result<()> {
        let id = ObjectId::parse(sha1)?;
        self.write_file(&self.head_path(), &format!("{}\n", id))?;
        debug!("refs: HEAD detached at {}", id);
        Ok(())
    }

    /// Branch HEAD points at, or the detached commit id.
    pub fn current_branch(&self) -> Result<HeadState> {
        match self.load_head()? {
            RefContent::Direct(id) => Ok(HeadState::Detached(id)),
            RefContent::Symbolic(target) => match target.strip_prefix(HEADS_PREFIX) {
                Some(branch) if !branch.is_empty() => Ok(HeadState::Branch(branch.to_string())),
                _ => Err(Error::InvalidHeadFormat(format!(
                    "HEAD points outside {}: {}",
                    HEADS_PREFIX, target
                ))),
            },
        }
    }

    fn refs_root(&self) -> PathBuf {
        self.root.join(REFS_DIR)
    }

    fn head_path(&self) -> PathBuf {
        self.root.join(HEAD_FILE)
    }

    fn ref_path(&self, normalized: &str) -> PathBuf {
        let mut path = self.root.clone();
        for component in normalized.split('/') {
            path.push(component);
        }
        path
    }

    fn load(&self, normalized: &str) -> Result<RefContent> {
        let raw = match fs::read(self.ref_path(normalized)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::IsADirectory => {
                return Err(Error::RefNotFound(normalized.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let content = String::from_utf8(raw)
            .map_err(|_| Error::InvalidRefFormat(format!("{} is not UTF-8", normalized)))?;

        Self::parse_content(&content).ok_or_else(|| {
            Error::InvalidRefFormat(format!("{}: {:?}", normalized, content.trim()))
        })
    }

    fn load_head(&self) -> Result<RefContent> {
        let content = match fs::read_to_string(self.head_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::RefNotFound(HEAD_FILE.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(Error::InvalidHeadFormat("HEAD is not UTF-8".to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        Self::parse_content(&content)
            .ok_or_else(|| Error::InvalidHeadFormat(format!("{:?}", content.trim())))
    }

    fn parse_content(content: &str) -> Option<RefContent> {
        let trimmed = content.trim();
        if let Some(target) = trimmed.strip_prefix(SYMREF_PREFIX) {
            let target = target.trim();
            if target.is_empty() {
                return None;
            }
            return Some(RefContent::Symbolic(target.to_string()));
        }
        ObjectId::parse(trimmed).ok().map(RefContent::Direct)
    }

    /// Write through a uniquely named `.lock` sibling, then rename into place.
    fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let lock_path = path.with_file_name(format!(
            "{}.{}{}",
            file_name,
            Uuid::new_v4().simple(),
            LOCK_SUFFIX
        ));

        fs::write(&lock_path, content.as_bytes())?;
        if let Err(e) = fs::rename(&lock_path, path) {
            let _ = fs::remove_file(&lock_path);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const SHA_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const SHA_B: &str = "0123456789abcdef0123456789abcdef01234567";

    fn setup() -> (TempDir, RefManager) {
        let temp = TempDir::new().unwrap();
        let refs = RefManager::new(temp.path());
        (temp, refs)
    }

    #[test]
    fn test_ref_round_trip() {
        let (_temp, refs) = setup();
        refs.update_ref("heads/main", SHA_B).unwrap();
        assert_eq!(refs.read_ref("heads/main").unwrap().as_str(), SHA_B);
        assert_eq!(refs.read_ref("refs/heads/main").unwrap().as_str(), SHA_B);
    }

    #[test]
    fn test_direct_ref_file_format() {
        let (temp, refs) = setup();
        refs.update_ref("heads/main", SHA_B).unwrap();
        let raw = fs::read_to_string(temp.path().join("refs/heads/main")).unwrap();
        assert_eq!(raw, format!("{}\n", SHA_B));
    }

    #[test]
    fn test_mixed_case_sha_accepted() {
        let (_temp, refs) = setup();
        let mixed = "ABCDEFabcdef0123456789ABCDEFabcdef012345";
        refs.update_ref("heads/main", mixed).unwrap();
        assert_eq!(refs.read_ref("heads/main").unwrap().as_str(), mixed);
    }

    #[test]
    fn test_symbolic_resolution() {
        let (temp, refs) = setup();
        refs.create_symbolic("heads/a", "heads/b").unwrap();
        refs.update_ref("heads/b", SHA_B).unwrap();

        assert_eq!(refs.read_ref("heads/a").unwrap().as_str(), SHA_B);
        let raw = fs::read_to_string(temp.path().join("refs/heads/a")).unwrap();
        assert_eq!(raw, "ref: refs/heads/b\n");
        assert_eq!(
            refs.read_symbolic("heads/a").unwrap().as_deref(),
            Some("refs/heads/b")
        );
        assert_eq!(refs.read_symbolic("heads/b").unwrap(), None);
    }

    #[test]
    fn test_symbolic_to_missing_target() {
        let (_temp, refs) = setup();
        refs.create_symbolic("heads/a", "heads/missing").unwrap();
        assert!(matches!(refs.read_ref("heads/a"), Err(Error::RefNotFound(_))));
    }

    #[test]
    fn test_symbolic_cycle_is_an_error() {
        let (_temp, refs) = setup();
        refs.create_symbolic("heads/a", "heads/b").unwrap();
        refs.create_symbolic("heads/b", "heads/a").unwrap();
        assert!(matches!(refs.read_ref("heads/a"), Err(Error::InvalidRefFormat(_))));
    }

    #[test]
    fn test_invalid_sha1_rejected() {
        let (_temp, refs) = setup();
        assert!(matches!(
            refs.update_ref("heads/main", "not-a-sha"),
            Err(Error::InvalidSha1(_))
        ));
        assert!(matches!(
            refs.update_ref("heads/main", &"a".repeat(39)),
            Err(Error::InvalidSha1(_))
        ));
        assert!(matches!(
            refs.update_ref("heads/main", &"a".repeat(41)),
            Err(Error::InvalidSha1(_))
        ));
        assert!(!refs.exists("heads/main"));
    }

    #[test]
    fn test_missing_ref() {
        let (_temp, refs) = setup();
        assert!(matches!(
            refs.read_ref("heads/nonexistent"),
            Err(Error::RefNotFound(_))
        ));
    }

    #[test]
    fn test_garbage_ref_content() {
        let (temp, refs) = setup();
        fs::create_dir_all(temp.path().join("refs/heads")).unwrap();
        fs::write(temp.path().join("refs/heads/bad"), "hello world\n").unwrap();
        assert!(matches!(refs.read_ref("heads/bad"), Err(Error::InvalidRefFormat(_))));
    }

    #[test]
    fn test_ref_content_tolerates_surrounding_whitespace() {
        let (temp, refs) = setup();
        fs::create_dir_all(temp.path().join("refs/heads")).unwrap();
        fs::write(temp.path().join("refs/heads/x"), format!("  {}\r\n", SHA_A)).unwrap();
        assert_eq!(refs.read_ref("heads/x").unwrap().as_str(), SHA_A);
    }

    #[test]
    fn test_invalid_names_rejected() {
        for name in ["", "heads/../x", "heads/.hidden", "heads/x.lock", "heads/a b", "heads//x", "/heads/x"] {
            assert!(
                RefManager::normalize_name(name).is_err(),
                "accepted {:?}",
                name
            );
        }
        assert_eq!(RefManager::normalize_name("heads/main").unwrap(), "refs/heads/main");
        assert_eq!(RefManager::normalize_name("refs/tags/v1").unwrap(), "refs/tags/v1");
    }

    #[test]
    fn test_delete_ref_cleans_empty_dirs() {
        let (temp, refs) = setup();
        refs.update_ref("heads/feature/x", SHA_A).unwrap();
        refs.delete_ref("heads/feature/x").unwrap();

        assert!(!temp.path().join("refs/heads/feature").exists());
        assert!(temp.path().join("refs/heads").is_dir());
        assert!(temp.path().join("refs").is_dir());
        assert!(!refs.exists("heads/feature/x"));
    }

    #[test]
    fn test_delete_ref_keeps_non_empty_dirs() {
        let (temp, refs) = setup();
        refs.update_ref("heads/feature/x", SHA_A).unwrap();
        refs.update_ref("heads/feature/y", SHA_A).unwrap();
        refs.delete_ref("heads/feature/x").unwrap();

        assert!(temp.path().join("refs/heads/feature").is_dir());
        assert!(refs.exists("heads/feature/y"));
    }

    #[test]
    fn test_delete_missing_ref_is_ok() {
        let (_temp, refs) = setup();
        refs.delete_ref("heads/ghost").unwrap();
    }

    #[test]
    fn test_list_refs() {
        let (_temp, refs) = setup();
        assert!(refs.list_refs("heads").unwrap().is_empty());

        refs.update_ref("heads/main", SHA_A).unwrap();
        refs.update_ref("heads/feature/x", SHA_A).unwrap();
        refs.update_ref("tags/v1", SHA_B).unwrap();

        assert_eq!(refs.list_branches().unwrap(), vec!["feature/x", "main"]);
        assert_eq!(refs.list_tags().unwrap(), vec!["v1"]);
        assert_eq!(
            refs.list_refs("").unwrap(),
            vec!["heads/feature/x", "heads/main", "tags/v1"]
        );
    }

    #[test]
    fn test_list_branches_after_fully_qualified_update() {
        let (_temp, refs) = setup();
        refs.update_ref("refs/heads/main", &"a".repeat(40)).unwrap();
        assert_eq!(refs.list_branches().unwrap(), vec!["main"]);
    }

    #[test]
    fn test_head_symbolic() {
        let (temp, refs) = setup();
        refs.set_head("main").unwrap();
        assert_eq!(
            fs::read_to_string(temp.path().join("HEAD")).unwrap(),
            "ref: refs/heads/main\n"
        );

        assert!(matches!(refs.read_head(), Err(Error::DetachedHeadInvalid(_))));

        refs.update_ref("heads/main", SHA_B).unwrap();
        assert_eq!(refs.read_head().unwrap().as_str(), SHA_B);
        assert_eq!(refs.current_branch().unwrap(), HeadState::Branch("main".into()));
    }

    #[test]
    fn test_head_detached() {
        let (temp, refs) = setup();
        refs.set_head_detached(SHA_A).unwrap();
        assert_eq!(
            fs::read_to_string(temp.path().join("HEAD")).unwrap(),
            format!("{}\n", SHA_A)
        );
        assert_eq!(refs.read_head().unwrap().as_str(), SHA_A);
        assert_eq!(
            refs.current_branch().unwrap(),
            HeadState::Detached(ObjectId::parse(SHA_A).unwrap())
        );
        assert!(matches!(refs.set_head_detached("xyz"), Err(Error::InvalidSha1(_))));
    }

    #[test]
    fn test_head_invalid_and_missing() {
        let (temp, refs) = setup();
        assert!(matches!(refs.read_head(), Err(Error::RefNotFound(_))));

        fs::write(temp.path().join("HEAD"), "garbage\n").unwrap();
        assert!(matches!(refs.read_head(), Err(Error::InvalidHeadFormat(_))));
        assert!(matches!(refs.current_branch(), Err(Error::InvalidHeadFormat(_))));

        fs::write(temp.path().join("HEAD"), "ref: refs/remotes/origin/main\n").unwrap();
        assert!(matches!(refs.current_branch(), Err(Error::InvalidHeadFormat(_))));
    }

    #[test]
    fn test_init_is_idempotent() {
        let (temp, refs) = setup();
        refs.init().unwrap();
        refs.set_head("develop").unwrap();
        refs.init().unwrap();

        assert!(temp.path().join("refs/heads").is_dir());
        assert!(temp.path().join("refs/tags").is_dir());
        assert_eq!(refs.current_branch().unwrap(), HeadState::Branch("develop".into()));
    }

    #[test]
    fn test_lock_files_are_not_listed() {
        let (temp, refs) = setup();
        refs.update_ref("heads/main", SHA_A).unwrap();
        fs::write(temp.path().join("refs/heads/stale.lock"), SHA_A).unwrap();
        assert_eq!(refs.list_branches().unwrap(), vec!["main"]);
    }

    proptest! {
        #[test]
        fn prop_update_then_read(sha in "[0-9a-fA-F]{40}", branch in "[a-z][a-z0-9_-]{0,15}") {
            let (_temp, refs) = setup();
            let name = format!("heads/{}", branch);
            refs.update_ref(&name, &sha).unwrap();
            let stored = refs.read_ref(&name).unwrap();
            prop_assert_eq!(stored.as_str(), sha.as_str());
        }

        #[test]
        fn prop_wrong_length_rejected(sha in "[0-9a-f]{0,39}|[0-9a-f]{41,60}") {
            prop_assert!(matches!(ObjectId::parse(&sha), Err(Error::InvalidSha1(_))));
        }
    }
}
