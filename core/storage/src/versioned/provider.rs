//! Versioned storage provider.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::objects::{Commit, LooseObjects, ObjectKind};
use super::refs::{HeadState, ObjectId, RefManager};
use crate::provider::{check_overwrite, Capabilities, Metadata, StorageProvider, Version, WriteOptions};
use tessera_common::{Backend, Error, Locator, Result};

const REPO_SUFFIX: &str = ".repo";
const DEFAULT_BRANCH: &str = "main";

/// One locator's repository: references plus loose objects.
struct Repository {
    root: PathBuf,
    refs: RefManager,
    objects: LooseObjects,
}

impl Repository {
    fn open(root: PathBuf) -> Self {
        Self {
            refs: RefManager::new(&root),
            objects: LooseObjects::new(&root),
            root,
        }
    }

    fn init(&self) -> Result<()> {
        self.refs.init()?;
        if self.refs.current_branch().is_err() {
            self.refs.set_head(DEFAULT_BRANCH)?;
        }
        Ok(())
    }

    /// Commit HEAD resolves to, if any.
    fn head(&self) -> Result<Option<(ObjectId, Commit)>> {
        match self.refs.read_head() {
            Ok(id) => {
                let commit = self.load_commit(&id)?;
                Ok(Some((id, commit)))
            }
            // Fresh repository (branch not born yet) or no repository at all.
            Err(Error::DetachedHeadInvalid(_)) | Err(Error::RefNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn load_commit(&self, id: &ObjectId) -> Result<Commit> {
        let body = self.objects.read(id, ObjectKind::Commit)?;
        let body = String::from_utf8(body)
            .map_err(|_| Error::Serialization(format!("Commit {} is not UTF-8", id)))?;
        Commit::decode(&body)
    }

    fn read_blob(&self, commit: &Commit) -> Result<Bytes> {
        Ok(Bytes::from(self.objects.read(&commit.blob, ObjectKind::Blob)?))
    }

    /// Store `content` as a new commit on top of HEAD and advance the refs.
    fn commit(&self, content: &[u8], message: &str) -> Result<(ObjectId, Commit)> {
        let parent = self.head()?;
        let blob = self.objects.write(ObjectKind::Blob, content)?;
        let commit = Commit {
            blob,
            sequence: parent.as_ref().map(|(_, c)| c.sequence + 1).unwrap_or(1),
            parent: parent.map(|(id, _)| id),
            created: Utc::now(),
            message: message.to_string(),
        };
        let id = self.objects.write(ObjectKind::Commit, commit.encode().as_bytes())?;

        match self.refs.current_branch()? {
            HeadState::Branch(branch) => {
                self.refs.update_ref(&format!("heads/{}", branch), id.as_str())?
            }
            HeadState::Detached(_) => self.refs.set_head_detached(id.as_str())?,
        }
        self.refs
            .update_ref(&format!("tags/v{}", commit.sequence), id.as_str())?;

        Ok((id, commit))
    }

    /// Resolve a commit id, `v<n>` tag or bare sequence number.
    fn resolve_version(&self, version_id: &str) -> Result<ObjectId> {
        let sequence = version_id
            .strip_prefix('v')
            .unwrap_or(version_id)
            .parse::<u64>()
            .ok();

        match sequence {
            Some(n) => self
                .refs
                .read_ref(&format!("tags/v{}", n))
                .map_err(|e| match e {
                    Error::RefNotFound(_) => {
                        Error::NotFound(format!("Version not found: {}", version_id))
                    }
                    other => other,
                }),
            None => ObjectId::parse(version_id),
        }
    }

    fn metadata(&self, id: &ObjectId, commit: &Commit, size: u64) -> Metadata {
        let mut metadata = Metadata::new(size)
            .with_etag(id.as_str())
            .with_field("repository", self.root.to_string_lossy().into_owned())
            .with_field("commit", id.as_str())
            .with_field("blob", commit.blob.as_str())
            .with_field("tag", format!("v{}", commit.sequence));
        if let Ok(HeadState::Branch(branch)) = self.refs.current_branch() {
            metadata = metadata.with_field("branch", branch);
        }
        metadata.modified = commit.created;
        metadata
    }
}

fn to_version(id: &ObjectId, commit: &Commit) -> Version {
    Version {
        version_id: id.to_string(),
        sequence: commit.sequence,
        message: commit.message.clone(),
        created_at: commit.created,
    }
}

/// Storage provider keeping full commit-style history per locator.
///
/// Each locator owns a repository at `root/<locator>.repo` with git-format
/// references (`HEAD`, `refs/heads/*`, `refs/tags/v<n>`) and loose objects.
/// Every version is a full snapshot; there is no diffing or merging.
pub struct VersionedProvider {
    root: PathBuf,
}

impl VersionedProvider {
    /// Create a provider storing repositories under `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            fs::create_dir_all(&root)?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Repository directory backing a locator.
    pub fn repository_path(&self, locator: &Locator) -> PathBuf {
        let mut path = self.root.clone();
        let mut segments = locator.segments().peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_some() {
                path.push(segment);
            } else {
                path.push(format!("{}{}", segment, REPO_SUFFIX));
            }
        }
        path
    }

    /// Reference manager of a locator's repository.
    pub fn refs(&self, locator: &Locator) -> RefManager {
        RefManager::new(self.repository_path(locator))
    }

    /// Run blocking repository work off the async executor.
    async fn blocking<T, F>(&self, locator: &Locator, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Repository) -> Result<T> + Send + 'static,
    {
        let repo = Repository::open(self.repository_path(locator));
        tokio::task::spawn_blocking(move || work(repo))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }
}

#[async_trait]
impl StorageProvider for VersionedProvider {
    fn name(&self) -> &str {
        "versioned"
    }

    fn backend(&self) -> Backend {
        Backend::Versioned
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
        let owned = locator.clone();
        let options = options.clone();
        self.blocking(locator, move |repo| {
            let locator = owned;
            repo.init()?;
            let size = content.len() as u64;

            if let Some((id, head)) = repo.head()? {
                let current = repo.read_blob(&head)?;
                if !check_overwrite(&locator, Some(current.as_ref()), &content, &options)? {
                    return Ok(repo.metadata(&id, &head, size));
                }
            }

            let message = options
                .message
                .clone()
                .unwrap_or_else(|| format!("Write {}", locator));
            let (id, commit) = repo.commit(&content, &message)?;
            debug!("versioned: {} at {} (v{})", locator, id, commit.sequence);
            Ok(repo.metadata(&id, &commit, size))
        })
        .await
    }

    async fn read(&self, locator: &Locator) -> Result<Bytes> {
        let owned = locator.clone();
        self.blocking(locator, move |repo| match repo.head()? {
            Some((_, head)) => repo.read_blob(&head),
            None => Err(Error::NotFound(format!("Content not found: {}", owned))),
        })
        .await
    }

    async fn delete(&self, locator: &Locator) -> Result<()> {
        let repo_path = self.repository_path(locator);
        match tokio::fs::remove_dir_all(&repo_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        debug!("versioned: deleted repository {}", repo_path.display());

        let mut dir = repo_path.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            if tokio::fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
        Ok(())
    }

    async fn exists(&self, locator: &Locator) -> Result<bool> {
        self.blocking(locator, |repo| Ok(repo.head()?.is_some())).await
    }

    async fn create_version(
        &self,
        locator: &Locator,
        content: Bytes,
        message: &str,
        _options: &WriteOptions,
    ) -> Result<(Version, Metadata)> {
        let message = message.to_string();
        let (version, metadata) = self
            .blocking(locator, move |repo| {
                repo.init()?;
                let (id, commit) = repo.commit(&content, &message)?;
                let metadata = repo.metadata(&id, &commit, content.len() as u64);
                Ok((to_version(&id, &commit), metadata))
            })
            .await?;

        info!(
            "versioned: {} advanced to v{} ({})",
            locator, version.sequence, version.version_id
        );
        Ok((version, metadata))
    }

    async fn list_versions(&self, locator: &Locator) -> Result<Vec<Version>> {
        let owned = locator.clone();
        self.blocking(locator, move |repo| {
            let Some((mut id, mut commit)) = repo.head()? else {
                return Err(Error::NotFound(format!("Content not found: {}", owned)));
            };

            let mut versions = vec![to_version(&id, &commit)];
            while let Some(parent) = commit.parent.clone() {
                commit = repo.load_commit(&parent)?;
                id = parent;
                versions.push(to_version(&id, &commit));
            }
            Ok(versions)
        })
        .await
    }

    async fn read_version(&self, locator: &Locator, version_id: &str) -> Result<Bytes> {
        let version_id = version_id.to_string();
        self.blocking(locator, move |repo| {
            let id = repo.resolve_version(&version_id)?;
            let commit = repo.load_commit(&id)?;
            repo.read_blob(&commit)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn loc(s: &str) -> Locator {
        Locator::parse(s).unwrap()
    }

    fn setup() -> (TempDir, VersionedProvider) {
        let temp = TempDir::new().unwrap();
        let provider = VersionedProvider::new(temp.path()).unwrap();
        (temp, provider)
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let (temp, provider) = setup();
        let locator = loc("notes/today.md");

        let metadata = provider
            .write(&locator, Bytes::from_static(b"# Today\n"), &WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(metadata.provider_data["tag"], "v1");
        assert_eq!(metadata.provider_data["branch"], "main");

        assert_eq!(
            provider.read(&locator).await.unwrap(),
            Bytes::from_static(b"# Today\n")
        );
        assert!(temp.path().join("notes/today.md.repo/HEAD").is_file());
        assert!(provider.exists(&locator).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_missing() {
        let (_temp, provider) = setup();
        assert!(matches!(
            provider.read(&loc("ghost")).await,
            Err(Error::NotFound(_))
        ));
        assert!(!provider.exists(&loc("ghost")).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_overwrite_rules() {
        let (_temp, provider) = setup();
        let locator = loc("doc");
        let plain = WriteOptions::default();

        provider.write(&locator, Bytes::from_static(b"a"), &plain).await.unwrap();
        provider.write(&locator, Bytes::from_static(b"a"), &plain).await.unwrap();
        assert_eq!(provider.list_versions(&locator).await.unwrap().len(), 1);

        assert!(matches!(
            provider.write(&locator, Bytes::from_static(b"b"), &plain).await,
            Err(Error::AlreadyExists(_))
        ));

        provider
            .write(&locator, Bytes::from_static(b"b"), &WriteOptions::forced())
            .await
            .unwrap();
        assert_eq!(provider.list_versions(&locator).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_versions_keep_history() {
        let (_temp, provider) = setup();
        let locator = loc("doc");

        provider
            .write(&locator, Bytes::from_static(b"one"), &WriteOptions::default())
            .await
            .unwrap();
        let (v2, metadata) = provider
            .create_version(&locator, Bytes::from_static(b"two"), "second", &WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(v2.sequence, 2);
        assert_eq!(v2.message, "second");
        assert_eq!(metadata.provider_data["commit"], v2.version_id.as_str());

        let versions = provider.list_versions(&locator).await.unwrap();
        assert_eq!(
            versions.iter().map(|v| v.sequence).collect::<Vec<_>>(),
            vec![2, 1]
        );

        assert_eq!(provider.read(&locator).await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(
            provider.read_version(&locator, "v1").await.unwrap(),
            Bytes::from_static(b"one")
        );
        assert_eq!(
            provider.read_version(&locator, "2").await.unwrap(),
            Bytes::from_static(b"two")
        );
        assert_eq!(
            provider.read_version(&locator, &versions[1].version_id).await.unwrap(),
            Bytes::from_static(b"one")
        );
        assert!(matches!(
            provider.read_version(&locator, "v9").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_refs_track_versions() {
        let (_temp, provider) = setup();
        let locator = loc("doc");

        provider
            .write(&locator, Bytes::from_static(b"one"), &WriteOptions::default())
            .await
            .unwrap();
        let (v2, _) = provider
            .create_version(&locator, Bytes::from_static(b"two"), "m", &WriteOptions::default())
            .await
            .unwrap();

        let refs = provider.refs(&locator);
        assert_eq!(refs.list_branches().unwrap(), vec!["main"]);
        assert_eq!(refs.list_tags().unwrap(), vec!["v1", "v2"]);
        assert_eq!(refs.read_head().unwrap().as_str(), v2.version_id);
    }

    #[tokio::test]
    async fn test_detached_head_versions() {
        let (_temp, provider) = setup();
        let locator = loc("doc");

        provider
            .write(&locator, Bytes::from_static(b"one"), &WriteOptions::default())
            .await
            .unwrap();
        let refs = provider.refs(&locator);
        let first = refs.read_head().unwrap();
        refs.set_head_detached(first.as_str()).unwrap();

        let (v2, _) = provider
            .create_version(&locator, Bytes::from_static(b"two"), "m", &WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(
            refs.current_branch().unwrap(),
            HeadState::Detached(ObjectId::parse(&v2.version_id).unwrap())
        );
        // The branch stays where it was.
        assert_eq!(refs.read_ref("heads/main").unwrap(), first);
    }

    #[tokio::test]
    async fn test_delete_removes_repository() {
        let (temp, provider) = setup();
        let locator = loc("deep/nested/doc");

        provider
            .write(&locator, Bytes::from_static(b"x"), &WriteOptions::default())
            .await
            .unwrap();
        provider.delete(&locator).await.unwrap();

        assert!(!temp.path().join("deep").exists());
        assert!(matches!(provider.read(&locator).await, Err(Error::NotFound(_))));
        provider.delete(&locator).await.unwrap();
    }
}
