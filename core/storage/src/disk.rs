//! Local filesystem storage provider.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::provider::{check_overwrite, Capabilities, Metadata, StorageProvider, Version, WriteOptions};
use tessera_common::{Backend, Error, Locator, Result};

/// Local filesystem storage provider.
///
/// Every locator resolves to `root/locator`. `create_version` is a plain
/// overwrite: no history is retained on this backend.
pub struct DiskProvider {
    root: PathBuf,
}

impl DiskProvider {
    /// Create a new disk provider with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of this provider.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a locator to a filesystem path.
    pub fn path_for(&self, locator: &Locator) -> PathBuf {
        let mut fs_path = self.root.clone();
        for segment in locator.segments() {
            fs_path.push(segment);
        }
        fs_path
    }

    fn create_metadata(&self, path: &Path, fs_meta: std::fs::Metadata) -> Metadata {
        let modified: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        let mut metadata = Metadata::new(fs_meta.len())
            .with_etag(format!("{}-{}", modified.timestamp_millis(), fs_meta.len()))
            .with_field("path", path.to_string_lossy().into_owned());
        metadata.modified = modified;
        metadata
    }

    async fn read_existing(path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove empty directories from `dir` upwards, stopping below the root.
    async fn prune_empty_parents(&self, mut dir: Option<&Path>) {
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            // remove_dir fails on non-empty directories, which ends the walk.
            if fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

#[async_trait]
impl StorageProvider for DiskProvider {
    fn name(&self) -> &str {
        "disk"
    }

    fn backend(&self) -> Backend {
        Backend::Disk
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            versioning: true,
            history: false,
        }
    }

    async fn write(
        &self,
        locator: &Locator,
        content: Bytes,
        options: &WriteOptions,
    ) -> Result<Metadata> {
        let fs_path = self.path_for(locator);

        if fs_path.is_dir() {
            return Err(Error::AlreadyExists(format!(
                "A directory exists at {}",
                locator
            )));
        }

        let existing = Self::read_existing(&fs_path).await?;
        if check_overwrite(locator, existing.as_deref(), &content, options)? {
            if let Some(parent) = fs_path.parent() {
                fs::create_dir_all(parent).await?;
            }

            // Write beside the target and rename so readers never see a
            // partially written file.
            let file_name = fs_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let tmp_path = fs_path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

            if let Err(e) = fs::write(&tmp_path, &content).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(e.into());
            }
            if let Err(e) = fs::rename(&tmp_path, &fs_path).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(e.into());
            }
            debug!("disk: wrote {} ({} bytes)", fs_path.display(), content.len());
        }

        let fs_meta = fs::metadata(&fs_path).await?;
        Ok(self.create_metadata(&fs_path, fs_meta))
    }

    async fn read(&self, locator: &Locator) -> Result<Bytes> {
        let fs_path = self.path_for(locator);

        if fs_path.is_dir() {
            return Err(Error::NotFound(format!("Content not found: {}", locator)));
        }

        match fs::read(&fs_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Content not found: {}", locator)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, locator: &Locator) -> Result<()> {
        let fs_path = self.path_for(locator);

        if fs_path.is_dir() {
            return Err(Error::Validation(format!(
                "Locator {} resolves to a directory",
                locator
            )));
        }

        match fs::remove_file(&fs_path).await {
            Ok(()) => {
                debug!("disk: deleted {}", fs_path.display());
                self.prune_empty_parents(fs_path.parent()).await;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, locator: &Locator) -> Result<bool> {
        Ok(self.path_for(locator).is_file())
    }

    async fn create_version(
        &self,
        locator: &Locator,
        content: Bytes,
        message: &str,
        options: &WriteOptions,
    ) -> Result<(Version, Metadata)> {
        // No history on disk: a new version replaces the file in place.
        let options = WriteOptions {
            force: true,
            ..options.clone()
        };
        let metadata = self.write(locator, content, &options).await?;
        let version = Version {
            version_id: metadata.etag.clone().unwrap_or_default(),
            sequence: 1,
            message: message.to_string(),
            created_at: metadata.modified,
        };
        Ok((version, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn loc(s: &str) -> Locator {
        Locator::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_disk_write_read() {
        let temp = TempDir::new().unwrap();
        let provider = DiskProvider::new(temp.path()).unwrap();
        let locator = loc("test.txt");
        let data = Bytes::from_static(b"Hello, Disk!");

        let metadata = provider
            .write(&locator, data.clone(), &WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(metadata.size, data.len() as u64);
        assert!(temp.path().join("test.txt").is_file());

        assert_eq!(provider.read(&locator).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_disk_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let provider = DiskProvider::new(temp.path()).unwrap();
        let locator = loc("a/b/c.bin");

        provider
            .write(&locator, Bytes::from_static(&[1, 2, 3]), &WriteOptions::default())
            .await
            .unwrap();

        assert!(temp.path().join("a/b/c.bin").is_file());
    }

    #[tokio::test]
    async fn test_disk_refuses_overwrite_without_force() {
        let temp = TempDir::new().unwrap();
        let provider = DiskProvider::new(temp.path()).unwrap();
        let locator = loc("doc");

        provider
            .write(&locator, Bytes::from_static(b"v1"), &WriteOptions::default())
            .await
            .unwrap();

        let result = provider
            .write(&locator, Bytes::from_static(b"v2"), &WriteOptions::default())
            .await;
        assert!(matches!(result, Err(Error::AlreadyExists(_))));

        provider
            .write(&locator, Bytes::from_static(b"v2"), &WriteOptions::forced())
            .await
            .unwrap();
        assert_eq!(provider.read(&locator).await.unwrap(), Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn test_disk_delete_missing_is_noop() {
        let temp = TempDir::new().unwrap();
        let provider = DiskProvider::new(temp.path()).unwrap();
        provider.delete(&loc("nothing/here")).await.unwrap();
    }

    #[tokio::test]
    async fn test_disk_delete_prunes_empty_dirs() {
        let temp = TempDir::new().unwrap();
        let provider = DiskProvider::new(temp.path()).unwrap();
        let locator = loc("x/y/z");

        provider
            .write(&locator, Bytes::from_static(b"data"), &WriteOptions::default())
            .await
            .unwrap();
        provider.delete(&locator).await.unwrap();

        assert!(!temp.path().join("x").exists());
        assert!(temp.path().exists());
        assert!(matches!(provider.read(&locator).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_disk_create_version_overwrites() {
        let temp = TempDir::new().unwrap();
        let provider = DiskProvider::new(temp.path()).unwrap();
        let locator = loc("doc");

        provider
            .write(&locator, Bytes::from_static(b"first"), &WriteOptions::default())
            .await
            .unwrap();
        let (version, _) = provider
            .create_version(&locator, Bytes::from_static(b"second"), "edit", &WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(version.message, "edit");
        assert_eq!(provider.read(&locator).await.unwrap(), Bytes::from_static(b"second"));
        assert!(!provider.capabilities().history);
        assert!(matches!(
            provider.list_versions(&locator).await,
            Err(Error::UnsupportedOperation(_))
        ));
    }
}
