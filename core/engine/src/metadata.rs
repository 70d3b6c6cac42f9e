//! Persistence of storage resource records.
//!
//! [`MemoryMetadataStore`] keeps records in process; [`SqliteMetadataStore`]
//! keeps them in a single SQLite table next to the data root.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

use crate::resource::{ResourceFilter, StorageResource};
use tessera_common::{BackendMetadata, Error, Locator, Result};

/// Store of [`StorageResource`] records keyed by locator.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Record for `locator`, if any.
    async fn get(&self, locator: &Locator) -> Result<Option<StorageResource>>;

    /// Insert or replace the record for `resource.locator`.
    async fn put(&self, resource: &StorageResource) -> Result<()>;

    /// Remove a record. Returns whether one existed.
    async fn remove(&self, locator: &Locator) -> Result<bool>;

    /// Records passing `filter`, oldest first.
    async fn query(&self, filter: &ResourceFilter) -> Result<Vec<StorageResource>>;
}

/// In-process metadata store.
#[derive(Default)]
pub struct MemoryMetadataStore {
    records: RwLock<HashMap<Locator, StorageResource>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(&self, locator: &Locator) -> Result<Option<StorageResource>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(locator).cloned())
    }

    async fn put(&self, resource: &StorageResource) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(resource.locator.clone(), resource.clone());
        Ok(())
    }

    async fn remove(&self, locator: &Locator) -> Result<bool> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        Ok(records.remove(locator).is_some())
    }

    async fn query(&self, filter: &ResourceFilter) -> Result<Vec<StorageResource>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut matched: Vec<StorageResource> = records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| (a.created_at, &a.locator).cmp(&(b.created_at, &b.locator)));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

const COLUMNS: &str = "locator, file_name, mime_type, file_size, checksum, version, backend, \
                       backend_metadata, is_versioned, created_at, updated_at";

/// SQLite-backed metadata store.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Create or open a metadata database.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(db_error)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS resources (
                locator TEXT PRIMARY KEY,
                file_name TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                checksum TEXT NOT NULL,
                version TEXT NOT NULL,
                backend TEXT NOT NULL,
                backend_metadata TEXT NOT NULL,
                is_versioned INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_resources_backend ON resources(backend);
            CREATE INDEX IF NOT EXISTS idx_resources_created ON resources(created_at);
            "#,
        )
        .map_err(db_error)?;

        info!("Metadata store opened at {}", db_path.as_ref().display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn get(&self, locator: &Locator) -> Result<Option<StorageResource>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM resources WHERE locator = ?1", COLUMNS),
                [locator.as_str()],
                RawRow::from_row,
            )
            .optional()
            .map_err(db_error)?;
        row.map(RawRow::into_resource).transpose()
    }

    async fn put(&self, resource: &StorageResource) -> Result<()> {
        debug!("Upserting record: {}", resource.locator);
        let backend_metadata = serde_json::to_string(&resource.backend_metadata)?;
        self.conn()
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO resources ({}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    COLUMNS
                ),
                params![
                    resource.locator.as_str(),
                    resource.file_name,
                    resource.mime_type,
                    resource.file_size as i64,
                    resource.checksum,
                    resource.version,
                    resource.backend.as_str(),
                    backend_metadata,
                    resource.is_versioned as i32,
                    timestamp(&resource.created_at),
                    timestamp(&resource.updated_at),
                ],
            )
            .map_err(db_error)?;
        Ok(())
    }

    async fn remove(&self, locator: &Locator) -> Result<bool> {
        debug!("Deleting record: {}", locator);
        let removed = self
            .conn()
            .execute("DELETE FROM resources WHERE locator = ?1", [locator.as_str()])
            .map_err(db_error)?;
        Ok(removed > 0)
    }

    async fn query(&self, filter: &ResourceFilter) -> Result<Vec<StorageResource>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(backend) = filter.backend {
            values.push(Value::Text(backend.as_str().to_string()));
            clauses.push(format!("backend = ?{}", values.len()));
        }
        if let Some(prefix) = &filter.mime_prefix {
            values.push(Value::Text(prefix.clone()));
            clauses.push(format!("instr(mime_type, ?{}) = 1", values.len()));
        }
        if let Some(fragment) = &filter.name_contains {
            values.push(Value::Text(fragment.clone()));
            clauses.push(format!("instr(file_name, ?{}) > 0", values.len()));
        }
        if let Some(versioned) = filter.versioned {
            values.push(Value::Integer(versioned as i64));
            clauses.push(format!("is_versioned = ?{}", values.len()));
        }

        let mut sql = format!("SELECT {} FROM resources", COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at, locator");
        if let Some(limit) = filter.limit {
            values.push(Value::Integer(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
        }

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql).map_err(db_error)?;
        let rows = stmt
            .query_map(params_from_iter(values), RawRow::from_row)
            .map_err(db_error)?;

        let mut resources = Vec::new();
        for row in rows {
            resources.push(row.map_err(db_error)?.into_resource()?);
        }
        Ok(resources)
    }
}

/// Column values as stored, before domain validation.
struct RawRow {
    locator: String,
    file_name: String,
    mime_type: String,
    file_size: i64,
    checksum: String,
    version: String,
    backend: String,
    backend_metadata: String,
    is_versioned: i32,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            locator: row.get(0)?,
            file_name: row.get(1)?,
            mime_type: row.get(2)?,
            file_size: row.get(3)?,
            checksum: row.get(4)?,
            version: row.get(5)?,
            backend: row.get(6)?,
            backend_metadata: row.get(7)?,
            is_versioned: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_resource(self) -> Result<StorageResource> {
        let backend_metadata: BackendMetadata = serde_json::from_str(&self.backend_metadata)?;
        Ok(StorageResource {
            locator: Locator::parse(self.locator)?,
            file_name: self.file_name,
            mime_type: self.mime_type,
            file_size: u64::try_from(self.file_size)
                .map_err(|_| Error::Database(format!("Negative file size {}", self.file_size)))?,
            checksum: self.checksum,
            version: self.version,
            backend: self.backend.parse()?,
            backend_metadata,
            is_versioned: self.is_versioned != 0,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

// Fixed-width so lexical order matches time order.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| Error::Database(format!("Bad timestamp {:?}: {}", value, e)))
}

fn db_error(err: rusqlite::Error) -> Error {
    Error::Database(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::StorageResourceBuilder;
    use chrono::Duration;
    use tempfile::TempDir;
    use tessera_common::Backend;

    fn resource(name: &str, backend: Backend, mime: &str, offset_secs: i64) -> StorageResource {
        let mut resource = StorageResourceBuilder::new(Locator::generate(), name, backend)
            .mime_type(mime)
            .content(name.as_bytes())
            .versioned(backend == Backend::Versioned)
            .build();
        resource.created_at += Duration::seconds(offset_secs);
        resource
            .backend_metadata
            .insert("path".into(), format!("/data/{}", name).into());
        resource
    }

    fn stores() -> Vec<Box<dyn MetadataStore>> {
        vec![
            Box::new(MemoryMetadataStore::new()),
            Box::new(SqliteMetadataStore::in_memory().unwrap()),
        ]
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        for store in stores() {
            let record = resource("a.txt", Backend::Disk, "text/plain", 0);
            assert!(store.get(&record.locator).await.unwrap().is_none());

            store.put(&record).await.unwrap();
            assert_eq!(store.get(&record.locator).await.unwrap(), Some(record.clone()));

            let mut updated = record.clone();
            updated.version = "2".into();
            store.put(&updated).await.unwrap();
            assert_eq!(store.get(&record.locator).await.unwrap().unwrap().version, "2");

            assert!(store.remove(&record.locator).await.unwrap());
            assert!(!store.remove(&record.locator).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        for store in stores() {
            let old = resource("notes.md", Backend::Versioned, "text/markdown", -60);
            let mid = resource("photo.png", Backend::Disk, "image/png", -30);
            let new = resource("todo.txt", Backend::Disk, "text/plain", 0);
            for r in [&new, &old, &mid] {
                store.put(r).await.unwrap();
            }

            let all = store.query(&ResourceFilter::all()).await.unwrap();
            let names: Vec<_> = all.iter().map(|r| r.file_name.as_str()).collect();
            assert_eq!(names, vec!["notes.md", "photo.png", "todo.txt"]);

            let text = store
                .query(&ResourceFilter::all().with_mime_prefix("text/"))
                .await
                .unwrap();
            assert_eq!(text.len(), 2);

            let disk = store
                .query(&ResourceFilter::all().with_backend(Backend::Disk).with_limit(1))
                .await
                .unwrap();
            assert_eq!(disk, vec![mid.clone()]);

            let versioned = store
                .query(&ResourceFilter {
                    versioned: Some(true),
                    ..ResourceFilter::default()
                })
                .await
                .unwrap();
            assert_eq!(versioned, vec![old.clone()]);

            let named = store
                .query(&ResourceFilter {
                    name_contains: Some("do".into()),
                    ..ResourceFilter::default()
                })
                .await
                .unwrap();
            assert_eq!(named, vec![new.clone()]);
        }
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_opens() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("metadata.db");
        let record = resource("kept.bin", Backend::Memory, "application/octet-stream", 0);

        SqliteMetadataStore::open(&path).unwrap().put(&record).await.unwrap();

        let reopened = SqliteMetadataStore::open(&path).unwrap();
        assert_eq!(reopened.get(&record.locator).await.unwrap(), Some(record));
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let early = Utc::now();
        let late = early + Duration::nanoseconds(1);
        assert!(timestamp(&early) < timestamp(&late));
        assert_eq!(parse_timestamp(&timestamp(&early)).unwrap(), early);
    }
}
