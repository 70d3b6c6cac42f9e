//! Object store clients.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use super::CloudConfig;
use tessera_common::{Error, Result};

/// Header carrying the object version marker.
const VERSION_HEADER: &str = "x-amz-version-id";

/// Key segment characters left unescaped (RFC 3986 unreserved).
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Description of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    /// Version marker assigned by a versioned bucket.
    pub version_id: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// Remote object store boundary.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket this store writes to.
    fn bucket(&self) -> &str;

    /// Upload an object, returning the stored object's description.
    async fn put_object(&self, key: &str, body: Bytes, content_type: Option<&str>)
        -> Result<ObjectInfo>;

    /// Download an object, or one specific version of it.
    ///
    /// # Errors
    /// - `NotFound` if the key (or version) does not exist
    async fn get_object(&self, key: &str, version_id: Option<&str>) -> Result<Bytes>;

    /// Describe the latest version of an object, `None` if absent.
    async fn head_object(&self, key: &str) -> Result<Option<ObjectInfo>>;

    /// Remove an object. Absent keys are a no-op.
    async fn delete_object(&self, key: &str) -> Result<()>;
}

/// Client for an S3-compatible endpoint using path-style addressing.
pub struct HttpObjectStore {
    http: Client,
    endpoint: Url,
    bucket: String,
    token: Option<String>,
}

impl HttpObjectStore {
    /// Create a client from the cloud configuration.
    ///
    /// # Errors
    /// - `Validation` if no endpoint is configured
    /// - `Network` if the HTTP client cannot be built
    pub fn new(config: &CloudConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| Error::Validation("Cloud endpoint is not configured".to_string()))?;

        let http = Client::builder()
            .user_agent("Tessera/0.1")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            bucket: config.bucket.clone(),
            token: config.token.clone(),
        })
    }

    /// URL of an object: `{endpoint}/{bucket}/{key}` with escaped key segments.
    pub fn object_url(&self, key: &str) -> Result<Url> {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT).to_string())
            .collect();
        let raw = format!(
            "{}/{}/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            utf8_percent_encode(&self.bucket, KEY_SEGMENT),
            encoded.join("/")
        );
        Url::parse(&raw).map_err(|e| Error::Validation(format!("Invalid object URL {}: {}", raw, e)))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn check(response: Response, key: &str, operation: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status == StatusCode::NOT_FOUND {
            Err(Error::NotFound(format!("Object not found: {}", key)))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Network(format!(
                "{} {} failed: {} - {}",
                operation, key, status, body
            )))
        }
    }

    fn info_from_headers(key: &str, response: &Response, fallback_size: u64) -> ObjectInfo {
        let headers = response.headers();
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };

        ObjectInfo {
            key: key.to_string(),
            size: text(header::CONTENT_LENGTH.as_str())
                .and_then(|v| v.parse().ok())
                .unwrap_or(fallback_size),
            etag: text(header::ETAG.as_str()).map(|v| v.trim_matches('"').to_string()),
            version_id: text(VERSION_HEADER),
            last_modified: text(header::LAST_MODIFIED.as_str())
                .and_then(|v| DateTime::parse_from_rfc2822(&v).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<ObjectInfo> {
        let size = body.len() as u64;
        let request = self
            .http
            .put(self.object_url(key)?)
            .header(
                header::CONTENT_TYPE,
                content_type.unwrap_or("application/octet-stream"),
            )
            .body(body);

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload {}: {}", key, e)))?;
        let response = Self::check(response, key, "PUT").await?;

        // PUT responses carry no body length; report what was sent.
        let mut info = Self::info_from_headers(key, &response, size);
        info.size = size;
        Ok(info)
    }

    async fn get_object(&self, key: &str, version_id: Option<&str>) -> Result<Bytes> {
        let mut request = self.http.get(self.object_url(key)?);
        if let Some(version) = version_id {
            request = request.query(&[("versionId", version)]);
        }

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to download {}: {}", key, e)))?;
        let response = Self::check(response, key, "GET").await?;

        response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read {}: {}", key, e)))
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectInfo>> {
        let response = self
            .authorize(self.http.head(self.object_url(key)?))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to stat {}: {}", key, e)))?;

        match Self::check(response, key, "HEAD").await {
            Ok(response) => Ok(Some(Self::info_from_headers(key, &response, 0))),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let response = self
            .authorize(self.http.delete(self.object_url(key)?))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to delete {}: {}", key, e)))?;

        match Self::check(response, key, "DELETE").await {
            Ok(_) | Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    version_id: String,
    data: Bytes,
    stored_at: DateTime<Utc>,
}

/// In-process versioned bucket.
///
/// Every put keeps the previous versions; delete drops the key with all of
/// its versions.
pub struct MemoryObjectStore {
    bucket: String,
    objects: RwLock<HashMap<String, Vec<StoredObject>>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Number of versions stored for a key.
    pub fn version_count(&self, key: &str) -> usize {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn info(key: &str, object: &StoredObject) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: object.data.len() as u64,
            etag: Some(tessera_common::checksum(&object.data)),
            version_id: Some(object.version_id.clone()),
            last_modified: object.stored_at,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        _content_type: Option<&str>,
    ) -> Result<ObjectInfo> {
        let object = StoredObject {
            version_id: Uuid::new_v4().simple().to_string(),
            data: body,
            stored_at: Utc::now(),
        };
        let info = Self::info(key, &object);

        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.to_string())
            .or_default()
            .push(object);
        Ok(info)
    }

    async fn get_object(&self, key: &str, version_id: Option<&str>) -> Result<Bytes> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        let versions = objects
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", key)))?;

        let found = match version_id {
            Some(version) => versions.iter().find(|o| o.version_id == version),
            None => versions.last(),
        };
        found
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("Object version not found: {}", key)))
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectInfo>> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        Ok(objects
            .get(key)
            .and_then(|versions| versions.last())
            .map(|o| Self::info(key, o)))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}
