//! Filesystem-backed object store
//!
//! Each bucket is a directory under the store root. Object bytes live at
//! `<root>/<bucket>/<key>` and their metadata in
//! `<root>/<bucket>/.meta/<key>.json`. ETags follow the S3 single-part
//! scheme, hex MD5 of the stored bytes.

use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use webcache_core::{ETag, ObjectMetadata, ObjectStore, RemoteObjectInfo, StoreError};

const META_DIR: &str = ".meta";

/// Sidecar record written next to every object
#[derive(Debug, Serialize, Deserialize)]
struct StoredObject {
    etag: ETag,
    stored_at: DateTime<Utc>,
    metadata: ObjectMetadata,
}

/// Object store rooted at a local directory
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `root`, creating the directory if needed
    ///
    /// # Errors
    /// Returns an error if the root directory cannot be created
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of an object's bytes
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        validate_name("bucket", bucket)?;
        validate_name("key", key)?;
        Ok(self.root.join(bucket).join(key))
    }

    fn meta_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        validate_name("bucket", bucket)?;
        validate_name("key", key)?;
        Ok(self
            .root
            .join(bucket)
            .join(META_DIR)
            .join(format!("{key}.json")))
    }
}

/// Reject names that would escape the bucket directory
fn validate_name(kind: &str, name: &str) -> Result<(), StoreError> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if invalid {
        return Err(StoreError::Service {
            code: format!("Invalid{}", capitalize(kind)),
            message: format!("{kind} {name:?} is not a valid name"),
        });
    }
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars
        .next()
        .map(|c| c.to_ascii_uppercase().to_string() + chars.as_str())
        .unwrap_or_default()
}

/// Write through a uniquely named sibling temp file, then rename it over `path`
async fn write_atomic(path: PathBuf, data: Bytes) -> io::Result<()> {
    tokio::task::spawn_blocking(move || {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "object path has no parent")
        })?;
        std::fs::create_dir_all(parent)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".part")
            .tempfile_in(parent)?;
        temp.write_all(&data)?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(io::Error::other)?
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<RemoteObjectInfo>, StoreError> {
        let meta_path = self.meta_path(bucket, key)?;

        let raw = match tokio::fs::read(&meta_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no object at {bucket}/{key}");
                return Ok(None);
            }
            Err(e) => return Err(StoreError::transport(e)),
        };

        let stored: StoredObject = serde_json::from_slice(&raw).map_err(StoreError::transport)?;
        Ok(Some(RemoteObjectInfo {
            etag: stored.etag,
            content_type: Some(stored.metadata.content_type),
            content_encoding: stored.metadata.content_encoding,
            content_length: stored.metadata.content_length,
            last_modified: Some(stored.stored_at),
        }))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: ObjectMetadata,
    ) -> Result<(), StoreError> {
        let object_path = self.object_path(bucket, key)?;
        let meta_path = self.meta_path(bucket, key)?;

        if metadata.content_length != body.len() as u64 {
            return Err(StoreError::Service {
                code: "BadDigest".to_string(),
                message: format!(
                    "content length {} does not match body of {} bytes",
                    metadata.content_length,
                    body.len()
                ),
            });
        }

        let stored = StoredObject {
            etag: ETag::from_bytes(&body),
            stored_at: Utc::now(),
            metadata,
        };
        let sidecar = serde_json::to_vec_pretty(&stored).map_err(StoreError::transport)?;

        // Bytes first: a sidecar never points at missing content
        let size = body.len();
        write_atomic(object_path, body)
            .await
            .map_err(StoreError::transport)?;
        write_atomic(meta_path, Bytes::from(sidecar))
            .await
            .map_err(StoreError::transport)?;

        debug!("stored {bucket}/{key} ({size} bytes, etag {})", stored.etag);
        Ok(())
    }
}
