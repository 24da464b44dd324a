//! Pushing an encoded artifact to the store

use chrono::{DateTime, Months, Utc};
use tracing::{info, warn};

use crate::encode::EncodedArtifact;
use crate::error::SyncError;
use crate::hash::ContentDigest;
use crate::remote::{ObjectMetadata, ObjectStore};
use crate::scan::LocalFile;

/// Keys never change content, so caches may keep them for ten years
pub const CACHE_CONTROL: &str = "public, s-maxage=315360000, max-age=315360000";

/// How far in the future the `Expires` header points
pub const EXPIRES_AFTER_MONTHS: u32 = 120;

/// Result of a successful [`upload`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// The artifact was gone by the time we read it
    Vanished,
}

/// Render a timestamp as an RFC 1123 HTTP date
#[must_use]
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Metadata for uploading `artifact`, the encoded form of `source`
#[must_use]
pub fn object_metadata(
    source: &LocalFile,
    artifact: &EncodedArtifact,
    now: DateTime<Utc>,
) -> ObjectMetadata {
    let expires = now
        .checked_add_months(Months::new(EXPIRES_AFTER_MONTHS))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    ObjectMetadata {
        content_length: artifact.size(),
        content_type: source.media_type.clone(),
        content_encoding: artifact.encoding().content_encoding().map(str::to_string),
        content_disposition: format!("filename={}", source.file_name()),
        cache_control: CACHE_CONTROL.to_string(),
        expires,
        last_modified: Some(DateTime::<Utc>::from(source.modified)),
    }
}

/// Upload `artifact` under `key`.
///
/// # Errors
/// Returns [`SyncError::Upload`] if the store rejects the object or cannot be
/// reached, and [`SyncError::Encoding`] if the artifact exists but cannot be
/// read. A missing artifact is not an error; see [`UploadOutcome::Vanished`].
pub async fn upload(
    store: &dyn ObjectStore,
    bucket: &str,
    source: &LocalFile,
    artifact: &EncodedArtifact,
    key: &ContentDigest,
) -> Result<UploadOutcome, SyncError> {
    let body = match tokio::fs::read(artifact.path()).await {
        Ok(bytes) => bytes::Bytes::from(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                path = %source.path.display(),
                artifact = %artifact.path().display(),
                "encoded artifact disappeared before upload, skipping"
            );
            return Ok(UploadOutcome::Vanished);
        }
        Err(e) => {
            return Err(SyncError::Encoding {
                path: source.path.clone(),
                source: e,
            });
        }
    };

    let metadata = object_metadata(source, artifact, Utc::now());
    info!(
        "uploading {} to {bucket}/{key} ({}, {} bytes)",
        source.relative, metadata.content_type, metadata.content_length
    );

    store
        .put_object(bucket, key.as_str(), body, metadata)
        .await
        .map_err(|e| SyncError::Upload {
            path: source.path.clone(),
            key: key.clone(),
            source: e,
        })?;

    Ok(UploadOutcome::Uploaded)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::TimeZone as _;

    use super::*;
    use crate::encode::{Encoding, encode};
    use crate::hash::DigestAlgorithm;
    use crate::remote::{RemoteObjectInfo, StoreError};

    #[derive(Default)]
    struct RecordingStore {
        puts: Mutex<Vec<(String, String, Bytes, ObjectMetadata)>>,
        reject: bool,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn head_object(
            &self,
            _bucket: &str,
            _key: &str,
        ) -> Result<Option<RemoteObjectInfo>, StoreError> {
            Ok(None)
        }

        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            body: Bytes,
            metadata: ObjectMetadata,
        ) -> Result<(), StoreError> {
            if self.reject {
                return Err(StoreError::Service {
                    code: "AccessDenied".to_string(),
                    message: "no".to_string(),
                });
            }
            self.puts
                .lock()
                .unwrap()
                .push((bucket.to_string(), key.to_string(), body, metadata));
            Ok(())
        }
    }

    fn asset(dir: &std::path::Path, name: &str, content: &str) -> LocalFile {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        LocalFile::from_path(dir, &path).unwrap()
    }

    #[test]
    fn test_http_date() {
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(http_date(time), "Mon, 01 Jan 2024 00:00:00 GMT");
    }

    #[test]
    fn test_metadata_for_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let file = asset(dir.path(), "a.css", "body{}");
        filetime::set_file_mtime(&file.path, filetime::FileTime::from_unix_time(1_704_067_200, 0))
            .unwrap();
        let file = LocalFile::from_path(dir.path(), &file.path).unwrap();
        let artifact = encode(&file.path, Encoding::Gzip, &dir.path().join("tmp")).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let metadata = object_metadata(&file, &artifact, now);

        assert_eq!(metadata.content_length, artifact.size());
        assert_eq!(metadata.content_type, "text/css");
        assert_eq!(metadata.content_encoding.as_deref(), Some("gzip"));
        assert_eq!(metadata.content_disposition, "filename=a.css");
        assert_eq!(metadata.cache_control, CACHE_CONTROL);
        assert_eq!(http_date(metadata.expires), "Thu, 01 Jun 2034 12:00:00 GMT");
        assert_eq!(
            metadata.last_modified,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_metadata_for_plain_has_no_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let file = asset(dir.path(), "b.js", "x=1;");
        let artifact = encode(&file.path, Encoding::Plain, dir.path()).unwrap();

        let metadata = object_metadata(&file, &artifact, Utc::now());
        assert_eq!(metadata.content_encoding, None);
        assert_eq!(metadata.content_length, 4);
    }

    #[tokio::test]
    async fn test_upload_sends_encoded_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let file = asset(dir.path(), "a.css", "body{}");
        let artifact = encode(&file.path, Encoding::Gzip, &dir.path().join("tmp")).unwrap();
        let key = DigestAlgorithm::Sha256.digest_file(artifact.path()).unwrap();
        let store = RecordingStore::default();

        let outcome = upload(&store, "assets", &file, &artifact, &key).await.unwrap();
        assert_eq!(outcome, UploadOutcome::Uploaded);

        let puts = store.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        let (bucket, put_key, body, _) = &puts[0];
        assert_eq!(bucket, "assets");
        assert_eq!(put_key, key.as_str());
        assert_eq!(body.as_ref(), std::fs::read(artifact.path()).unwrap().as_slice());
    }

    #[tokio::test]
    async fn test_vanished_artifact_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let file = asset(dir.path(), "b.js", "x=1;");
        let artifact = encode(&file.path, Encoding::Plain, dir.path()).unwrap();
        let key = DigestAlgorithm::Sha256.digest_file(artifact.path()).unwrap();
        std::fs::remove_file(&file.path).unwrap();

        let store = RecordingStore::default();
        let outcome = upload(&store, "assets", &file, &artifact, &key).await.unwrap();
        assert_eq!(outcome, UploadOutcome::Vanished);
        assert!(store.puts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_upload_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = asset(dir.path(), "b.js", "x=1;");
        let artifact = encode(&file.path, Encoding::Plain, dir.path()).unwrap();
        let key = DigestAlgorithm::Sha256.digest_file(artifact.path()).unwrap();
        let store = RecordingStore {
            reject: true,
            ..RecordingStore::default()
        };

        let err = upload(&store, "assets", &file, &artifact, &key)
            .await
            .unwrap_err();
        match err {
            SyncError::Upload { source, .. } => assert!(source.is_service()),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
