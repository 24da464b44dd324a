//! Object store seam: metadata probes and uploads
//!
//! The engine only ever needs two calls from a store, so backends implement
//! [`ObjectStore`] and everything above it stays store-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::ETag;

/// Metadata of an object that already exists in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObjectInfo {
    pub etag: ETag,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub content_length: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Headers sent along with an uploaded object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub content_length: u64,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub content_disposition: String,
    pub cache_control: String,
    pub expires: DateTime<Utc>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Failure talking to a store. "Not found" is not an error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store answered and refused the request
    #[error("store rejected the request ({code}): {message}")]
    Service { code: String, message: String },

    /// The request never got a usable answer
    #[error("store transport failed")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn transport(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Transport(err.into())
    }

    #[must_use]
    pub fn is_service(&self) -> bool {
        matches!(self, Self::Service { .. })
    }
}

/// Minimal object store client
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch metadata for `key`, or `None` if no such object exists
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<RemoteObjectInfo>, StoreError>;

    /// Store `body` under `key`, replacing any existing object
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: ObjectMetadata,
    ) -> Result<(), StoreError>;
}
