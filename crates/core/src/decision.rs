//! Skip-or-upload decision for a single asset

use crate::hash::{ContentDigest, ETag};
use crate::remote::RemoteObjectInfo;

/// What the engine knows about an encoded artifact before probing the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFingerprint {
    /// Configured digest of the encoded bytes; the remote key
    pub digest: ContentDigest,
    /// Store-scheme ETag of the same bytes
    pub etag: ETag,
    pub size: u64,
}

/// Outcome of [`decide`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip,
    Upload,
}

/// Skip only when the store already holds an object at the key whose ETag
/// matches the ETag of the bytes we would upload now.
#[must_use]
pub fn decide(local: &ArtifactFingerprint, remote: Option<&RemoteObjectInfo>) -> Decision {
    match remote {
        Some(info) if info.etag == local.etag => Decision::Skip,
        _ => Decision::Upload,
    }
}
