//! webcache-core: content-addressed static asset sync
//!
//! Encodes each asset, names it by digest, asks the store whether identical
//! bytes already live under that name, uploads when they don't, and records
//! `original path -> digest` in a manifest.

pub mod config;
pub mod decision;
pub mod encode;
pub mod engine;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod remote;
pub mod scan;
pub mod upload;

pub use config::{ProbeFailurePolicy, SyncSettings, WebcacheConfig};
pub use decision::{ArtifactFingerprint, Decision, decide};
pub use encode::{EncodedArtifact, Encoding, encode};
pub use engine::{FileAction, FileReport, SyncEngine, SyncReport};
pub use error::{ConfigError, Stage, SyncError};
pub use hash::{ContentDigest, DigestAlgorithm, ETag};
pub use manifest::{Manifest, ManifestEntry};
pub use remote::{ObjectMetadata, ObjectStore, RemoteObjectInfo, StoreError};
pub use scan::{LocalFile, Scanner};
