//! Error taxonomy for a sync run

use std::io;
use std::path::PathBuf;

use crate::hash::ContentDigest;
use crate::remote::StoreError;

/// Invalid settings, detected before any file is touched
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no bucket configured")]
    MissingBucket,

    #[error("encoding {value:?} must be one of [{accepted}]")]
    UnknownEncoding { value: String, accepted: String },

    #[error("digest {value:?} must be one of [{accepted}]")]
    UnknownDigest { value: String, accepted: String },

    #[error("probe failure policy {value:?} must be one of [abort, skip]")]
    UnknownProbePolicy { value: String },

    #[error("jobs must be at least 1")]
    ZeroJobs,

    #[error("could not read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// The pipeline step an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    Discovery,
    Encode,
    Digest,
    Probe,
    Upload,
    Manifest,
    Worker,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Configuration => "configuration",
            Self::Discovery => "discovery",
            Self::Encode => "encode",
            Self::Digest => "digest",
            Self::Probe => "metadata probe",
            Self::Upload => "upload",
            Self::Manifest => "manifest",
            Self::Worker => "worker",
        })
    }
}

/// Anything that can abort a sync run
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("could not scan {root}")]
    Discovery {
        root: PathBuf,
        #[source]
        source: ignore::Error,
    },

    #[error("could not encode {path}")]
    Encoding {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not calculate digest for {path}")]
    Digest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not retrieve object metadata for {path} (key {key})")]
    MetadataProbe {
        path: PathBuf,
        key: ContentDigest,
        #[source]
        source: StoreError,
    },

    #[error("could not upload {path} as {key}")]
    Upload {
        path: PathBuf,
        key: ContentDigest,
        #[source]
        source: StoreError,
    },

    #[error("could not write manifest {path}")]
    ManifestPersist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("sync worker failed")]
    Task(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// Which step of the pipeline failed
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Configuration(_) => Stage::Configuration,
            Self::Discovery { .. } => Stage::Discovery,
            Self::Encoding { .. } => Stage::Encode,
            Self::Digest { .. } => Stage::Digest,
            Self::MetadataProbe { .. } => Stage::Probe,
            Self::Upload { .. } => Stage::Upload,
            Self::ManifestPersist { .. } => Stage::Manifest,
            Self::Task(_) => Stage::Worker,
        }
    }

    /// The local file a per-file error refers to
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Encoding { path, .. }
            | Self::Digest { path, .. }
            | Self::MetadataProbe { path, .. }
            | Self::Upload { path, .. } => Some(path),
            _ => None,
        }
    }
}
