//! webcache configuration file parsing (webcache.toml) and validation

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::encode::Encoding;
use crate::error::ConfigError;
use crate::hash::DigestAlgorithm;

/// Config file name
pub const CONFIG_FILE: &str = "webcache.toml";

/// Domain appended to the bucket name when no host name is configured
pub const DEFAULT_STORE_DOMAIN: &str = "s3.amazonaws.com";

/// Raw configuration as written by the user; validated by [`WebcacheConfig::validate`]
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct WebcacheConfig {
    /// Target bucket
    pub bucket: Option<String>,
    /// Host the manifest is keyed by; `<bucket>.s3.amazonaws.com` when empty
    pub host_name: Option<String>,
    /// `plain` or `gzip`
    pub encoding: String,
    /// `md5`, `sha1`, `sha256`, `sha384` or `sha512`
    pub digest: String,
    /// Directory holding the static assets
    pub assets_root: PathBuf,
    /// Where gzip output is staged before upload
    pub scratch_dir: PathBuf,
    /// Manifest output path
    pub manifest: PathBuf,
    /// Globs to process; everything when empty
    pub include: Vec<String>,
    /// Globs to skip
    pub exclude: Vec<String>,
    /// Files processed concurrently
    pub jobs: usize,
    /// `abort` or `skip`
    pub on_probe_error: String,
}

impl Default for WebcacheConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            host_name: None,
            encoding: "gzip".to_string(),
            digest: "sha256".to_string(),
            assets_root: PathBuf::from("src/main/webapp"),
            scratch_dir: PathBuf::from("target/webcache/tmp"),
            manifest: PathBuf::from("target/webcache/webcache.json"),
            include: Vec::new(),
            exclude: vec!["WEB-INF/**".to_string(), "META-INF/**".to_string()],
            jobs: 4,
            on_probe_error: "abort".to_string(),
        }
    }
}

/// What to do when a metadata probe fails for a reason other than "not found"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeFailurePolicy {
    /// Stop the run; no manifest is written
    #[default]
    Abort,
    /// Log, leave the file out of the manifest, keep going
    Skip,
}

impl FromStr for ProbeFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            _ => Err(ConfigError::UnknownProbePolicy {
                value: s.to_string(),
            }),
        }
    }
}

/// Validated settings the engine runs with
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub bucket: String,
    pub host_name: String,
    pub encoding: Encoding,
    pub digest: DigestAlgorithm,
    pub assets_root: PathBuf,
    pub scratch_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub jobs: usize,
    pub on_probe_error: ProbeFailurePolicy,
}

impl SyncSettings {
    /// Settings with defaults for everything but the bucket and paths
    #[must_use]
    pub fn new(bucket: impl Into<String>, assets_root: impl Into<PathBuf>) -> Self {
        let bucket = bucket.into();
        let defaults = WebcacheConfig::default();
        Self {
            host_name: default_host_name(&bucket),
            bucket,
            encoding: Encoding::default(),
            digest: DigestAlgorithm::default(),
            assets_root: assets_root.into(),
            scratch_dir: defaults.scratch_dir,
            manifest_path: defaults.manifest,
            include: Vec::new(),
            exclude: defaults.exclude,
            jobs: defaults.jobs,
            on_probe_error: ProbeFailurePolicy::default(),
        }
    }
}

fn default_host_name(bucket: &str) -> String {
    format!("{bucket}.{DEFAULT_STORE_DOMAIN}")
}

impl WebcacheConfig {
    /// Load config from a directory.
    ///
    /// Returns default config if webcache.toml doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load_file(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from an explicit file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every option once, before any file is touched
    ///
    /// # Errors
    /// Returns the first invalid option found.
    pub fn validate(self) -> Result<SyncSettings, ConfigError> {
        let bucket = self
            .bucket
            .filter(|b| !b.trim().is_empty())
            .ok_or(ConfigError::MissingBucket)?;
        let host_name = self
            .host_name
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| default_host_name(&bucket));
        let encoding = self.encoding.parse()?;
        let digest = self.digest.parse()?;
        let on_probe_error = self.on_probe_error.parse()?;
        if self.jobs == 0 {
            return Err(ConfigError::ZeroJobs);
        }

        Ok(SyncSettings {
            bucket,
            host_name,
            encoding,
            digest,
            assets_root: self.assets_root,
            scratch_dir: self.scratch_dir,
            manifest_path: self.manifest,
            include: self.include,
            exclude: self.exclude,
            jobs: self.jobs,
            on_probe_error,
        })
    }
}
