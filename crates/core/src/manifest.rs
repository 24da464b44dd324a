//! Manifest: original asset path -> content-addressed remote key
//!
//! Persisted as JSON:
//! ```text
//! {
//!   "host_name": "assets.s3.amazonaws.com",
//!   "files": [
//!     { "path": "css/a.css", "digest": "9f86d0..." }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::io::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::hash::ContentDigest;

/// One manifest row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub digest: ContentDigest,
}

/// Ordered path -> digest mapping for a whole run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ManifestFile", into = "ManifestFile")]
pub struct Manifest {
    host_name: String,
    entries: Vec<ManifestEntry>,
    /// path -> position in `entries`
    index: HashMap<String, usize>,
}

#[derive(Serialize, Deserialize)]
struct ManifestFile {
    host_name: String,
    files: Vec<ManifestEntry>,
}

impl From<ManifestFile> for Manifest {
    fn from(file: ManifestFile) -> Self {
        let mut manifest = Self::new(file.host_name);
        for entry in file.files {
            manifest.record(entry.path, entry.digest);
        }
        manifest
    }
}

impl From<Manifest> for ManifestFile {
    fn from(manifest: Manifest) -> Self {
        Self {
            host_name: manifest.host_name,
            files: manifest.entries,
        }
    }
}

impl Manifest {
    #[must_use]
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    #[must_use]
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Record `path -> digest`. A path recorded twice keeps its original
    /// position and takes the newer digest.
    pub fn record(&mut self, path: impl Into<String>, digest: ContentDigest) {
        let path = path.into();
        if let Some(&pos) = self.index.get(&path) {
            self.entries[pos].digest = digest;
            return;
        }
        self.index.insert(path.clone(), self.entries.len());
        self.entries.push(ManifestEntry { path, digest });
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&ContentDigest> {
        let path = path.strip_prefix('/').unwrap_or(path);
        self.index.get(path).map(|&pos| &self.entries[pos].digest)
    }

    /// Public URL a front end should serve `path` from
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<String> {
        self.get(path)
            .map(|digest| format!("https://{}/{digest}", self.host_name))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter()
    }

    /// Write the manifest to `destination`, creating parent directories.
    ///
    /// The file is replaced atomically; readers see the old manifest or the
    /// new one, never a mix.
    ///
    /// # Errors
    /// Returns [`SyncError::ManifestPersist`] if any filesystem step fails.
    pub fn persist(&self, destination: &Path) -> Result<(), SyncError> {
        let wrap = |source: std::io::Error| SyncError::ManifestPersist {
            path: destination.to_path_buf(),
            source,
        };

        let parent = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(wrap)?;

        let json = serde_json::to_vec_pretty(self).map_err(|e| wrap(e.into()))?;

        let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(wrap)?;
        temp.write_all(&json).map_err(wrap)?;
        temp.write_all(b"\n").map_err(wrap)?;
        temp.as_file().sync_all().map_err(wrap)?;
        temp.persist(destination).map_err(|e| wrap(e.error))?;

        Ok(())
    }

    /// Read a manifest written by [`Manifest::persist`]
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a manifest
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(std::io::Error::from)
    }
}
