//! Asset discovery via the `ignore` crate's walker and override globs

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ignore::WalkBuilder;
use ignore::overrides::{Override, OverrideBuilder};

use crate::error::SyncError;

/// A discovered asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Absolute (or root-joined) path on disk
    pub path: PathBuf,
    /// Path relative to the assets root with `/` separators; the manifest key
    pub relative: String,
    /// File size in bytes
    pub size: u64,
    /// Modification time
    pub modified: SystemTime,
    /// Media type guessed from the extension
    pub media_type: String,
}

impl LocalFile {
    /// Describe a file under `root` without walking
    ///
    /// # Errors
    /// Returns an error if the file's metadata cannot be read
    pub fn from_path(root: &Path, path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let relative = path.strip_prefix(root).unwrap_or(path);

        Ok(Self {
            path: path.to_path_buf(),
            relative: slash_path(relative),
            size: metadata.len(),
            modified: metadata.modified()?,
            media_type: media_type(path),
        })
    }

    /// Last path component, used as the download file name hint
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.relative.clone(), |n| n.to_string_lossy().into_owned())
    }
}

/// Guess a media type from a path's extension
#[must_use]
pub fn media_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walks an assets root
pub struct Scanner {
    root: PathBuf,
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl Scanner {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            includes: Vec::new(),
            excludes: Vec::new(),
        }
    }

    /// Only process files matching this glob (may be given several times)
    #[must_use]
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.includes.push(pattern.into());
        self
    }

    /// Never process files matching this glob
    #[must_use]
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn overrides(&self) -> Result<Override, ignore::Error> {
        let mut builder = OverrideBuilder::new(&self.root);
        for pattern in &self.includes {
            builder.add(pattern)?;
        }
        for pattern in &self.excludes {
            builder.add(&format!("!{pattern}"))?;
        }
        builder.build()
    }

    /// Scan the root and return every matching file, sorted by relative path
    ///
    /// # Errors
    /// Returns an error if a glob is invalid or traversal fails
    pub fn scan(&self) -> Result<Vec<LocalFile>, SyncError> {
        let wrap = |source: ignore::Error| SyncError::Discovery {
            root: self.root.clone(),
            source,
        };

        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(false)
            .ignore(false)
            .parents(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .require_git(false)
            .overrides(self.overrides().map_err(wrap)?);

        let mut files = Vec::new();
        for result in builder.build() {
            let entry = result.map_err(wrap)?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let file = LocalFile::from_path(&self.root, entry.path())
                .map_err(|e| wrap(ignore::Error::from(e)))?;
            files.push(file);
        }

        // Sort for deterministic ordering
        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok(files)
    }
}
