//! Transport encoding applied before digesting and uploading

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::Compression;
use flate2::GzBuilder;
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tracing::debug;

use crate::error::{ConfigError, SyncError};

/// Encoding applied to every asset in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Bytes are uploaded as they are on disk
    Plain,
    #[default]
    Gzip,
}

impl Encoding {
    /// Value for the `Content-Encoding` header, if any
    #[must_use]
    pub fn content_encoding(self) -> Option<&'static str> {
        match self {
            Self::Plain => None,
            Self::Gzip => Some("gzip"),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Gzip => "gzip",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "none" => Ok(Self::Plain),
            "gzip" => Ok(Self::Gzip),
            _ => Err(ConfigError::UnknownEncoding {
                value: s.to_string(),
                accepted: "plain, gzip".to_string(),
            }),
        }
    }
}

/// Where an artifact's bytes live
#[derive(Debug)]
enum Backing {
    /// Aliases the source file
    Source(PathBuf),
    /// Scratch file, removed when dropped
    Scratch(TempPath),
}

/// The bytes that get digested and uploaded for one asset.
///
/// Any scratch file is deleted when the artifact is dropped, whichever way
/// processing of the asset ends.
#[derive(Debug)]
pub struct EncodedArtifact {
    backing: Backing,
    encoding: Encoding,
    size: u64,
}

impl EncodedArtifact {
    /// Path of the encoded bytes
    #[must_use]
    pub fn path(&self) -> &Path {
        match &self.backing {
            Backing::Source(path) => path.as_path(),
            Backing::Scratch(temp) => &**temp,
        }
    }

    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Size in bytes of the encoded form
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the artifact is the source file itself
    #[must_use]
    pub fn is_alias(&self) -> bool {
        matches!(self.backing, Backing::Source(_))
    }

    /// Open the encoded bytes for reading from the start
    ///
    /// # Errors
    /// Returns an error if the backing file can no longer be opened
    pub fn open(&self) -> io::Result<File> {
        File::open(self.path())
    }
}

/// Encode `source` for upload, materializing gzip output under `scratch_dir`.
///
/// # Errors
/// Returns [`SyncError::Encoding`] naming `source` if reading, compressing or
/// writing fails. No artifact survives a failure.
pub fn encode(
    source: &Path,
    encoding: Encoding,
    scratch_dir: &Path,
) -> Result<EncodedArtifact, SyncError> {
    let wrap = |source_err: io::Error| SyncError::Encoding {
        path: source.to_path_buf(),
        source: source_err,
    };

    debug!(path = %source.display(), %encoding, "encoding");

    match encoding {
        Encoding::Plain => {
            let size = std::fs::metadata(source).map_err(wrap)?.len();
            Ok(EncodedArtifact {
                backing: Backing::Source(source.to_path_buf()),
                encoding,
                size,
            })
        }
        Encoding::Gzip => {
            let temp = gzip_to_scratch(source, scratch_dir).map_err(wrap)?;
            let size = std::fs::metadata(&temp).map_err(wrap)?.len();
            Ok(EncodedArtifact {
                backing: Backing::Scratch(temp),
                encoding,
                size,
            })
        }
    }
}

fn gzip_to_scratch(source: &Path, scratch_dir: &Path) -> io::Result<TempPath> {
    std::fs::create_dir_all(scratch_dir)?;

    let file_name = source
        .file_name()
        .map_or_else(|| "asset".into(), |n| n.to_string_lossy());
    let prefix = format!("{file_name}-");

    // Dropping the NamedTempFile on any early return removes the partial output
    let mut scratch = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(scratch_dir)?;

    let mut input = File::open(source)?;
    {
        // mtime 0 keeps the output a pure function of the input bytes
        let mut encoder = GzBuilder::new()
            .mtime(0)
            .write(BufWriter::new(scratch.as_file_mut()), Compression::default());
        io::copy(&mut input, &mut encoder)?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
    }
    scratch.as_file().sync_all()?;

    Ok(scratch.into_temp_path())
}
