//! Content digests (the remote key) and store ETags (the change detector)

use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const BUFFER_SIZE: usize = 64 * 1024;

/// Hash algorithms accepted for naming remote objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Every supported algorithm, in the order they are listed to users
    pub const ALL: [Self; 5] = [
        Self::Md5,
        Self::Sha1,
        Self::Sha256,
        Self::Sha384,
        Self::Sha512,
    ];

    /// Canonical lowercase name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the hex encoding produced by this algorithm
    #[must_use]
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }

    /// Digest an in-memory buffer
    #[must_use]
    pub fn digest_bytes(self, data: &[u8]) -> ContentDigest {
        let hex = match self {
            Self::Md5 => hash_bytes::<md5::Md5>(data),
            Self::Sha1 => hash_bytes::<sha1::Sha1>(data),
            Self::Sha256 => hash_bytes::<sha2::Sha256>(data),
            Self::Sha384 => hash_bytes::<sha2::Sha384>(data),
            Self::Sha512 => hash_bytes::<sha2::Sha512>(data),
        };
        ContentDigest(hex)
    }

    /// Digest everything a reader yields, from its current position to EOF.
    ///
    /// # Errors
    /// Returns an error if the reader fails before EOF.
    pub fn digest_reader(self, reader: impl Read) -> io::Result<ContentDigest> {
        let hex = match self {
            Self::Md5 => hash_reader::<md5::Md5>(reader)?,
            Self::Sha1 => hash_reader::<sha1::Sha1>(reader)?,
            Self::Sha256 => hash_reader::<sha2::Sha256>(reader)?,
            Self::Sha384 => hash_reader::<sha2::Sha384>(reader)?,
            Self::Sha512 => hash_reader::<sha2::Sha512>(reader)?,
        };
        Ok(ContentDigest(hex))
    }

    /// Digest a file by path
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or read
    pub fn digest_file(self, path: &Path) -> io::Result<ContentDigest> {
        let file = std::fs::File::open(path)?;
        self.digest_reader(file)
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" | "sha" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(ConfigError::UnknownDigest {
                value: s.to_string(),
                accepted: Self::ALL.iter().map(|a| a.name()).collect::<Vec<_>>().join(", "),
            }),
        }
    }
}

/// Lowercase hex digest of an encoded artifact; doubles as its remote key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Wrap an existing hex digest, e.g. one read back from a manifest.
    ///
    /// Returns `None` unless the value is non-empty lowercase hex.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = !hex.is_empty()
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(hex.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentDigest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Integrity token in the store's own scheme: hex MD5 of the stored bytes.
///
/// Independent of the configured [`DigestAlgorithm`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ETag(String);

impl ETag {
    /// Parse an ETag as reported by a store, dropping the surrounding quotes
    /// HTTP puts around it.
    #[must_use]
    pub fn from_remote(raw: &str) -> Self {
        let trimmed = raw.trim();
        let unquoted = trimmed
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(trimmed);
        Self(unquoted.to_string())
    }

    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(hash_bytes::<md5::Md5>(data))
    }

    /// # Errors
    /// Returns an error if the reader fails before EOF.
    pub fn from_reader(reader: impl Read) -> io::Result<Self> {
        hash_reader::<md5::Md5>(reader).map(Self)
    }

    /// # Errors
    /// Returns an error if the file cannot be opened or read
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hash_bytes<D: sha2::Digest>(data: &[u8]) -> String {
    hex::encode(D::digest(data))
}

fn hash_reader<D: sha2::Digest>(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
