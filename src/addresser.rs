//! Content addressing: gzip a file, then hash the compressed stream.
//!
//! The hosting service identifies uploaded content by the SHA-256 of the
//! gzip bytes it receives, so the hash is taken over the finished
//! compressed stream rather than the source file.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::AddressError;

/// Lowercase hex SHA-256 of a compressed file.
/// Newtype wrapper so hashes and paths cannot be mixed up
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(Arc<str>);

impl ContentHash {
    /// Parse a hash received from elsewhere.
    /// Returns None unless it is exactly 64 lowercase hex characters
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == 64
            && s
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(Arc::from(s)))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Serialized as the bare hex string
impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compressed payload together with its address
#[derive(Debug, Clone)]
pub struct Addressed {
    pub hash: ContentHash,
    pub compressed: Vec<u8>,
}

/// Gzip `data` with a fixed header (no name, mtime 0) and hash the result
pub fn address_bytes(data: &[u8]) -> Result<Addressed, AddressError> {
    let compressed = gzip(data)?;
    let hash = digest(&compressed);
    Ok(Addressed { hash, compressed })
}

/// Read `path` to completion and address its content
pub fn address_file(path: &Path) -> Result<Addressed, AddressError> {
    let data = fs::read(path).map_err(AddressError::Read)?;
    address_bytes(&data)
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, AddressError> {
    let mut encoder: GzEncoder<Vec<u8>> = GzBuilder::new()
        .mtime(0)
        .write(Vec::with_capacity(data.len() / 2 + 32), Compression::default());
    encoder.write_all(data).map_err(AddressError::Compress)?;
    encoder.finish().map_err(AddressError::Compress)
}

fn digest(bytes: &[u8]) -> ContentHash {
    let sum = Sha256::digest(bytes);
    ContentHash(Arc::from(hex::encode(sum)))
}
