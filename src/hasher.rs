//! Streaming file fingerprints
//!
//! Computes a SHA-256 digest over a byte stream in bounded chunks. The digest is
//! a local integrity check and is independent of whatever address the content
//! store assigns to the same bytes.

use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read size used when hashing files
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// SHA-256 digest (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Digest of an in-memory buffer
    pub fn of(data: &[u8]) -> Self {
        Digest(Sha256::digest(data).into())
    }

    /// Lowercase hex, always 64 characters
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Hash everything `reader` yields, `chunk_size` bytes at a time.
pub async fn digest_reader<R>(mut reader: R, chunk_size: usize) -> io::Result<Digest>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_size.max(1)];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Digest(hasher.finalize().into()))
}

/// Hash a file on disk without loading it into memory
pub async fn digest_file<P: AsRef<Path>>(path: P) -> io::Result<Digest> {
    let file = tokio::fs::File::open(path).await?;
    digest_reader(file, DEFAULT_CHUNK_SIZE).await
}
