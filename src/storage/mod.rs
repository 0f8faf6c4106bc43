//! Content store clients
//!
//! This module defines the ContentStore trait and its implementations. A
//! content store keeps immutable blobs under an address it assigns; the same
//! bytes always map to the same address and nothing is ever updated in place.

pub mod local;
pub mod pinning;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;

/// Longest address accepted (CIDv1 in base32 is ~60 chars)
const MAX_ADDRESS_LEN: usize = 128;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload failed: {0}")]
    Upload(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("content not found: {0}")]
    NotFound(ContentAddress),

    #[error("invalid content address: {0:?}")]
    InvalidAddress(String),

    #[error("client setup failed: {0}")]
    Client(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stream of content bytes handed back by `get`
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Address assigned by a content store (an IPFS CID, or a BLAKE3 hex digest
/// for the local store)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentAddress(String);

impl ContentAddress {
    /// Validate and wrap an address string
    pub fn parse(s: impl Into<String>) -> StorageResult<Self> {
        let s = s.into();
        if s.is_empty()
            || s.len() > MAX_ADDRESS_LEN
            || !s.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(StorageError::InvalidAddress(s));
        }
        Ok(ContentAddress(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentAddress {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentAddress::parse(s)
    }
}

impl TryFrom<String> for ContentAddress {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ContentAddress::parse(value)
    }
}

impl From<ContentAddress> for String {
    fn from(address: ContentAddress) -> Self {
        address.0
    }
}

/// What to upload
#[derive(Debug, Clone)]
pub enum Payload {
    /// A file on local disk, streamed rather than read into memory
    File(PathBuf),
    /// Raw bytes
    Bytes(Bytes),
    /// A JSON document
    Json(serde_json::Value),
}

/// Content store trait - the narrow interface the pipelines depend on
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Upload a payload and return the address the store assigned to it.
    /// No retries; a failure is reported as `StorageError::Upload`.
    async fn put(&self, payload: Payload, name: &str) -> StorageResult<ContentAddress>;

    /// Fetch content by address.
    /// The backend's status is checked before the stream is returned, so the
    /// stream itself only fails on mid-body transport errors.
    async fn get(&self, address: &ContentAddress) -> StorageResult<ByteStream>;

    /// Check if an address resolves without fetching the body.
    async fn exists(&self, address: &ContentAddress) -> StorageResult<bool>;

    /// Public URL for an address (gateway base + address)
    fn gateway_url(&self, address: &ContentAddress) -> String;
}

/// Drain a content stream into memory, refusing anything over `limit` bytes
pub async fn read_all(mut stream: ByteStream, limit: usize) -> StorageResult<Vec<u8>> {
    let mut data = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if data.len() + chunk.len() > limit {
            return Err(StorageError::Download(format!(
                "content exceeds {} byte limit",
                limit
            )));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

// Re-export implementations
pub use local::LocalStore;
pub use pinning::{PinningConfig, PinningStore};
