//! Filesystem content store
//!
//! Content-addressable storage on local disk, addressed by BLAKE3. Blobs are
//! organized in subdirectories by the first 2 hex chars of their address.
//! Incoming data is streamed into a temporary file next to the blob tree and
//! renamed into place once hashed, so readers never see a partial blob.

use super::{ByteStream, ContentAddress, ContentStore, Payload, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

const CHUNK_SIZE: usize = 64 * 1024;

/// Content-addressable storage on the local filesystem
pub struct LocalStore {
    base_path: PathBuf,
    gateway_url: String,
}

impl LocalStore {
    /// Create a new store at the specified path.
    /// `gateway_url` is only used to derive public URLs.
    pub fn new<P: AsRef<Path>>(base_path: P, gateway_url: impl Into<String>) -> io::Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            gateway_url: gateway_url.into(),
        })
    }

    /// Stream data to disk and return its address
    async fn write_from<R: AsyncRead + Unpin>(&self, mut reader: R) -> io::Result<ContentAddress> {
        let (file, temp_path) = tempfile::Builder::new()
            .prefix(".incoming-")
            .tempfile_in(&self.base_path)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let address = ContentAddress::parse(hasher.finalize().to_hex().to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let path = self.blob_path(&address);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Only move into place if it doesn't exist (content-addressable = immutable)
        if tokio::fs::try_exists(&path).await? {
            log::debug!("Blob {} already stored", address);
        } else {
            temp_path.persist(&path).map_err(|e| e.error)?;
            log::debug!("Stored blob {}", address);
        }

        Ok(address)
    }

    /// Convert address to file path (organized as base/XX/YYYYYYYY...).
    /// Returns None for addresses this store could never have produced.
    fn local_path(&self, address: &ContentAddress) -> Option<PathBuf> {
        let hex = address.as_str();
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(self.blob_path(address))
    }

    fn blob_path(&self, address: &ContentAddress) -> PathBuf {
        let (prefix, suffix) = address.as_str().split_at(2);
        self.base_path.join(prefix).join(suffix)
    }
}

#[async_trait]
impl ContentStore for LocalStore {
    async fn put(&self, payload: Payload, name: &str) -> StorageResult<ContentAddress> {
        let result = match payload {
            Payload::File(path) => match tokio::fs::File::open(&path).await {
                Ok(file) => self.write_from(file).await,
                Err(e) => Err(e),
            },
            Payload::Bytes(bytes) => self.write_from(&bytes[..]).await,
            Payload::Json(value) => match serde_json::to_vec(&value) {
                Ok(data) => self.write_from(&data[..]).await,
                Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            },
        };

        result.map_err(|e| StorageError::Upload(format!("failed to store {}: {}", name, e)))
    }

    async fn get(&self, address: &ContentAddress) -> StorageResult<ByteStream> {
        let path = self
            .local_path(address)
            .ok_or_else(|| StorageError::NotFound(address.clone()))?;

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(address.clone()))
            }
            Err(e) => return Err(StorageError::Download(e.to_string())),
        };

        Ok(file_stream(file))
    }

    async fn exists(&self, address: &ContentAddress) -> StorageResult<bool> {
        match self.local_path(address) {
            Some(path) => Ok(tokio::fs::try_exists(path).await?),
            None => Ok(false),
        }
    }

    fn gateway_url(&self, address: &ContentAddress) -> String {
        format!("{}{}", self.gateway_url, address)
    }
}

/// Read a file as a stream of chunks
fn file_stream(file: tokio::fs::File) -> ByteStream {
    let stream = futures::stream::try_unfold(file, |mut file| async move {
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        let n = file.read_buf(&mut buf).await?;
        if n == 0 {
            Ok::<_, io::Error>(None)
        } else {
            Ok(Some((Bytes::from(buf), file)))
        }
    });
    Box::pin(stream.map_err(|e| StorageError::Download(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::read_all;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> LocalStore {
        LocalStore::new(dir.path(), "http://localhost:8080/blobs/").unwrap()
    }

    async fn fetch(store: &LocalStore, address: &ContentAddress) -> Vec<u8> {
        read_all(store.get(address).await.unwrap(), usize::MAX)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        let address = store
            .put(Payload::Bytes(Bytes::from_static(b"hello world")), "hello.txt")
            .await
            .unwrap();

        assert_eq!(address.as_str().len(), 64);
        assert_eq!(fetch(&store, &address).await, b"hello world");
    }

    #[tokio::test]
    async fn test_put_file_streams_large_content() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 241) as u8).collect();
        let source = temp_dir.path().join("big.bin");
        std::fs::write(&source, &data).unwrap();

        let address = store.put(Payload::File(source), "big.bin").await.unwrap();
        assert_eq!(address.as_str(), blake3::hash(&data).to_hex().as_str());
        assert_eq!(fetch(&store, &address).await, data);
    }

    #[tokio::test]
    async fn test_exists() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        let address = store
            .put(Payload::Bytes(Bytes::from_static(b"test data")), "t")
            .await
            .unwrap();
        assert!(store.exists(&address).await.unwrap());

        // Well-formed but absent, and not a local address at all
        let missing = ContentAddress::parse("0".repeat(64)).unwrap();
        assert!(!store.exists(&missing).await.unwrap());
        let foreign = ContentAddress::parse("QmForeignCid").unwrap();
        assert!(!store.exists(&foreign).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_write() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        let a = store
            .put(Payload::Bytes(Bytes::from_static(b"duplicate test")), "a")
            .await
            .unwrap();
        let b = store
            .put(Payload::Bytes(Bytes::from_static(b"duplicate test")), "b")
            .await
            .unwrap();

        // Same data = same address, and no temp files left behind
        assert_eq!(a, b);
        let leftovers = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".incoming-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_json_payload() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        let doc = serde_json::json!({"name": "a.txt", "size": 3});
        let address = store.put(Payload::Json(doc.clone()), "meta").await.unwrap();
        let back: serde_json::Value = serde_json::from_slice(&fetch(&store, &address).await).unwrap();
        assert_eq!(back, doc);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        let missing = ContentAddress::parse("ab".repeat(32)).unwrap();
        assert!(matches!(
            store.get(&missing).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_put_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        let result = store
            .put(Payload::File(temp_dir.path().join("gone")), "gone")
            .await;
        assert!(matches!(result, Err(StorageError::Upload(_))));
    }

    #[test]
    fn test_gateway_url() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let address = ContentAddress::parse("abc123").unwrap();
        assert_eq!(
            store.gateway_url(&address),
            "http://localhost:8080/blobs/abc123"
        );
    }
}
