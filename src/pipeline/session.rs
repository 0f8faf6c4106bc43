//! Upload sessions
//!
//! An upload lands in a temporary file that is removed when the session is
//! dropped, whichever way the request ends.

use crate::metadata::DEFAULT_MIME_TYPE;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::io;
use std::path::Path;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Name used when the client sent nothing usable
const FALLBACK_FILE_NAME: &str = "file";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("upload exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("upload body failed: {0}")]
    Body(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A received file waiting to be published
#[derive(Debug)]
pub struct UploadSession {
    path: TempPath,
    file_name: String,
    size: u64,
    mime_type: String,
}

impl UploadSession {
    /// Spool a body stream into a temporary file under `dir`, refusing more
    /// than `max_bytes`
    pub async fn from_stream<S, E>(
        dir: &Path,
        file_name: &str,
        mime_type: Option<&str>,
        stream: S,
        max_bytes: u64,
    ) -> Result<Self, SessionError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        tokio::fs::create_dir_all(dir).await?;
        let (file, path) = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(dir)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut stream = std::pin::pin!(stream);
        let mut size = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SessionError::Body(e.to_string()))?;
            size += chunk.len() as u64;
            if size > max_bytes {
                return Err(SessionError::TooLarge { limit: max_bytes });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        Ok(Self {
            path,
            file_name: sanitize_file_name(file_name),
            size,
            mime_type: normalize_mime_type(mime_type),
        })
    }

    /// Session over an in-memory body
    pub async fn from_bytes(
        dir: &Path,
        file_name: &str,
        mime_type: Option<&str>,
        data: impl Into<Bytes>,
    ) -> Result<Self, SessionError> {
        let data = data.into();
        let limit = data.len() as u64;
        let stream = futures::stream::once(async move { Ok::<_, io::Error>(data) });
        Self::from_stream(dir, file_name, mime_type, stream, limit).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Delete the temporary file now and report whether that worked
    pub fn finish(self) -> io::Result<()> {
        self.path.close()
    }
}

/// Keep only the final path component and drop control characters
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

fn normalize_mime_type(mime_type: Option<&str>) -> String {
    match mime_type.map(str::trim) {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => DEFAULT_MIME_TYPE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_spool_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let session = UploadSession::from_bytes(dir.path(), "hello.txt", Some("text/plain"), "hello world!")
            .await
            .unwrap();

        let path = session.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world!");
        assert_eq!(session.size(), 12);
        assert_eq!(session.file_name(), "hello.txt");
        assert_eq!(session.mime_type(), "text/plain");

        drop(session);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_finish_removes_file() {
        let dir = TempDir::new().unwrap();
        let session = UploadSession::from_bytes(dir.path(), "a", None, "x").await.unwrap();
        let path = session.path().to_path_buf();
        session.finish().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_size_limit() {
        let dir = TempDir::new().unwrap();
        let chunks = vec![
            Ok::<_, io::Error>(Bytes::from_static(b"0123456789")),
            Ok(Bytes::from_static(b"0123456789")),
        ];
        let result =
            UploadSession::from_stream(dir.path(), "big", None, futures::stream::iter(chunks), 15).await;

        assert!(matches!(result, Err(SessionError::TooLarge { limit: 15 })));
        // Nothing left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_body_error() {
        let dir = TempDir::new().unwrap();
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let result =
            UploadSession::from_stream(dir.path(), "a", None, futures::stream::iter(chunks), 1024).await;
        assert!(matches!(result, Err(SessionError::Body(_))));
    }

    #[tokio::test]
    async fn test_default_mime_type() {
        let dir = TempDir::new().unwrap();
        let session = UploadSession::from_bytes(dir.path(), "a.bin", Some("  "), "x")
            .await
            .unwrap();
        assert_eq!(session.mime_type(), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\notes.txt"), "notes.txt");
        assert_eq!(sanitize_file_name("bad\nname.txt"), "badname.txt");
        assert_eq!(sanitize_file_name("한글 파일.txt"), "한글 파일.txt");
        assert_eq!(sanitize_file_name(""), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("dir/"), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name(".."), FALLBACK_FILE_NAME);
    }
}
