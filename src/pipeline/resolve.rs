//! Resolve pipeline
//!
//! Ledger record -> (metadata document) -> content bytes.

use crate::ledger::{FileRecord, LedgerClient, LedgerError, Owner, RecordId, RecordPointer};
use crate::metadata::{parse_ipfs_uri, Attribute, Metadata, MetadataError};
use crate::storage::{read_all, ByteStream, ContentAddress, ContentStore, StorageError};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Largest metadata document the resolver will read
pub const MAX_METADATA_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("record {0} points at no retrievable content")]
    Unresolvable(RecordId),

    #[error(transparent)]
    Store(#[from] StorageError),

    #[error(transparent)]
    Ledger(LedgerError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl From<LedgerError> for ResolveError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(what) => ResolveError::NotFound(what),
            other => ResolveError::Ledger(other),
        }
    }
}

/// Record details, without the bytes
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    #[serde(rename = "tokenId")]
    pub record_id: RecordId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub owner: Owner,
    /// Commit time, RFC 3339
    pub timestamp: String,
    pub attributes: Vec<Attribute>,
    pub content_address: ContentAddress,
    pub file_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_url: Option<String>,
}

/// A file ready to stream
pub struct Download {
    pub file_name: String,
    pub content_address: ContentAddress,
    pub stream: ByteStream,
}

/// Entry of an owner's file list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedFile {
    pub content_address: ContentAddress,
    pub file_name: String,
    pub timestamp: String,
    pub url: String,
}

/// A record with its pointer followed
struct Resolved {
    record: FileRecord,
    file_name: String,
    metadata: Option<Metadata>,
    metadata_address: Option<ContentAddress>,
    content_address: ContentAddress,
}

pub struct ResolvePipeline {
    store: Arc<dyn ContentStore>,
    ledger: Arc<dyn LedgerClient>,
}

impl ResolvePipeline {
    pub fn new(store: Arc<dyn ContentStore>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self { store, ledger }
    }

    /// Look up a record by id and describe it. No content bytes are fetched.
    pub async fn info(&self, id: RecordId) -> Result<FileInfo, ResolveError> {
        let record = self.ledger.get(id).await?;
        let resolved = self.resolve(record).await?;

        let (description, attributes) = match resolved.metadata {
            Some(metadata) => (Some(metadata.description), metadata.attributes),
            None => (None, Vec::new()),
        };

        Ok(FileInfo {
            record_id: resolved.record.record_id,
            name: resolved.file_name,
            description,
            owner: resolved.record.owner,
            timestamp: format_timestamp(resolved.record.timestamp),
            attributes,
            file_url: self.store.gateway_url(&resolved.content_address),
            metadata_url: resolved
                .metadata_address
                .as_ref()
                .map(|a| self.store.gateway_url(a)),
            content_address: resolved.content_address,
        })
    }

    /// Find the record that published `address` and open its bytes
    pub async fn download(&self, address: &ContentAddress) -> Result<Download, ResolveError> {
        let id = self
            .ledger
            .find_by_content_address(address)
            .await?
            .ok_or_else(|| ResolveError::NotFound(format!("no record references {}", address)))?;

        let record = self.ledger.get(id).await?;
        let file_name = match &record.pointer {
            RecordPointer::Direct { file_name, .. } => file_name.clone(),
            RecordPointer::Metadata { uri, .. } => {
                self.fetch_metadata(&parse_ipfs_uri(uri)?).await?.name
            }
        };

        let stream = self.store.get(address).await?;
        log::debug!("Serving {} as {:?} (record {})", address, file_name, id);

        Ok(Download {
            file_name,
            content_address: address.clone(),
            stream,
        })
    }

    /// Files committed by `owner`, in ledger order
    pub async fn list_by_owner(&self, owner: &Owner) -> Result<Vec<OwnedFile>, ResolveError> {
        let ids = self.ledger.list_by_owner(owner).await?;

        try_join_all(ids.into_iter().map(|id| async move {
            let record = self.ledger.get(id).await?;
            let resolved = self.resolve(record).await?;
            Ok::<_, ResolveError>(OwnedFile {
                url: self.store.gateway_url(&resolved.content_address),
                content_address: resolved.content_address,
                file_name: resolved.file_name,
                timestamp: format_timestamp(resolved.record.timestamp),
            })
        }))
        .await
    }

    /// Files committed by this node's own identity
    pub async fn my_files(&self) -> Result<Vec<OwnedFile>, ResolveError> {
        self.list_by_owner(&self.ledger.owner()).await
    }

    async fn resolve(&self, record: FileRecord) -> Result<Resolved, ResolveError> {
        match record.pointer.clone() {
            RecordPointer::Direct {
                file_name,
                content_address,
            } => Ok(Resolved {
                record,
                file_name,
                metadata: None,
                metadata_address: None,
                content_address,
            }),
            RecordPointer::Metadata {
                uri,
                content_address: embedded,
            } => {
                let metadata_address = parse_ipfs_uri(&uri)?;
                let metadata = self.fetch_metadata(&metadata_address).await?;
                let declared = metadata.content_address().ok();
                let content_address = self
                    .pick_pointer(record.record_id, embedded, declared)
                    .await?;

                Ok(Resolved {
                    record,
                    file_name: metadata.name.clone(),
                    metadata: Some(metadata),
                    metadata_address: Some(metadata_address),
                    content_address,
                })
            }
        }
    }

    /// Choose between the address embedded in the record and the one the
    /// metadata declares. The record wins unless it does not resolve.
    async fn pick_pointer(
        &self,
        id: RecordId,
        embedded: Option<ContentAddress>,
        declared: Option<ContentAddress>,
    ) -> Result<ContentAddress, ResolveError> {
        match (embedded, declared) {
            (Some(embedded), Some(declared)) if embedded != declared => {
                log::warn!(
                    "Record {} embeds {} but its metadata declares {}",
                    id,
                    embedded,
                    declared
                );
                if self.store.exists(&embedded).await? {
                    Ok(embedded)
                } else if self.store.exists(&declared).await? {
                    Ok(declared)
                } else {
                    Err(ResolveError::Unresolvable(id))
                }
            }
            (Some(address), _) | (None, Some(address)) => Ok(address),
            (None, None) => Err(ResolveError::Unresolvable(id)),
        }
    }

    async fn fetch_metadata(&self, address: &ContentAddress) -> Result<Metadata, ResolveError> {
        let stream = self.store.get(address).await?;
        let data = read_all(stream, MAX_METADATA_BYTES).await?;
        Ok(Metadata::from_slice(&data)?)
    }
}

/// Unix seconds as RFC 3339 with millisecond precision
fn format_timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
