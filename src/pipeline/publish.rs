//! Publish pipeline
//!
//! Walks an upload through a fixed sequence of stages:
//!
//! ```text
//! Received -> Hashed -> ContentStored -> MetadataBuilt -> MetadataStored
//!          -> LedgerCommitted -> Done
//! ```
//!
//! Any failure stops the walk and is reported with the stage that could not
//! be reached. The ledger commit is always last. Nothing already written to
//! the content store is removed on failure, so a failure after
//! `ContentStored` leaves unreferenced objects behind.

use super::session::UploadSession;
use super::StorageScheme;
use crate::clock::Clock;
use crate::hasher::{digest_file, Digest};
use crate::ledger::{LedgerClient, LedgerError, RecordId, RecordPointer, TxHash};
use crate::metadata::{ipfs_uri, Metadata, MetadataBuilder, MetadataError};
use crate::storage::{ContentAddress, ContentStore, Payload, StorageError};
use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Stages of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PublishState {
    Received,
    Hashed,
    ContentStored,
    MetadataBuilt,
    MetadataStored,
    LedgerCommitted,
    Done,
}

impl PublishState {
    pub fn next(self) -> Option<PublishState> {
        use PublishState::*;
        match self {
            Received => Some(Hashed),
            Hashed => Some(ContentStored),
            ContentStored => Some(MetadataBuilt),
            MetadataBuilt => Some(MetadataStored),
            MetadataStored => Some(LedgerCommitted),
            LedgerCommitted => Some(Done),
            Done => None,
        }
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What went wrong inside a stage
#[derive(Debug, Error)]
pub enum StageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StorageError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// A publish that stopped before `Done`
#[derive(Debug, Error)]
#[error("publish failed before {stage}: {source}")]
pub struct PublishError {
    /// Stage that was not reached
    pub stage: PublishState,
    #[source]
    pub source: StageError,
}

/// Everything a completed publish produced
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub scheme: StorageScheme,
    pub file_name: String,
    /// Local SHA-256 fingerprint
    pub digest: Digest,
    pub content_address: ContentAddress,
    /// Descriptive scheme only
    pub metadata_address: Option<ContentAddress>,
    pub metadata: Metadata,
    pub record_id: RecordId,
    pub tx_hash: TxHash,
    /// `ipfs://<metadata address>`, descriptive scheme only
    pub token_uri: Option<String>,
    pub file_url: String,
    pub metadata_url: Option<String>,
}

/// Tracks the current stage of one publish
struct Progress<'a> {
    state: PublishState,
    file_name: &'a str,
}

impl<'a> Progress<'a> {
    fn new(file_name: &'a str) -> Self {
        log::debug!("{}: {}", file_name, PublishState::Received);
        Self {
            state: PublishState::Received,
            file_name,
        }
    }

    fn advance(&mut self, to: PublishState) {
        debug_assert_eq!(self.state.next(), Some(to));
        log::debug!("{}: {} -> {}", self.file_name, self.state, to);
        self.state = to;
    }

    fn fail(&self, source: impl Into<StageError>) -> PublishError {
        let stage = self.state.next().unwrap_or(self.state);
        let source = source.into();
        log::error!(
            "Publishing {} failed before {}: {}",
            self.file_name,
            stage,
            source
        );
        PublishError { stage, source }
    }
}

/// Hash -> upload -> describe -> upload -> commit
pub struct PublishPipeline {
    store: Arc<dyn ContentStore>,
    ledger: Arc<dyn LedgerClient>,
    clock: Arc<dyn Clock>,
    scheme: StorageScheme,
    metadata: MetadataBuilder,
}

impl PublishPipeline {
    pub fn new(
        store: Arc<dyn ContentStore>,
        ledger: Arc<dyn LedgerClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            scheme: StorageScheme::default(),
            metadata: MetadataBuilder::default(),
        }
    }

    pub fn with_scheme(mut self, scheme: StorageScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_metadata_builder(mut self, builder: MetadataBuilder) -> Self {
        self.metadata = builder;
        self
    }

    /// Publish one upload. The session's temporary file is gone when this
    /// returns, on success and on failure.
    pub async fn publish(&self, session: UploadSession) -> Result<PublishOutcome, PublishError> {
        let file_name = session.file_name().to_string();
        let size = session.size();
        let mut progress = Progress::new(&file_name);

        let digest = digest_file(session.path())
            .await
            .map_err(|e| progress.fail(e))?;
        progress.advance(PublishState::Hashed);

        let content_address = self
            .store
            .put(Payload::File(session.path().to_path_buf()), &file_name)
            .await
            .map_err(|e| progress.fail(e))?;
        progress.advance(PublishState::ContentStored);

        let metadata = self
            .metadata
            .build(
                &file_name,
                size,
                session.mime_type(),
                &content_address,
                self.clock.now(),
            )
            .map_err(|e| progress.fail(e))?;
        progress.advance(PublishState::MetadataBuilt);

        let metadata_address = match self.scheme {
            StorageScheme::Descriptive => {
                let document = metadata.to_json().map_err(|e| progress.fail(e))?;
                let address = self
                    .store
                    .put(Payload::Json(document), &format!("{}.metadata.json", file_name))
                    .await
                    .map_err(|e| progress.fail(e))?;
                Some(address)
            }
            StorageScheme::Direct => None,
        };
        progress.advance(PublishState::MetadataStored);

        let pointer = match &metadata_address {
            Some(address) => RecordPointer::Metadata {
                uri: ipfs_uri(address),
                content_address: Some(content_address.clone()),
            },
            None => RecordPointer::Direct {
                file_name: file_name.clone(),
                content_address: content_address.clone(),
            },
        };
        let committed = self
            .ledger
            .commit(pointer)
            .await
            .map_err(|e| progress.fail(e))?;
        progress.advance(PublishState::LedgerCommitted);

        if let Err(e) = session.finish() {
            log::warn!("Could not remove upload spool for {}: {}", file_name, e);
        }
        progress.advance(PublishState::Done);

        log::info!(
            "Published {} ({} bytes) as record {} -> {}",
            file_name,
            size,
            committed.record_id,
            content_address
        );

        Ok(PublishOutcome {
            scheme: self.scheme,
            file_url: self.store.gateway_url(&content_address),
            metadata_url: metadata_address.as_ref().map(|a| self.store.gateway_url(a)),
            token_uri: metadata_address.as_ref().map(ipfs_uri),
            file_name,
            digest,
            content_address,
            metadata_address,
            metadata,
            record_id: committed.record_id,
            tx_hash: committed.tx_hash,
        })
    }
}
