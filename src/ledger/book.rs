//! Record book - the ledger node's state
//!
//! A single sled tree holds every record, receipt and index. Keys are
//! prefixed by kind:
//!
//! - `rec/<id>`            -> FileRecord (JSON)
//! - `rct/<tx hash>`       -> Receipt (JSON)
//! - `own/<owner><id>`     -> empty, one entry per owned record
//! - `cnt/<address>`       -> id of the first record embedding the address
//! - `non/<owner>`         -> next expected nonce
//! - `meta/next_id`, `meta/height`
//!
//! Integers are big-endian so prefix scans come back in commit order. Each
//! accepted submission is applied as one atomic batch and flushed before
//! its receipt becomes visible.

use super::identity::Submission;
use super::{
    FileRecord, LedgerError, LedgerEvent, Owner, Receipt, RecordId, TxHash, TxStatus,
};
use crate::clock::{Clock, SystemClock};
use crate::storage::ContentAddress;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const RECORD_PREFIX: &[u8] = b"rec/";
const RECEIPT_PREFIX: &[u8] = b"rct/";
const OWNER_PREFIX: &[u8] = b"own/";
const CONTENT_PREFIX: &[u8] = b"cnt/";
const NONCE_PREFIX: &[u8] = b"non/";
const NEXT_ID_KEY: &[u8] = b"meta/next_id";
const HEIGHT_KEY: &[u8] = b"meta/height";

/// Record book errors
#[derive(Debug, Error)]
pub enum BookError {
    #[error("submission addressed to record store {got:?}, this is {expected:?}")]
    WrongRecordStore { expected: String, got: String },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("corrupt entry: {0}")]
    Encoding(String),

    #[error("database error: {0}")]
    Database(#[from] sled::Error),
}

pub type BookResult<T> = Result<T, BookError>;

impl From<BookError> for LedgerError {
    fn from(e: BookError) -> Self {
        match e {
            BookError::NonceMismatch { .. } => LedgerError::Rejected {
                reason: e.to_string(),
                retryable: true,
            },
            BookError::WrongRecordStore { .. } | BookError::InvalidSignature(_) => {
                LedgerError::Rejected {
                    reason: e.to_string(),
                    retryable: false,
                }
            }
            BookError::Encoding(_) | BookError::Database(_) => {
                LedgerError::Unavailable(e.to_string())
            }
        }
    }
}

/// Persistent, append-only record book
pub struct RecordBook {
    db: sled::Db,
    record_store: String,
    clock: Arc<dyn Clock>,
    /// Serializes submissions; reads go straight to sled
    write_lock: Mutex<()>,
}

impl RecordBook {
    /// Open or create a record book on disk
    pub fn open<P: AsRef<Path>>(path: P, record_store: impl Into<String>) -> BookResult<Self> {
        let db = sled::open(path.as_ref())?;
        log::info!("Opened record book at {:?}", path.as_ref());
        Ok(Self::from_db(db, record_store.into()))
    }

    /// In-memory book, discarded on drop
    pub fn temporary(record_store: impl Into<String>) -> BookResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::from_db(db, record_store.into()))
    }

    fn from_db(db: sled::Db, record_store: String) -> Self {
        Self {
            db,
            record_store,
            clock: Arc::new(SystemClock),
            write_lock: Mutex::new(()),
        }
    }

    /// Replace the clock used to stamp records
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn record_store(&self) -> &str {
        &self.record_store
    }

    /// Number of submissions processed so far
    pub fn height(&self) -> BookResult<u64> {
        self.read_u64(HEIGHT_KEY)
    }

    /// Next nonce the owner must use
    pub fn nonce(&self, owner: &Owner) -> BookResult<u64> {
        self.read_u64(&key(NONCE_PREFIX, owner.as_bytes()))
    }

    /// Apply a signed submission and return its transaction hash.
    ///
    /// Resubmitting an already applied transaction returns the same hash
    /// without touching state. A pointer the book refuses still consumes the
    /// nonce and yields a reverted receipt.
    pub fn submit(&self, submission: &Submission) -> BookResult<TxHash> {
        let body = &submission.body;
        if body.record_store != self.record_store {
            return Err(BookError::WrongRecordStore {
                expected: self.record_store.clone(),
                got: body.record_store.clone(),
            });
        }
        submission
            .verify()
            .map_err(|e| BookError::InvalidSignature(e.to_string()))?;
        let tx_hash = submission
            .tx_hash()
            .map_err(|e| BookError::Encoding(e.to_string()))?;

        let _guard = self.write_lock.lock();

        let receipt_key = key(RECEIPT_PREFIX, tx_hash.as_bytes());
        if self.db.contains_key(&receipt_key)? {
            log::debug!("Transaction {} already applied", tx_hash);
            return Ok(tx_hash);
        }

        let expected = self.nonce(&body.owner)?;
        if body.nonce != expected {
            return Err(BookError::NonceMismatch {
                expected,
                got: body.nonce,
            });
        }

        let block = self.height()? + 1;
        let mut batch = sled::Batch::default();
        batch.insert(key(NONCE_PREFIX, body.owner.as_bytes()), be(expected + 1));
        batch.insert(HEIGHT_KEY, be(block));

        let receipt = match body.pointer.validate() {
            Err(reason) => {
                log::warn!("Reverting {} from {}: {}", tx_hash, body.owner, reason);
                Receipt {
                    tx_hash,
                    block,
                    status: TxStatus::Reverted { reason },
                    events: Vec::new(),
                }
            }
            Ok(()) => {
                let record_id = RecordId(self.read_u64(NEXT_ID_KEY)?.max(1));
                let record = FileRecord {
                    record_id,
                    pointer: body.pointer.clone(),
                    owner: body.owner,
                    timestamp: u64::try_from(self.clock.now().timestamp()).unwrap_or(0),
                };

                batch.insert(key(RECORD_PREFIX, &record_id.0.to_be_bytes()), encode(&record)?);
                batch.insert(owner_key(&body.owner, record_id), Vec::<u8>::new());
                if let Some(address) = body.pointer.content_address() {
                    let content_key = key(CONTENT_PREFIX, address.as_str().as_bytes());
                    if !self.db.contains_key(&content_key)? {
                        batch.insert(content_key, be(record_id.0));
                    }
                }
                batch.insert(NEXT_ID_KEY, be(record_id.0 + 1));

                log::info!("Record {} committed by {} in block {}", record_id, body.owner, block);
                Receipt {
                    tx_hash,
                    block,
                    status: TxStatus::Success,
                    events: vec![LedgerEvent::RecordCreated {
                        tx_hash,
                        record_id,
                        owner: body.owner,
                    }],
                }
            }
        };

        batch.insert(receipt_key, encode(&receipt)?);
        self.db.apply_batch(batch)?;
        self.db.flush()?;

        Ok(tx_hash)
    }

    pub fn receipt(&self, tx_hash: &TxHash) -> BookResult<Option<Receipt>> {
        self.read_json(&key(RECEIPT_PREFIX, tx_hash.as_bytes()))
    }

    pub fn record(&self, id: RecordId) -> BookResult<Option<FileRecord>> {
        self.read_json(&key(RECORD_PREFIX, &id.0.to_be_bytes()))
    }

    /// Record ids owned by `owner`, in commit order
    pub fn records_by_owner(&self, owner: &Owner) -> BookResult<Vec<RecordId>> {
        let prefix = key(OWNER_PREFIX, owner.as_bytes());
        self.db
            .scan_prefix(&prefix)
            .map(|item| {
                let (k, _) = item?;
                decode_u64(&k[prefix.len()..]).map(RecordId)
            })
            .collect()
    }

    /// First record that embedded `address`
    pub fn find_by_content(&self, address: &ContentAddress) -> BookResult<Option<RecordId>> {
        match self.db.get(key(CONTENT_PREFIX, address.as_str().as_bytes()))? {
            Some(value) => Ok(Some(RecordId(decode_u64(&value)?))),
            None => Ok(None),
        }
    }

    fn read_u64(&self, k: &[u8]) -> BookResult<u64> {
        match self.db.get(k)? {
            Some(value) => decode_u64(&value),
            None => Ok(0),
        }
    }

    fn read_json<T: DeserializeOwned>(&self, k: &[u8]) -> BookResult<Option<T>> {
        match self.db.get(k)? {
            Some(value) => serde_json::from_slice(&value)
                .map(Some)
                .map_err(|e| BookError::Encoding(e.to_string())),
            None => Ok(None),
        }
    }
}

fn key(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(prefix.len() + suffix.len());
    k.extend_from_slice(prefix);
    k.extend_from_slice(suffix);
    k
}

fn owner_key(owner: &Owner, id: RecordId) -> Vec<u8> {
    let mut k = key(OWNER_PREFIX, owner.as_bytes());
    k.extend_from_slice(&id.0.to_be_bytes());
    k
}

fn be(n: u64) -> Vec<u8> {
    n.to_be_bytes().to_vec()
}

fn decode_u64(bytes: &[u8]) -> BookResult<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| BookError::Encoding(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

fn encode<T: Serialize>(value: &T) -> BookResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| BookError::Encoding(e.to_string()))
}
