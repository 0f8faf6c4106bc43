//! Ledger records and clients
//!
//! The ledger is the system of record for ownership and existence. A commit
//! binds a pointer (to metadata, or directly to content) to the signing
//! identity; the ledger assigns the record id and reports it through an event
//! in the transaction receipt.

pub mod book;
pub mod identity;
pub mod local;
pub mod rpc;
pub mod server;

use crate::metadata::IPFS_SCHEME;
use crate::storage::ContentAddress;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Longest pointer string the ledger accepts
pub const MAX_POINTER_LEN: usize = 512;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("transaction rejected: {reason}")]
    Rejected { reason: String, retryable: bool },

    #[error("transaction {tx_hash} confirmed without a RecordCreated event")]
    EventNotFound { tx_hash: TxHash },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid ledger response: {0}")]
    InvalidResponse(String),
}

impl LedgerError {
    /// Whether resubmitting could succeed (ordering conflicts)
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Rejected { retryable: true, .. })
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-assigned record identifier, monotonic from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(RecordId)
    }
}

/// Parse 32 bytes of hex, with or without a `0x` prefix
fn parse_hex32(s: &str) -> Result<[u8; 32], String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| format!("invalid hex: {}", e))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))
}

/// Public key of a signing identity
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Owner(pub [u8; 32]);

impl Owner {
    pub fn from_hex(s: &str) -> Result<Self, String> {
        parse_hex32(s).map(Owner)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owner({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl Serialize for Owner {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Owner {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Owner::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Transaction hash
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    pub fn from_hex(s: &str) -> Result<Self, String> {
        parse_hex32(s).map(TxHash)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash(0x{})", &hex::encode(self.0)[..16])
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TxHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// What a record points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPointer {
    /// File name and content address stored directly in the record
    Direct {
        file_name: String,
        content_address: ContentAddress,
    },
    /// `ipfs://` URI of a metadata document. The content address of the
    /// file bytes is embedded as well so the ledger can index it.
    Metadata {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_address: Option<ContentAddress>,
    },
}

impl RecordPointer {
    /// Content address carried by the record itself, if any
    pub fn content_address(&self) -> Option<&ContentAddress> {
        match self {
            RecordPointer::Direct {
                content_address, ..
            } => Some(content_address),
            RecordPointer::Metadata {
                content_address, ..
            } => content_address.as_ref(),
        }
    }

    /// Checks the ledger applies before accepting a pointer
    pub fn validate(&self) -> Result<(), String> {
        match self {
            RecordPointer::Direct { file_name, .. } => {
                if file_name.trim().is_empty() {
                    return Err("file name must not be empty".to_string());
                }
                if file_name.len() > MAX_POINTER_LEN {
                    return Err(format!("file name longer than {} bytes", MAX_POINTER_LEN));
                }
            }
            RecordPointer::Metadata { uri, .. } => {
                if uri.len() <= IPFS_SCHEME.len() || !uri.starts_with(IPFS_SCHEME) {
                    return Err(format!("metadata pointer is not an ipfs:// URI: {:?}", uri));
                }
                if uri.len() > MAX_POINTER_LEN {
                    return Err(format!("metadata URI longer than {} bytes", MAX_POINTER_LEN));
                }
            }
        }
        Ok(())
    }
}

/// Committed ledger record. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub record_id: RecordId,
    pub pointer: RecordPointer,
    pub owner: Owner,
    /// Commit time, unix seconds
    pub timestamp: u64,
}

/// Events emitted by a confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum LedgerEvent {
    RecordCreated {
        #[serde(rename = "txHash")]
        tx_hash: TxHash,
        #[serde(rename = "recordId")]
        record_id: RecordId,
        owner: Owner,
    },
    /// Anything this client does not understand
    #[serde(other)]
    Unknown,
}

/// Execution outcome of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Reverted { reason: String },
}

/// Confirmation receipt for a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block: u64,
    #[serde(flatten)]
    pub status: TxStatus,
    #[serde(default)]
    pub events: Vec<LedgerEvent>,
}

/// Result of a successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub tx_hash: TxHash,
    pub record_id: RecordId,
}

/// Find the record id assigned by this receipt's transaction.
/// A confirmed transaction without a matching event is an integrity fault.
pub fn extract_record_id(receipt: &Receipt) -> LedgerResult<RecordId> {
    receipt
        .events
        .iter()
        .find_map(|event| match event {
            LedgerEvent::RecordCreated {
                tx_hash, record_id, ..
            } if *tx_hash == receipt.tx_hash => Some(*record_id),
            _ => None,
        })
        .ok_or(LedgerError::EventNotFound {
            tx_hash: receipt.tx_hash,
        })
}

/// Turn a confirmed receipt into a commit result
pub fn settle(receipt: &Receipt) -> LedgerResult<CommitReceipt> {
    if let TxStatus::Reverted { reason } = &receipt.status {
        return Err(LedgerError::Rejected {
            reason: format!("transaction {} reverted: {}", receipt.tx_hash, reason),
            retryable: false,
        });
    }

    Ok(CommitReceipt {
        tx_hash: receipt.tx_hash,
        record_id: extract_record_id(receipt)?,
    })
}

/// Ledger client trait - everything the pipelines need from the ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Identity commits are signed with
    fn owner(&self) -> Owner;

    /// Submit a record, wait for one confirmation, and return the assigned id.
    async fn commit(&self, pointer: RecordPointer) -> LedgerResult<CommitReceipt>;

    /// Read a record. Missing ids are `LedgerError::NotFound`.
    async fn get(&self, id: RecordId) -> LedgerResult<FileRecord>;

    /// Record ids owned by `owner`, in commit order
    async fn list_by_owner(&self, owner: &Owner) -> LedgerResult<Vec<RecordId>>;

    /// First record that embedded `address`
    async fn find_by_content_address(
        &self,
        address: &ContentAddress,
    ) -> LedgerResult<Option<RecordId>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(events: Vec<LedgerEvent>) -> Receipt {
        Receipt {
            tx_hash: TxHash([7u8; 32]),
            block: 3,
            status: TxStatus::Success,
            events,
        }
    }

    #[test]
    fn test_extract_record_id() {
        let r = receipt(vec![
            LedgerEvent::Unknown,
            LedgerEvent::RecordCreated {
                tx_hash: TxHash([7u8; 32]),
                record_id: RecordId(42),
                owner: Owner([1u8; 32]),
            },
        ]);
        assert_eq!(extract_record_id(&r).unwrap(), RecordId(42));
    }

    #[test]
    fn test_extract_ignores_other_transactions() {
        let r = receipt(vec![LedgerEvent::RecordCreated {
            tx_hash: TxHash([8u8; 32]),
            record_id: RecordId(1),
            owner: Owner([1u8; 32]),
        }]);
        assert!(matches!(
            extract_record_id(&r),
            Err(LedgerError::EventNotFound { .. })
        ));
    }

    #[test]
    fn test_extract_without_events() {
        assert!(matches!(
            extract_record_id(&receipt(vec![])),
            Err(LedgerError::EventNotFound { tx_hash }) if tx_hash == TxHash([7u8; 32])
        ));
    }

    #[test]
    fn test_settle_reverted() {
        let mut r = receipt(vec![]);
        r.status = TxStatus::Reverted {
            reason: "empty pointer".to_string(),
        };
        let err = settle(&r).unwrap_err();
        assert!(matches!(err, LedgerError::Rejected { retryable: false, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_receipt_wire_format() {
        let json = serde_json::json!({
            "txHash": format!("0x{}", "07".repeat(32)),
            "block": 3,
            "status": "success",
            "events": [
                {"event": "Transfer", "from": "0x0"},
                {
                    "event": "RecordCreated",
                    "txHash": format!("0x{}", "07".repeat(32)),
                    "recordId": 9,
                    "owner": format!("0x{}", "01".repeat(32)),
                }
            ]
        });

        let parsed: Receipt = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.events[0], LedgerEvent::Unknown);
        assert_eq!(settle(&parsed).unwrap().record_id, RecordId(9));
    }

    #[test]
    fn test_pointer_validation() {
        let ok = RecordPointer::Metadata {
            uri: "ipfs://QmMeta".to_string(),
            content_address: None,
        };
        assert!(ok.validate().is_ok());

        let bare = RecordPointer::Metadata {
            uri: "ipfs://".to_string(),
            content_address: None,
        };
        assert!(bare.validate().is_err());

        let direct = RecordPointer::Direct {
            file_name: String::new(),
            content_address: ContentAddress::parse("QmFile").unwrap(),
        };
        assert!(direct.validate().is_err());
    }

    #[test]
    fn test_pointer_content_address() {
        let address = ContentAddress::parse("QmFile").unwrap();
        let direct = RecordPointer::Direct {
            file_name: "a.txt".to_string(),
            content_address: address.clone(),
        };
        assert_eq!(direct.content_address(), Some(&address));

        let json = serde_json::to_value(&direct).unwrap();
        assert_eq!(json["kind"], "direct");
        assert_eq!(json["content_address"], "QmFile");
    }

    #[test]
    fn test_hex_ids() {
        let owner = Owner([0xab; 32]);
        let json = serde_json::to_string(&owner).unwrap();
        let back: Owner = serde_json::from_str(&json).unwrap();
        assert_eq!(back, owner);
        assert!(Owner::from_hex("0x1234").is_err());
        assert_eq!("17".parse::<RecordId>().unwrap(), RecordId(17));
    }
}
