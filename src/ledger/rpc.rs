//! JSON-RPC 2.0 ledger protocol
//!
//! Wire types shared by the ledger node and [`RpcLedgerClient`]. Methods:
//!
//! | method                  | params              | result                    |
//! |-------------------------|---------------------|---------------------------|
//! | `ledger_getNonce`       | `{owner}`           | next nonce                |
//! | `ledger_submitRecord`   | `{submission}`      | tx hash                   |
//! | `ledger_getReceipt`     | `{txHash}`          | receipt, null if pending  |
//! | `ledger_getRecord`      | `{recordId}`        | record, empty if missing  |
//! | `ledger_recordsByOwner` | `{owner}`           | record ids, commit order  |
//! | `ledger_findByContent`  | `{contentAddress}`  | record id or null         |

use super::identity::{Identity, Submission, UnsignedSubmission};
use super::{
    settle, CommitReceipt, FileRecord, LedgerClient, LedgerError, LedgerResult, Owner, Receipt,
    RecordId, RecordPointer, TxHash,
};
use crate::storage::ContentAddress;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_GET_NONCE: &str = "ledger_getNonce";
pub const METHOD_SUBMIT_RECORD: &str = "ledger_submitRecord";
pub const METHOD_GET_RECEIPT: &str = "ledger_getReceipt";
pub const METHOD_GET_RECORD: &str = "ledger_getRecord";
pub const METHOD_RECORDS_BY_OWNER: &str = "ledger_recordsByOwner";
pub const METHOD_FIND_BY_CONTENT: &str = "ledger_findByContent";

/// JSON-RPC error codes
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Nonce does not match the owner's next nonce; resubmit with a fresh one
    pub const NONCE_CONFLICT: i64 = -32000;
    pub const INVALID_SIGNATURE: i64 = -32001;
    pub const WRONG_RECORD_STORE: i64 = -32002;
    /// Node-side storage failure
    pub const STORAGE: i64 = -32003;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OwnerParams {
    pub owner: Owner,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitParams {
    pub submission: Submission,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptParams {
    pub tx_hash: TxHash,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordParams {
    pub record_id: RecordId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentParams {
    pub content_address: ContentAddress,
}

/// Record as returned by `ledger_getRecord`. Unknown ids come back as an
/// empty view (no pointer, no owner, timestamp 0).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView {
    pub record_id: RecordId,
    pub pointer: Option<RecordPointer>,
    pub owner: Option<Owner>,
    pub timestamp: u64,
}

impl RecordView {
    pub fn empty(record_id: RecordId) -> Self {
        Self {
            record_id,
            pointer: None,
            owner: None,
            timestamp: 0,
        }
    }

    pub fn into_record(self) -> Option<FileRecord> {
        Some(FileRecord {
            record_id: self.record_id,
            pointer: self.pointer?,
            owner: self.owner?,
            timestamp: self.timestamp,
        })
    }
}

impl From<FileRecord> for RecordView {
    fn from(record: FileRecord) -> Self {
        Self {
            record_id: record.record_id,
            pointer: Some(record.pointer),
            owner: Some(record.owner),
            timestamp: record.timestamp,
        }
    }
}

/// RPC client configuration
#[derive(Debug, Clone)]
pub struct RpcLedgerConfig {
    pub rpc_url: String,
    /// Record store (contract) every submission is addressed to
    pub record_store: String,
    /// Transport timeout per call
    pub timeout: Duration,
    /// How long `commit` waits for a receipt
    pub receipt_timeout: Duration,
    pub poll_interval: Duration,
}

/// Ledger client speaking JSON-RPC over HTTP
pub struct RpcLedgerClient {
    http: Client,
    config: RpcLedgerConfig,
    identity: Identity,
    next_id: AtomicU64,
}

impl RpcLedgerClient {
    pub fn new(config: RpcLedgerConfig, identity: Identity) -> LedgerResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LedgerError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            config,
            identity,
            next_id: AtomicU64::new(1),
        })
    }

    /// Send one request and return its result
    async fn call<P, T>(&self, method: &str, params: P) -> LedgerResult<T>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let params = serde_json::to_value(params)
            .map_err(|e| LedgerError::InvalidResponse(format!("cannot encode params: {}", e)))?;
        let request = RpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: Value::from(self.next_id.fetch_add(1, Ordering::Relaxed)),
        };

        let response = self
            .http
            .post(&self.config.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LedgerError::Unavailable(format!("{} timed out", method))
                } else {
                    LedgerError::Unavailable(format!("{}: {}", method, e))
                }
            })?;

        if !response.status().is_success() {
            return Err(LedgerError::Unavailable(format!(
                "{}: HTTP {}",
                method,
                response.status()
            )));
        }

        let response: RpcResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(format!("{}: {}", method, e)))?;

        if let Some(error) = response.error {
            return Err(map_rpc_error(error));
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(|e| LedgerError::InvalidResponse(format!("{}: {}", method, e)))
    }

    /// Poll until the receipt shows up or the receipt timeout elapses
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> LedgerResult<Receipt> {
        let deadline = Instant::now() + self.config.receipt_timeout;
        loop {
            let receipt: Option<Receipt> = self
                .call(METHOD_GET_RECEIPT, ReceiptParams { tx_hash })
                .await?;
            if let Some(receipt) = receipt {
                return Ok(receipt);
            }
            if Instant::now() >= deadline {
                return Err(LedgerError::Unavailable(format!(
                    "no receipt for {} within {:?}",
                    tx_hash, self.config.receipt_timeout
                )));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

/// Translate a node error into the client taxonomy
pub fn map_rpc_error(error: RpcErrorObject) -> LedgerError {
    match error.code {
        codes::NONCE_CONFLICT => LedgerError::Rejected {
            reason: error.message,
            retryable: true,
        },
        codes::INVALID_SIGNATURE | codes::WRONG_RECORD_STORE | codes::INVALID_PARAMS => {
            LedgerError::Rejected {
                reason: error.message,
                retryable: false,
            }
        }
        codes::STORAGE => LedgerError::Unavailable(error.message),
        code => LedgerError::InvalidResponse(format!("rpc error {}: {}", code, error.message)),
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    fn owner(&self) -> Owner {
        self.identity.owner()
    }

    async fn commit(&self, pointer: RecordPointer) -> LedgerResult<CommitReceipt> {
        let owner = self.identity.owner();
        let nonce: u64 = self.call(METHOD_GET_NONCE, OwnerParams { owner }).await?;

        let submission = self
            .identity
            .sign(UnsignedSubmission {
                record_store: self.config.record_store.clone(),
                owner,
                nonce,
                pointer,
            })
            .map_err(|e| LedgerError::Rejected {
                reason: e.to_string(),
                retryable: false,
            })?;

        let tx_hash: TxHash = self
            .call(METHOD_SUBMIT_RECORD, SubmitParams { submission })
            .await?;
        log::debug!("Submitted {} with nonce {}", tx_hash, nonce);

        let receipt = self.wait_for_receipt(tx_hash).await?;
        settle(&receipt)
    }

    async fn get(&self, id: RecordId) -> LedgerResult<FileRecord> {
        let view: RecordView = self
            .call(METHOD_GET_RECORD, RecordParams { record_id: id })
            .await?;
        view.into_record()
            .ok_or_else(|| LedgerError::NotFound(format!("record {}", id)))
    }

    async fn list_by_owner(&self, owner: &Owner) -> LedgerResult<Vec<RecordId>> {
        self.call(METHOD_RECORDS_BY_OWNER, OwnerParams { owner: *owner })
            .await
    }

    async fn find_by_content_address(
        &self,
        address: &ContentAddress,
    ) -> LedgerResult<Option<RecordId>> {
        self.call(
            METHOD_FIND_BY_CONTENT,
            ContentParams {
                content_address: address.clone(),
            },
        )
        .await
    }
}
