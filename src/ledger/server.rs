//! Ledger node
//!
//! Serves the JSON-RPC protocol from [`super::rpc`] over a [`RecordBook`].
//! Every request is a `POST /`; protocol-level failures are reported in the
//! JSON-RPC error object with HTTP 200.

use super::book::{BookError, RecordBook};
use super::rpc::{
    codes, ContentParams, OwnerParams, ReceiptParams, RecordParams, RecordView, RpcErrorObject,
    RpcRequest, RpcResponse, SubmitParams, JSONRPC_VERSION, METHOD_FIND_BY_CONTENT,
    METHOD_GET_NONCE, METHOD_GET_RECEIPT, METHOD_GET_RECORD, METHOD_RECORDS_BY_OWNER,
    METHOD_SUBMIT_RECORD,
};
use axum::body::Bytes;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Build the ledger node router
pub fn router(book: Arc<RecordBook>) -> Router {
    Router::new()
        .route("/", post(handle_rpc))
        .route("/health", get(health))
        .with_state(book)
}

/// Serve the ledger node on an already bound listener
pub async fn serve(listener: TcpListener, book: Arc<RecordBook>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("Ledger node for {:?} listening on {}", book.record_store(), addr);
    }
    axum::serve(listener, router(book)).await
}

async fn health(State(book): State<Arc<RecordBook>>) -> Json<Value> {
    let height = book.height().ok();
    Json(json!({
        "status": "ok",
        "recordStore": book.record_store(),
        "height": height,
    }))
}

async fn handle_rpc(State(book): State<Arc<RecordBook>>, body: Bytes) -> Json<RpcResponse> {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return Json(RpcResponse::failure(
                Value::Null,
                codes::PARSE_ERROR,
                format!("parse error: {}", e),
            ))
        }
    };

    if request.jsonrpc != JSONRPC_VERSION {
        return Json(RpcResponse::failure(
            request.id,
            codes::INVALID_REQUEST,
            "jsonrpc must be \"2.0\"",
        ));
    }

    let RpcRequest {
        method, params, id, ..
    } = request;
    log::debug!("{} (id {})", method, id);

    // sled flushes block, keep them off the runtime threads
    let outcome = tokio::task::spawn_blocking(move || dispatch(&book, &method, params)).await;

    match outcome {
        Ok(Ok(result)) => Json(RpcResponse::success(id, result)),
        Ok(Err(error)) => Json(RpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }),
        Err(e) => {
            log::error!("RPC handler panicked: {}", e);
            Json(RpcResponse::failure(id, codes::INTERNAL_ERROR, "internal error"))
        }
    }
}

fn dispatch(book: &RecordBook, method: &str, params: Value) -> Result<Value, RpcErrorObject> {
    match method {
        METHOD_GET_NONCE => {
            let p: OwnerParams = parse_params(params)?;
            to_result(book.nonce(&p.owner).map_err(book_error)?)
        }
        METHOD_SUBMIT_RECORD => {
            let p: SubmitParams = parse_params(params)?;
            let tx_hash = book.submit(&p.submission).map_err(|e| {
                log::warn!("Submission from {} refused: {}", p.submission.body.owner, e);
                book_error(e)
            })?;
            to_result(tx_hash)
        }
        METHOD_GET_RECEIPT => {
            let p: ReceiptParams = parse_params(params)?;
            to_result(book.receipt(&p.tx_hash).map_err(book_error)?)
        }
        METHOD_GET_RECORD => {
            let p: RecordParams = parse_params(params)?;
            let view = match book.record(p.record_id).map_err(book_error)? {
                Some(record) => RecordView::from(record),
                None => RecordView::empty(p.record_id),
            };
            to_result(view)
        }
        METHOD_RECORDS_BY_OWNER => {
            let p: OwnerParams = parse_params(params)?;
            to_result(book.records_by_owner(&p.owner).map_err(book_error)?)
        }
        METHOD_FIND_BY_CONTENT => {
            let p: ContentParams = parse_params(params)?;
            to_result(book.find_by_content(&p.content_address).map_err(book_error)?)
        }
        other => Err(RpcErrorObject {
            code: codes::METHOD_NOT_FOUND,
            message: format!("unknown method: {}", other),
        }),
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, RpcErrorObject> {
    serde_json::from_value(params).map_err(|e| RpcErrorObject {
        code: codes::INVALID_PARAMS,
        message: format!("invalid params: {}", e),
    })
}

fn to_result<T: Serialize>(value: T) -> Result<Value, RpcErrorObject> {
    serde_json::to_value(value).map_err(|e| RpcErrorObject {
        code: codes::INTERNAL_ERROR,
        message: e.to_string(),
    })
}

fn book_error(e: BookError) -> RpcErrorObject {
    let code = match e {
        BookError::NonceMismatch { .. } => codes::NONCE_CONFLICT,
        BookError::InvalidSignature(_) => codes::INVALID_SIGNATURE,
        BookError::WrongRecordStore { .. } => codes::WRONG_RECORD_STORE,
        BookError::Encoding(_) | BookError::Database(_) => {
            log::error!("Record book failure: {}", e);
            codes::STORAGE
        }
    };
    RpcErrorObject {
        code,
        message: e.to_string(),
    }
}
