//! Route handlers

use super::{ApiError, AppState};
use crate::ledger::{RecordId, TxHash};
use crate::pipeline::{
    FileInfo, OwnedFile, PublishOutcome, ResolveError, SessionError, UploadSession,
};
use crate::storage::ContentAddress;
use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::{json, Value};

const UPLOAD_FIELD: &str = "file";

/// `POST /upload-file` response, descriptive scheme
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptiveUpload {
    pub file_name: String,
    pub file_hash: String,
    pub file_ipfs_hash: ContentAddress,
    pub metadata_ipfs_hash: ContentAddress,
    pub token_id: RecordId,
    pub transaction_hash: TxHash,
    #[serde(rename = "tokenURI")]
    pub token_uri: String,
    pub file_url: String,
    pub metadata_url: String,
}

/// `POST /upload-file` response, direct scheme
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectUpload {
    pub file_name: String,
    pub file_hash: String,
    pub ipfs_hash: ContentAddress,
    pub record_id: RecordId,
    pub transaction_hash: TxHash,
    pub file_url: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UploadResponse {
    Descriptive(DescriptiveUpload),
    Direct(DirectUpload),
}

impl From<PublishOutcome> for UploadResponse {
    fn from(outcome: PublishOutcome) -> Self {
        let file_hash = outcome.digest.to_hex();
        match (outcome.metadata_address, outcome.token_uri, outcome.metadata_url) {
            (Some(metadata_ipfs_hash), Some(token_uri), Some(metadata_url)) => {
                UploadResponse::Descriptive(DescriptiveUpload {
                    file_name: outcome.file_name,
                    file_hash,
                    file_ipfs_hash: outcome.content_address,
                    metadata_ipfs_hash,
                    token_id: outcome.record_id,
                    transaction_hash: outcome.tx_hash,
                    token_uri,
                    file_url: outcome.file_url,
                    metadata_url,
                })
            }
            _ => UploadResponse::Direct(DirectUpload {
                file_name: outcome.file_name,
                file_hash,
                ipfs_hash: outcome.content_address,
                record_id: outcome.record_id,
                transaction_hash: outcome.tx_hash,
                file_url: outcome.file_url,
            }),
        }
    }
}

pub(super) async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        log::warn!("Malformed multipart upload: {}", e);
        ApiError::bad_request("malformed upload")
    })? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let mime_type = field.content_type().map(str::to_string);

        let session = UploadSession::from_stream(
            &state.upload_dir,
            &file_name,
            mime_type.as_deref(),
            field,
            state.max_upload_bytes,
        )
        .await
        .map_err(|e| match e {
            SessionError::TooLarge { limit } => ApiError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("file exceeds {} bytes", limit),
            ),
            SessionError::Body(reason) => {
                log::warn!("Upload of {:?} interrupted: {}", file_name, reason);
                ApiError::bad_request("upload interrupted")
            }
            SessionError::Io(e) => {
                log::error!("Cannot spool upload {:?}: {}", file_name, e);
                ApiError::internal("failed to process file")
            }
        })?;

        // Failures are logged with their stage by the pipeline
        let outcome = state
            .publish
            .publish(session)
            .await
            .map_err(|_| ApiError::internal("failed to process file"))?;

        return Ok(Json(UploadResponse::from(outcome)));
    }

    Err(ApiError::bad_request("no file uploaded"))
}

pub(super) async fn download_file(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Response, ApiError> {
    // Nothing can reference a malformed address
    let address =
        ContentAddress::parse(address).map_err(|_| ApiError::not_found("file not found"))?;

    let download = state
        .resolve
        .download(&address)
        .await
        .map_err(|e| resolve_failure(e, "failed to download file"))?;

    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&download.file_name)
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(download.stream),
    )
        .into_response())
}

pub(super) async fn file_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileInfo>, ApiError> {
    let id: RecordId = id
        .parse()
        .map_err(|_| ApiError::bad_request("invalid file id"))?;

    state
        .resolve
        .info(id)
        .await
        .map(Json)
        .map_err(|e| resolve_failure(e, "failed to look up file"))
}

pub(super) async fn my_files(
    State(state): State<AppState>,
) -> Result<Json<Vec<OwnedFile>>, ApiError> {
    state
        .resolve
        .my_files()
        .await
        .map(Json)
        .map_err(|e| resolve_failure(e, "failed to list files"))
}

pub(super) async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn resolve_failure(e: ResolveError, message: &str) -> ApiError {
    match e {
        ResolveError::NotFound(what) => {
            log::debug!("Not found: {}", what);
            ApiError::not_found("file not found")
        }
        other => {
            log::error!("{}: {}", message, other);
            ApiError::internal(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::Digest;
    use crate::metadata::MetadataBuilder;
    use crate::pipeline::StorageScheme;
    use chrono::{TimeZone, Utc};

    fn outcome(scheme: StorageScheme) -> PublishOutcome {
        let content = ContentAddress::parse("QmFile").unwrap();
        let meta = ContentAddress::parse("QmMeta").unwrap();
        let descriptive = scheme == StorageScheme::Descriptive;
        PublishOutcome {
            scheme,
            file_name: "a.txt".to_string(),
            digest: Digest::of(b"abc"),
            metadata: MetadataBuilder::default()
                .build(
                    "a.txt",
                    3,
                    "text/plain",
                    &content,
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                )
                .unwrap(),
            file_url: "https://gw/ipfs/QmFile".to_string(),
            content_address: content,
            metadata_address: descriptive.then(|| meta.clone()),
            record_id: RecordId(7),
            tx_hash: TxHash([1u8; 32]),
            token_uri: descriptive.then(|| "ipfs://QmMeta".to_string()),
            metadata_url: descriptive.then(|| "https://gw/ipfs/QmMeta".to_string()),
        }
    }

    #[test]
    fn test_descriptive_response_fields() {
        let json = serde_json::to_value(UploadResponse::from(outcome(StorageScheme::Descriptive)))
            .unwrap();
        assert_eq!(json["fileName"], "a.txt");
        assert_eq!(json["fileHash"], Digest::of(b"abc").to_hex());
        assert_eq!(json["fileIpfsHash"], "QmFile");
        assert_eq!(json["metadataIpfsHash"], "QmMeta");
        assert_eq!(json["tokenId"], 7);
        assert_eq!(json["tokenURI"], "ipfs://QmMeta");
        assert_eq!(json["metadataUrl"], "https://gw/ipfs/QmMeta");
        assert!(json["transactionHash"].as_str().unwrap().starts_with("0x"));
    }

    #[test]
    fn test_direct_response_fields() {
        let json =
            serde_json::to_value(UploadResponse::from(outcome(StorageScheme::Direct))).unwrap();
        assert_eq!(json["ipfsHash"], "QmFile");
        assert_eq!(json["recordId"], 7);
        assert!(json.get("tokenId").is_none());
        assert!(json.get("metadataIpfsHash").is_none());
        assert!(json.get("tokenURI").is_none());
    }

    #[test]
    fn test_resolve_failure_status() {
        assert_eq!(
            resolve_failure(ResolveError::NotFound("x".to_string()), "m").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            resolve_failure(ResolveError::Unresolvable(RecordId(1)), "m").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
