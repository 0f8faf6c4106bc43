//! HTTP API
//!
//! Thin axum layer over the publish and resolve pipelines. Error bodies are
//! `{"error": "..."}` with a generic message per route; details only go to
//! the log.

mod handlers;

pub use handlers::{DescriptiveUpload, DirectUpload, UploadResponse};

use crate::pipeline::{PublishPipeline, ResolvePipeline};
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

/// Room for multipart framing and small text fields on top of the file cap
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub publish: Arc<PublishPipeline>,
    pub resolve: Arc<ResolvePipeline>,
    /// Where uploads are spooled before publishing
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD))
        .unwrap_or(usize::MAX);

    Router::new()
        .route("/upload-file", post(handlers::upload_file))
        .route("/download-file/{address}", get(handlers::download_file))
        .route("/files/{id}", get(handlers::file_info))
        .route("/my-files", get(handlers::my_files))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API on an already bound listener
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("File hub listening on http://{}", addr);
    }
    axum::serve(listener, router(state)).await
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Error returned by handlers
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, payload).into_response()
    }
}
