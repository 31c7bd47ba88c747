//! Upload Routes
//!
//! HTTP endpoints for the chunked upload protocol.
//!
//! Endpoints:
//! - POST /api/v1/upload/init - Open an upload session
//! - POST /api/v1/upload/:upload_id/chunks/:index - Upload a chunk (raw body)
//! - POST /api/v1/upload/:upload_id/complete - Assemble and store the file
//! - GET /api/v1/upload/:upload_id - Get session status
//! - DELETE /api/v1/upload/:upload_id - Cancel upload
//! - POST /api/v1/upload - Single-shot multipart upload
//!
//! Every endpoint here requires an authorized caller.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::auth::require_authorized;
use crate::registry::FileRecord;
use crate::state::AppState;
use crate::upload::{
    ChunkUploadResponse, CompleteRequest, InitRequest, InitResponse, SessionStatusResponse,
    UploadError,
};

/// Room for headers and multipart framing on top of one chunk
const BODY_LIMIT_HEADROOM: usize = 64 * 1024;

/// Optional SHA-256 hex digest of the chunk body
const CHUNK_HASH_HEADER: &str = "x-chunk-hash";

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Upload request failed");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code(),
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router(state: &AppState) -> Router<AppState> {
    let body_limit = state.upload().chunk_size() + BODY_LIMIT_HEADROOM;

    Router::new()
        .route("/", post(upload_single))
        .route("/init", post(init))
        .route("/:upload_id/chunks/:index", post(upload_chunk))
        .route("/:upload_id/complete", post(complete))
        .route("/:upload_id", get(session_status).delete(cancel))
        .route_layer(middleware::from_fn_with_state(
            state.authorizer(),
            require_authorized,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/upload/init
async fn init(
    State(state): State<AppState>,
    payload: Result<Json<InitRequest>, JsonRejection>,
) -> Result<Json<InitResponse>, UploadError> {
    let Json(request) = payload.map_err(|e| UploadError::Validation(e.body_text()))?;
    let response = state.upload().init(request).await?;
    Ok(Json(response))
}

/// POST /api/v1/upload/:upload_id/chunks/:index
///
/// The chunk data is the raw request body.
async fn upload_chunk(
    State(state): State<AppState>,
    Path((upload_id, index)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ChunkUploadResponse>, UploadError> {
    let chunk_index: usize = index
        .parse()
        .map_err(|_| UploadError::Validation(format!("Invalid chunk index: {}", index)))?;

    let expected_hash = headers
        .get(CHUNK_HASH_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let response = state
        .upload()
        .receive_chunk(&upload_id, chunk_index, &body, expected_hash)
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/upload/:upload_id/complete
///
/// The JSON body is optional; omitted fields fall back to the session.
async fn complete(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    body: Bytes,
) -> Result<Json<FileRecord>, UploadError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CompleteRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| UploadError::Validation(format!("Invalid complete request: {}", e)))?
    };

    let record = state.upload().complete(&upload_id, request).await?;
    Ok(Json(record))
}

/// GET /api/v1/upload/:upload_id
async fn session_status(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, UploadError> {
    Ok(Json(state.upload().status(&upload_id).await?))
}

/// DELETE /api/v1/upload/:upload_id
async fn cancel(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<StatusCode, UploadError> {
    state.upload().cancel(&upload_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/upload
///
/// Single-shot upload of a file smaller than one chunk, sent as the
/// multipart field `file`.
async fn upload_single(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<FileRecord>, UploadError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Validation(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        // Browsers send octet-stream when they do not know; guess from the name instead
        let mime_type = field
            .content_type()
            .filter(|mime| *mime != "application/octet-stream")
            .map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| UploadError::Validation(e.body_text()))?;

        let record = state
            .upload()
            .upload_single(&file_name, mime_type.as_deref(), data.to_vec())
            .await?;
        return Ok(Json(record));
    }

    Err(UploadError::Validation(
        "Multipart field `file` is required".to_string(),
    ))
}
