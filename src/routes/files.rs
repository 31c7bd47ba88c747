//! File routes
//!
//! Registry listing and deletion under `/api/v1/files`, and public
//! resolution of stored names under `/files`.

use axum::{
    extract::{Path, State},
    Extension,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{delete, get},
    Json, Router,
};

use crate::auth::{require_authorized, CallerRole};
use crate::error::{AppError, Result};
use crate::registry::FileRecord;
use crate::state::AppState;

/// Create the registry API router
pub fn api_router(state: &AppState) -> Router<AppState> {
    Router::new().route("/", get(list_files)).route(
        "/:id",
        delete(delete_file).route_layer(middleware::from_fn_with_state(
            state.authorizer(),
            require_authorized,
        )),
    )
}

/// Create the public resolution router
pub fn public_router() -> Router<AppState> {
    Router::new().route("/:stored_name", get(resolve_file))
}

/// GET /api/v1/files
///
/// Live records, newest first. Expired records are collected first.
async fn list_files(State(state): State<AppState>) -> Json<Vec<FileRecord>> {
    Json(state.registry().list().await)
}

/// DELETE /api/v1/files/:id
///
/// Registry-only: the blob stays where it is.
async fn delete_file(
    State(state): State<AppState>,
    Extension(CallerRole(role)): Extension<CallerRole>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    if state.registry().delete(&id).await? {
        tracing::info!(
            file_id = %id,
            role = role.as_deref().unwrap_or("unknown"),
            "File record deleted"
        );
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("File not found: {}", id)))
    }
}

/// GET /files/:stored_name
///
/// Redirects to the blob URL while the record is live. Missing and expired
/// names get the same generic 404.
async fn resolve_file(
    State(state): State<AppState>,
    Path(stored_name): Path<String>,
) -> Response {
    match state.resolver().resolve(&stored_name).await {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(e) => {
            tracing::debug!(error = %e, "Resolution failed");
            AppError::NotFound("File not found".to_string()).into_response()
        }
    }
}
