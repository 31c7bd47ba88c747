//! Error types for the Gallery CDN server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::registry::RegistryError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type for the non-ingestion routes
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Blob store errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container lookup failed for {container}: {message}")]
    LookupFailed { container: String, message: String },

    #[error("Container creation failed for {container}: {message}")]
    CreateFailed { container: String, message: String },

    #[error("Upload of {name} failed: {message}")]
    UploadFailed { name: String, message: String },
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Registry(e) => {
                tracing::error!("Registry error: {}", e);
                match e {
                    RegistryError::DuplicateId(_) => (
                        StatusCode::CONFLICT,
                        "conflict",
                        "File already registered".to_string(),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "registry_error",
                        "Registry error".to_string(),
                    ),
                }
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "Database error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}
