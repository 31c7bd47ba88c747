//! Route modules for the Gallery CDN server

pub mod files;
pub mod health;
pub mod upload;

use axum::{routing::get, Router};

use crate::state::AppState;

/// Build the application router
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .nest("/api/v1/upload", upload::router(&state))
        .nest("/api/v1/files", files::api_router(&state))
        .nest("/files", files::public_router())
        .with_state(state)
}
