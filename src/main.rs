//! Gallery CDN Server
//!
//! Chunked upload ingestion and expiring file registry in front of an
//! S3-compatible blob store.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gallery_cdn::auth::TokenAuthorizer;
use gallery_cdn::config::{Config, StorageProvider};
use gallery_cdn::db;
use gallery_cdn::registry::{FileRegistry, SqliteRegistryStore};
use gallery_cdn::routes;
use gallery_cdn::state::AppState;
use gallery_cdn::storage::{BlobStore, MemoryBlobStore, S3BlobStore};
use gallery_cdn::upload::{ChunkStore, MemorySessionStore, UploadService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gallery_cdn=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Invalid configuration")?;

    tracing::info!("Starting Gallery CDN v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Blob provider: {:?}", config.storage.provider);
    tracing::info!("Blob container: {}", config.storage.container);

    // Initialize blob store
    let blob_store: Arc<dyn BlobStore> = match config.storage.provider {
        StorageProvider::Memory => {
            tracing::warn!("Using in-memory blob store, stored files do not survive a restart");
            Arc::new(MemoryBlobStore::new(config.storage.public_base_url.clone()))
        }
        _ => {
            tracing::info!("S3 endpoint: {}", config.storage.endpoint);
            Arc::new(S3BlobStore::new(&config.storage))
        }
    };

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    let registry = FileRegistry::new(
        Arc::new(SqliteRegistryStore::new(db_pool)),
        config.registry.retention_days,
    );

    tokio::fs::create_dir_all(&config.upload.chunk_dir)
        .await
        .with_context(|| {
            format!("Failed to create chunk directory {:?}", config.upload.chunk_dir)
        })?;

    let upload = UploadService::new(
        Arc::new(MemorySessionStore::new()),
        ChunkStore::with_local_storage(config.upload.chunk_dir.clone()),
        blob_store,
        registry,
        config.storage.container.clone(),
        config.upload.clone(),
    );

    let authorizer = TokenAuthorizer::new(config.auth.api_token.clone());
    if authorizer.is_open() {
        tracing::warn!("UPLOAD_API_TOKEN not set, uploads and deletes are open to everyone");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let app_state = AppState::new(upload, Arc::new(authorizer));

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::app(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server with graceful shutdown
    tracing::info!("Gallery CDN listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
