//! Database schema initialization

use sqlx::SqlitePool;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Registry of stored files; rows only exist for confirmed blobs
CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    original_name TEXT NOT NULL,
    stored_name TEXT NOT NULL UNIQUE,
    size INTEGER NOT NULL,
    mime_type TEXT NOT NULL,
    upload_date TEXT NOT NULL,
    expiry_date TEXT NOT NULL,
    blob_url TEXT NOT NULL,
    compressed INTEGER NOT NULL DEFAULT 0,
    compression_ratio REAL
);

CREATE INDEX IF NOT EXISTS idx_files_expiry_date ON files(expiry_date);
CREATE INDEX IF NOT EXISTS idx_files_upload_date ON files(upload_date);
"#;
