//! SQLite-backed registry store

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use super::record::FileRecord;
use super::store::RegistryStore;
use super::RegistryError;

/// Row as stored in the `files` table
#[derive(Debug, sqlx::FromRow)]
struct FileRow {
    id: String,
    original_name: String,
    stored_name: String,
    size: i64,
    mime_type: String,
    upload_date: String,
    expiry_date: String,
    blob_url: String,
    compressed: bool,
    compression_ratio: Option<f64>,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = RegistryError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        let size = u64::try_from(row.size)
            .map_err(|_| RegistryError::Invalid(format!("negative size for {}", row.id)))?;

        let record = FileRecord {
            upload_date: parse_timestamp(&row.upload_date)?,
            expiry_date: parse_timestamp(&row.expiry_date)?,
            id: row.id,
            original_name: row.original_name,
            stored_name: row.stored_name,
            size,
            mime_type: row.mime_type,
            blob_url: row.blob_url,
            compressed: row.compressed,
            compression_ratio: row.compression_ratio,
        };
        record.validate()?;
        Ok(record)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RegistryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RegistryError::Invalid(format!("bad timestamp {:?}: {}", value, e)))
}

fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, original_name, stored_name, size, mime_type,
           upload_date, expiry_date, blob_url, compressed, compression_ratio
    FROM files
"#;

/// Registry store on the server's SQLite pool
#[derive(Clone)]
pub struct SqliteRegistryStore {
    pool: SqlitePool,
}

impl SqliteRegistryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<FileRecord>, RegistryError> {
        let row = sqlx::query_as::<_, FileRow>(&format!("{} WHERE {} = ?", SELECT_COLUMNS, clause))
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(FileRecord::try_from).transpose()
    }
}

#[async_trait::async_trait]
impl RegistryStore for SqliteRegistryStore {
    async fn insert(&self, record: &FileRecord) -> Result<(), RegistryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO files (id, original_name, stored_name, size, mime_type,
                               upload_date, expiry_date, blob_url, compressed, compression_ratio)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.original_name)
        .bind(&record.stored_name)
        .bind(record.size as i64)
        .bind(&record.mime_type)
        .bind(format_timestamp(&record.upload_date))
        .bind(format_timestamp(&record.expiry_date))
        .bind(&record.blob_url)
        .bind(record.compressed)
        .bind(record.compression_ratio)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::DuplicateId(record.id.clone()));
        }

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>, RegistryError> {
        self.fetch_one_where("id", id).await
    }

    async fn find_by_stored_name(
        &self,
        stored_name: &str,
    ) -> Result<Option<FileRecord>, RegistryError> {
        self.fetch_one_where("stored_name", stored_name).await
    }

    async fn remove(&self, id: &str) -> Result<bool, RegistryError> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn all(&self) -> Result<Vec<FileRecord>, RegistryError> {
        let rows = sqlx::query_as::<_, FileRow>(SELECT_COLUMNS)
            .fetch_all(&self.pool)
            .await?;

        // Rows failing validation are skipped, not fatal
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                match FileRecord::try_from(row) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        tracing::warn!(id = %id, error = %e, "Skipping invalid registry row");
                        None
                    }
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::record_at;
    use chrono::Duration;

    async fn store() -> SqliteRegistryStore {
        let pool = crate::db::create_pool("sqlite::memory:").await.unwrap();
        SqliteRegistryStore::new(pool)
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let store = store().await;
        let mut record = record_at("a", Utc::now(), Duration::days(14));
        record.compressed = true;
        record.compression_ratio = Some(0.4);
        store.insert(&record).await.unwrap();

        let fetched = store.get("a").await.unwrap().unwrap();
        assert_eq!(fetched.stored_name, record.stored_name);
        assert_eq!(fetched.compression_ratio, Some(0.4));
        // Microsecond precision survives the round trip through TEXT
        assert_eq!(
            fetched.upload_date.timestamp_micros(),
            record.upload_date.timestamp_micros()
        );

        let by_name = store.find_by_stored_name(&record.stored_name).await.unwrap();
        assert_eq!(by_name.map(|r| r.id), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_duplicate_id() {
        let store = store().await;
        let record = record_at("a", Utc::now(), Duration::days(14));
        store.insert(&record).await.unwrap();

        let mut dup = record.clone();
        dup.stored_name = "another-name.png".to_string();
        assert!(matches!(
            store.insert(&dup).await,
            Err(RegistryError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_and_all() {
        let store = store().await;
        store.insert(&record_at("a", Utc::now(), Duration::days(14))).await.unwrap();
        store.insert(&record_at("b", Utc::now(), Duration::days(14))).await.unwrap();

        assert!(store.remove("a").await.unwrap());
        assert!(!store.remove("a").await.unwrap());

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "b");
    }

    #[tokio::test]
    async fn test_invalid_rows_are_skipped() {
        let store = store().await;
        store.insert(&record_at("good", Utc::now(), Duration::days(14))).await.unwrap();

        sqlx::query(
            r#"
            INSERT INTO files (id, original_name, stored_name, size, mime_type,
                               upload_date, expiry_date, blob_url, compressed)
            VALUES ('bad', 'x.png', 'x.png', 1, 'image/png', 'yesterday', 'tomorrow', '', 0)
            "#,
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(store.get("bad").await.is_err());
    }
}
