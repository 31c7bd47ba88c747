//! Configuration management for the Gallery CDN server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Default chunk size: 3.5MB, safely below a 4MB per-request ceiling
pub const DEFAULT_CHUNK_SIZE: usize = 3_670_016;

/// Maximum file size: 500MB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Default retention window for stored files
pub const DEFAULT_RETENTION_DAYS: i64 = 14;

/// Upper bound for `FILE_RETENTION_DAYS` (ten years)
pub const MAX_RETENTION_DAYS: i64 = 3650;

/// Upper bound for `UPLOAD_SESSION_TTL_SECS` (thirty days)
pub const MAX_SESSION_TTL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required variable {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },

    #[error("{name} exceeds the maximum of {max}")]
    OutOfRange { name: &'static str, max: u64 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub upload: UploadConfig,
    pub registry: RegistryConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
    /// Tag of the single container (bucket) holding every asset
    pub container: String,
    /// Base URL blobs are publicly served from
    pub public_base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Memory,
    Minio,
    R2,
    S3,
    B2,
}

impl StorageProvider {
    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "minio" => StorageProvider::Minio,
            "r2" => StorageProvider::R2,
            "s3" => StorageProvider::S3,
            "b2" => StorageProvider::B2,
            _ => StorageProvider::Memory,
        }
    }

    /// Whether this provider speaks the S3 API
    pub fn is_s3_compatible(&self) -> bool {
        !matches!(self, StorageProvider::Memory)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub chunk_size: usize,
    pub max_file_size: u64,
    pub chunk_dir: PathBuf,
    /// Idle time after which an unfinished session may be swept. `None` keeps
    /// abandoned sessions until restart or manual cancel.
    pub session_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub retention_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub api_token: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            chunk_dir: PathBuf::from("./data/chunks"),
            session_ttl_secs: None,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                provider: StorageProvider::Memory,
                endpoint: "http://localhost:9000".to_string(),
                access_key: "admin".to_string(),
                secret_key: "password123".to_string(),
                region: Some("us-east-1".to_string()),
                container: "gallery-cdn".to_string(),
                public_base_url: "http://localhost:9000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite:./gallery-cdn.db".to_string(),
            },
            upload: UploadConfig::default(),
            registry: RegistryConfig::default(),
            auth: AuthConfig { api_token: None },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let provider = lookup("BLOB_PROVIDER")
            .map(|value| StorageProvider::parse(&value))
            .unwrap_or(StorageProvider::Memory);

        let required = |name: &'static str| lookup(name).ok_or(ConfigError::Missing(name));
        let parsed = |name: &'static str| lookup(name).map(|value| value.trim().to_string());

        // S3 credentials are only mandatory when an S3 provider is selected
        let (endpoint, access_key, secret_key) = if provider.is_s3_compatible() {
            (
                required("S3_ENDPOINT")?,
                required("S3_ACCESS_KEY")?,
                required("S3_SECRET_KEY")?,
            )
        } else {
            (
                defaults.storage.endpoint,
                defaults.storage.access_key,
                defaults.storage.secret_key,
            )
        };

        let session_ttl_secs = match parse_number::<u64>("UPLOAD_SESSION_TTL_SECS", parsed)? {
            Some(ttl) if ttl > MAX_SESSION_TTL_SECS => {
                return Err(ConfigError::OutOfRange {
                    name: "UPLOAD_SESSION_TTL_SECS",
                    max: MAX_SESSION_TTL_SECS,
                })
            }
            ttl => ttl.filter(|ttl| *ttl > 0),
        };

        let retention_days = match parse_number::<i64>("FILE_RETENTION_DAYS", parsed)? {
            Some(days) if days > MAX_RETENTION_DAYS => {
                return Err(ConfigError::OutOfRange {
                    name: "FILE_RETENTION_DAYS",
                    max: MAX_RETENTION_DAYS as u64,
                })
            }
            Some(days) if days > 0 => days,
            _ => DEFAULT_RETENTION_DAYS,
        };

        Ok(Config {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_number("SERVER_PORT", parsed)?.unwrap_or(3000),
            },
            storage: StorageConfig {
                provider,
                endpoint,
                access_key,
                secret_key,
                region: lookup("S3_REGION"),
                container: lookup("BLOB_CONTAINER")
                    .unwrap_or_else(|| defaults.storage.container.clone()),
                public_base_url: lookup("BLOB_PUBLIC_BASE_URL")
                    .unwrap_or_else(|| defaults.storage.public_base_url.clone()),
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            upload: UploadConfig {
                chunk_size: parse_number("UPLOAD_CHUNK_SIZE", parsed)?
                    .filter(|size: &usize| *size > 0)
                    .unwrap_or(DEFAULT_CHUNK_SIZE),
                max_file_size: parse_number("UPLOAD_MAX_FILE_SIZE", parsed)?
                    .unwrap_or(DEFAULT_MAX_FILE_SIZE),
                chunk_dir: lookup("UPLOAD_CHUNK_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.upload.chunk_dir),
                session_ttl_secs,
            },
            registry: RegistryConfig { retention_days },
            auth: AuthConfig {
                api_token: lookup("UPLOAD_API_TOKEN").filter(|t| !t.is_empty()),
            },
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    name: &'static str,
    lookup: impl Fn(&'static str) -> Option<String>,
) -> Result<Option<T>, ConfigError> {
    lookup(name)
        .map(|value| value.parse().map_err(|_| ConfigError::Invalid { name, value }))
        .transpose()
}
