use thiserror::Error;
use tokio_postgres::error::SqlState;
use tonic::Status;

/// Failures surfaced to callers of the platform services.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Failures of the recent-log cache. Never fatal on write paths.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("key {0} holds a value of another type")]
    WrongType(String),

    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cached payload is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl PlatformError {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        PlatformError::NotFound(format!("{entity} {id} not found"))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, PlatformError::Conflict(_))
    }
}

impl From<tokio_postgres::Error> for PlatformError {
    fn from(e: tokio_postgres::Error) -> Self {
        match e.code() {
            Some(code) if *code == SqlState::UNIQUE_VIOLATION => {
                let detail = e
                    .as_db_error()
                    .and_then(|db| db.constraint().map(str::to_string))
                    .unwrap_or_else(|| "unique constraint".to_string());
                PlatformError::Conflict(format!("duplicate value violates {detail}"))
            }
            Some(code) if *code == SqlState::FOREIGN_KEY_VIOLATION => {
                PlatformError::NotFound("referenced application not found".to_string())
            }
            _ => PlatformError::Unavailable(e.to_string()),
        }
    }
}

impl From<deadpool_postgres::PoolError> for PlatformError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        PlatformError::Unavailable(format!("failed to get connection: {e}"))
    }
}

impl From<PlatformError> for Status {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::NotFound(msg) => Status::not_found(msg),
            PlatformError::Conflict(msg) => Status::already_exists(msg),
            PlatformError::InvalidArgument(msg) => Status::invalid_argument(msg),
            PlatformError::Unavailable(msg) => Status::unavailable(msg),
            PlatformError::Cache(e) => Status::unavailable(e.to_string()),
        }
    }
}
