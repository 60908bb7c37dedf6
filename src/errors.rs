//! Centralized error handling for chunkyard
//!
//! Every fallible operation in the crate returns [`Result`]. Errors are grouped
//! into a small taxonomy ([`ErrorKind`]) so callers can decide whether to fix
//! their input, retry, or treat the catalog as damaged.

use thiserror::Error;

/// Main error type for chunkyard operations
#[derive(Debug, Error)]
pub enum ChunkyardError {
    /// Malformed input rejected before any storage or catalog mutation
    #[error("validation error: {0}")]
    Validation(String),

    /// A data source record in a create request failed validation
    #[error("invalid data source #{index} ('{name}'): {message}")]
    InvalidDataSource {
        index: usize,
        name: String,
        message: String,
    },

    /// Block/partition index outside the declared grid, or an unsupported selector
    #[error("address error: {0}")]
    Address(String),

    /// Underlying read/write failure, identified by the asset URI involved
    #[error("storage error at {uri}: {message}")]
    Storage { uri: String, message: String },

    /// Write contention beyond the serialization guarantee
    #[error("write contention on {key}: lock not acquired within {timeout_ms} ms")]
    Concurrency { key: String, timeout_ms: u128 },

    /// Persisted catalog state is inconsistent
    #[error("catalog integrity violation: {0}")]
    CatalogCorrupted(String),

    /// Node, part or column does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation does not apply to this structure family or adapter
    #[error("operation '{operation}' is not supported by {family} data")]
    Unsupported { operation: String, family: String },

    /// Thread pool configuration error
    #[error("thread pool error: {0}")]
    ThreadPool(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetCDF error: {0}")]
    NetCDF(#[from] netcdf::Error),

    #[error("array error: {0}")]
    Array(#[from] ndarray::ShapeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Coarse classification of a [`ChunkyardError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Address,
    Storage,
    Concurrency,
    Integrity,
    NotFound,
}

impl ChunkyardError {
    pub fn validation(message: impl Into<String>) -> Self {
        ChunkyardError::Validation(message.into())
    }

    pub fn address(message: impl Into<String>) -> Self {
        ChunkyardError::Address(message.into())
    }

    pub fn storage(uri: impl ToString, message: impl ToString) -> Self {
        ChunkyardError::Storage {
            uri: uri.to_string(),
            message: message.to_string(),
        }
    }

    pub fn unsupported(operation: &str, family: impl ToString) -> Self {
        ChunkyardError::Unsupported {
            operation: operation.to_string(),
            family: family.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChunkyardError::Validation(_)
            | ChunkyardError::InvalidDataSource { .. }
            | ChunkyardError::Json(_)
            | ChunkyardError::Array(_) => ErrorKind::Validation,
            ChunkyardError::Address(_) | ChunkyardError::Unsupported { .. } => ErrorKind::Address,
            ChunkyardError::Concurrency { .. } => ErrorKind::Concurrency,
            ChunkyardError::Database(sqlx::Error::PoolTimedOut) => ErrorKind::Concurrency,
            ChunkyardError::Database(sqlx::Error::Database(db)) if is_busy(db.as_ref()) => {
                ErrorKind::Concurrency
            }
            ChunkyardError::CatalogCorrupted(_) | ChunkyardError::Database(_) => {
                ErrorKind::Integrity
            }
            ChunkyardError::NotFound(_) => ErrorKind::NotFound,
            ChunkyardError::Storage { .. }
            | ChunkyardError::Io(_)
            | ChunkyardError::NetCDF(_)
            | ChunkyardError::Csv(_)
            | ChunkyardError::ThreadPool(_) => ErrorKind::Storage,
        }
    }

    /// Only contention errors may be retried unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Concurrency
    }
}

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6), including their extended codes.
fn is_busy(db: &dyn sqlx::error::DatabaseError) -> bool {
    db.code()
        .and_then(|code| code.parse::<i32>().ok())
        .map_or(false, |code| matches!(code & 0xff, 5 | 6))
}

/// Result type alias for chunkyard operations
pub type Result<T> = std::result::Result<T, ChunkyardError>;
