use coinwatch_core::StoreError;
use thiserror::Error;

/// Errors raised by the `DuckDB` store.
#[derive(Debug, Error)]
pub enum DuckStoreError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid stored data: {0}")]
    InvalidData(String),

    #[error("store task failed: {0}")]
    Task(String),
}

impl From<DuckStoreError> for StoreError {
    fn from(error: DuckStoreError) -> Self {
        StoreError::Unavailable(error.to_string())
    }
}
