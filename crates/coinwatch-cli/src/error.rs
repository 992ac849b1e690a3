use std::time::Duration;

use coinwatch_core::{AdmissionError, CoreError, RefreshError, ResolveError, ValidationError};
use coinwatch_store::DuckStoreError;
use thiserror::Error;

/// Exit code of `health` when the report is unhealthy. The report itself is
/// printed, not an error body.
pub const EXIT_UNHEALTHY: u8 = 6;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] DuckStoreError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Command(_) => 2,
            Self::Admission(_) => 3,
            Self::Resolve(_) => 4,
            Self::Refresh(RefreshError::Upstream(_)) => 4,
            Self::Refresh(RefreshError::Store(_)) => 5,
            Self::Core(CoreError::Validation(_)) => 2,
            Self::Core(_) | Self::Store(_) => 5,
            Self::Serialization(_) | Self::Io(_) => 10,
        }
    }

    /// Machine-readable code for the error body.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::Command(_) => "VALIDATION_ERROR",
            Self::Admission(error) => error.code(),
            Self::Resolve(error) => error.code(),
            Self::Refresh(error) => error.code(),
            Self::Core(error) => error.code(),
            Self::Store(_) => "DATABASE_ERROR",
            Self::Serialization(_) | Self::Io(_) => "INTERNAL_ERROR",
        }
    }

    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Admission(error) => error.retry_after(),
            _ => None,
        }
    }
}
