use thiserror::Error;

/// Validation and contract errors exposed by `coinwatch-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },
    #[error("symbol '{symbol}' is not part of the supported catalog")]
    UnsupportedSymbol { symbol: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("unix timestamp {value} is out of range")]
    TimestampOutOfRange { value: i64 },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },

    #[error("credential label cannot be empty")]
    EmptyCredentialLabel,

    #[error("configuration '{field}' must be greater than zero")]
    ZeroConfigValue { field: &'static str },
    #[error("upstream backoff schedule cannot be empty when retries are enabled")]
    EmptyBackoffSchedule,
}

impl ValidationError {
    pub const fn code(&self) -> &'static str {
        "VALIDATION_ERROR"
    }

    pub const fn status(&self) -> u16 {
        400
    }
}

/// Top-level error type for core operations that are not caller-facing
/// admission or resolution failures.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Store(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "INTERNAL_ERROR",
        }
    }

    pub const fn status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Store(_) | Self::Serialization(_) => 500,
        }
    }
}
