use thiserror::Error;

/// Validation and contract errors exposed by `marketpulse-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("instrument code cannot be empty")]
    EmptyCode,
    #[error("instrument code '{code}' must be 6 ASCII digits")]
    InvalidCode { code: String },
    #[error("invalid exchange suffix '{value}', expected one of SH, SZ, BJ")]
    InvalidExchange { value: String },
    #[error("invalid instrument kind '{value}', expected stock or fund")]
    InvalidKind { value: String },
    #[error("invalid instrument id '{value}', expected <code>.<exchange>")]
    InvalidInstrumentId { value: String },

    #[error("invalid trade date '{value}', expected YYYY-MM-DD")]
    InvalidDate { value: String },
    #[error("invalid time of day '{value}', expected HH:MM")]
    InvalidTimeOfDay { value: String },
    #[error("session window start {start} must be before end {end}")]
    InvalidSessionWindow { start: String, end: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },

    #[error("bar high must be >= low")]
    InvalidBarRange,
    #[error("bar open/close must be within high/low range")]
    InvalidBarBounds,
}

/// Top-level error type for loading reference data.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
