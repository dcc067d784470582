//! Provider contracts consumed by the pipeline.
//!
//! | Trait | Call | Description |
//! |-------|------|-------------|
//! | [`MarketDataProvider`] | `get_bars(instrument, start, end)` | Daily bar history, rate limited |
//! | [`QuoteSource`] | `get_snapshot(instrument)` | Realtime quote, may be absent |
//!
//! Both traits return boxed futures so adapters can be shared as
//! `Arc<dyn MarketDataProvider>` across the orchestrator's worker tasks.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use time::Date;

use crate::{Bar, Instrument, RealtimeSnapshot};

pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceErrorKind {
    /// Network failure before a response arrived.
    Transport,
    /// The call exceeded its deadline.
    Timeout,
    /// Provider-side throttling, detected from response content.
    Throttled,
    /// Non-success status or open circuit.
    Unavailable,
    /// The provider answered with no rows.
    Empty,
    /// The payload could not be decoded at all.
    Malformed,
    /// The provider does not know the instrument.
    NotFound,
    /// Fewer bars than the caller requires.
    InsufficientHistory,
    /// Individual rows carried invalid fields.
    InvalidData,
}

/// How the orchestrator treats a failed instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth another attempt in the compensation pass.
    Transient,
    /// Retrying will not help; the instrument is skipped for this cycle.
    DataQuality,
}

/// Structured provider error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Transport, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Timeout, message)
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Throttled, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Unavailable, message)
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Empty, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Malformed, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::NotFound, message)
    }

    pub fn insufficient_history(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::InsufficientHistory, message)
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::InvalidData, message)
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn class(&self) -> FailureClass {
        match self.kind {
            SourceErrorKind::Transport
            | SourceErrorKind::Timeout
            | SourceErrorKind::Throttled
            | SourceErrorKind::Unavailable
            | SourceErrorKind::Empty
            | SourceErrorKind::Malformed => FailureClass::Transient,
            SourceErrorKind::NotFound
            | SourceErrorKind::InsufficientHistory
            | SourceErrorKind::InvalidData => FailureClass::DataQuality,
        }
    }

    pub const fn retryable(&self) -> bool {
        matches!(self.class(), FailureClass::Transient)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Transport => "source.transport",
            SourceErrorKind::Timeout => "source.timeout",
            SourceErrorKind::Throttled => "source.throttled",
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::Empty => "source.empty",
            SourceErrorKind::Malformed => "source.malformed",
            SourceErrorKind::NotFound => "source.not_found",
            SourceErrorKind::InsufficientHistory => "source.insufficient_history",
            SourceErrorKind::InvalidData => "source.invalid_data",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Rate-limited daily bar provider.
///
/// Implementations must be `Send + Sync`; the orchestrator calls them from many
/// concurrent tasks and gates every call through the shared
/// [`RateLimiter`](crate::RateLimiter) itself.
pub trait MarketDataProvider: Send + Sync {
    /// Short provider identifier used in logs.
    fn id(&self) -> &'static str;

    /// Fetch daily bars for `instrument` between `start` and `end`, inclusive.
    fn get_bars<'a>(
        &'a self,
        instrument: &'a Instrument,
        start: Date,
        end: Date,
    ) -> SourceFuture<'a, Vec<Bar>>;
}

/// Realtime quote collaborator; `Ok(None)` means the instrument has no quote now
/// (suspended, not yet traded).
pub trait QuoteSource: Send + Sync {
    fn get_snapshot<'a>(
        &'a self,
        instrument: &'a Instrument,
    ) -> SourceFuture<'a, Option<RealtimeSnapshot>>;
}
