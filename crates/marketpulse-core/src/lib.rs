//! # Marketpulse Core
//!
//! Bar ingestion, intraday merge, and signal computation for a stock and ETF
//! universe.
//!
//! ## Overview
//!
//! - **Domain models** for instruments, daily bars, series, snapshots, and signals
//! - **Provider contracts** ([`MarketDataProvider`], [`QuoteSource`]) and adapters
//! - **Rate limiting** over a trailing window shared by every provider caller
//! - **Full refresh** with a compensation pass for transient failures
//! - **Realtime merge** of snapshots into the trailing bar
//! - **Strategies** evaluated on the last bar of each series
//! - **Trading calendar** and a **scheduler** with singleton jobs and misfire grace
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Eastmoney HTTP adapter and the offline synthetic provider |
//! | [`calendar`] | Trading days and trading windows in market local time |
//! | [`circuit_breaker`] | Circuit breaker for resilient upstream calls |
//! | [`config`] | Pipeline configuration and environment overrides |
//! | [`cycle`] | Cycle kinds, job slots, cycle summaries |
//! | [`domain`] | Domain models |
//! | [`fetch`] | Full-refresh orchestration |
//! | [`merge`] | Snapshot merge into cached series |
//! | [`pipeline`] | The service that owns the components and runs cycles |
//! | [`rate_limiter`] | Trailing-window rate limiter |
//! | [`realtime`] | Realtime snapshot pass |
//! | [`scheduler`] | Timer-driven job scheduler |
//! | [`signal`] | Strategy evaluation and signal persistence |
//! | [`store`] | Series, signal, and cycle storage contracts |
//! | [`strategy`] | Strategy trait, registry, built-in strategies |
//! | [`universe`] | Instrument universe and holiday loaders |
//! | [`warehouse_store`] | Stores backed by the DuckDB warehouse |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   fires    ┌──────────────┐
//! │  Scheduler  │──────────▶│   Pipeline   │◀── manual triggers
//! └─────────────┘            └──────┬───────┘
//!                 ┌─────────────────┼──────────────────┐
//!                 ▼                 ▼                  ▼
//!       ┌──────────────────┐ ┌──────────────┐ ┌───────────────┐
//!       │ FetchOrchestrator│ │RealtimeMerger│ │ SignalEngine  │
//!       └────────┬─────────┘ └──────┬───────┘ └───────┬───────┘
//!                │   RateLimiter    │                 │
//!                ▼                  ▼                 ▼
//!       ┌─────────────────────────────────────────────────────┐
//!       │        SeriesStore / SignalStore / CycleLog          │
//!       └─────────────────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod calendar;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod cycle;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod http_client;
pub mod merge;
pub mod pipeline;
pub mod rate_limiter;
pub mod realtime;
pub mod scheduler;
pub mod signal;
pub mod source;
pub mod store;
pub mod strategy;
pub mod universe;
pub mod warehouse_store;

// Adapter implementations
pub use adapters::{EastmoneyAdapter, EastmoneyConfig, SyntheticAdapter};

// Calendar and scheduling
pub use calendar::{CalendarConfig, CalendarStatus, SessionWindow, TradingCalendar};
pub use clock::{Clock, SystemClock, TokioClock};
pub use cycle::{CycleKind, CycleStatus, CycleSummary, TriggerSource};
pub use scheduler::{ScheduleConfig, ScheduledJob, Scheduler, Trigger};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

// Configuration
pub use config::{ConfigError, PipelineConfig};

// Domain models
pub use domain::{
    Bar, ExchangeSuffix, Instrument, InstrumentKind, RealtimeSnapshot, Series, SignalRecord,
};

// Error types
pub use error::{CoreError, ValidationError};

// Pipeline components
pub use fetch::{FailedInstrument, FetchConfig, FetchError, FetchOrchestrator, FetchReport};
pub use merge::{MergeConfig, MergeEngine, MergeError, MergeOutcome};
pub use pipeline::{CycleConfig, Pipeline, PipelineParts};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use realtime::{RealtimeConfig, RealtimeMerger, RealtimeReport};
pub use signal::{SignalEngine, SignalError, SignalReport};

// HTTP client types
pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};

// Provider contracts
pub use source::{FailureClass, MarketDataProvider, QuoteSource, SourceError, SourceErrorKind};

// Storage
pub use store::{
    CycleLog, MemoryCycleLog, MemorySeriesStore, MemorySignalStore, SeriesStore, SignalStore,
    StoreError,
};
pub use warehouse_store::{WarehouseCycleLog, WarehouseSeriesStore, WarehouseSignalStore};

// Strategies
pub use strategy::{Strategy, StrategyError, StrategyEvent, StrategyRegistry};

// Warehouse (re-exported from marketpulse-warehouse)
pub use marketpulse_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
