//! Batch fetch with a compensation pass.
//!
//! The orchestrator walks the universe in `batch_size` chunks, runs up to
//! `concurrency` fetches at a time inside each chunk, and gates every provider
//! call through the shared [`RateLimiter`]. Per-instrument failures are
//! collected, never propagated. After the last batch one compensation pass
//! retries the transient failures, after a cooldown and at lower concurrency.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use time::Date;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rate_limiter::RateLimiter;
use crate::source::{FailureClass, MarketDataProvider, SourceError};
use crate::store::{SeriesStore, StoreError};
use crate::{Instrument, Series};

#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Calendar days of history requested per instrument.
    pub lookback_days: u32,
    pub concurrency: usize,
    pub batch_size: usize,
    pub compensation_cooldown: Duration,
    pub compensation_concurrency: usize,
    /// Bars kept per series after a full refresh.
    pub max_series_len: usize,
    /// Fewer bars than this is a data-quality skip.
    pub min_bars: usize,
    pub series_ttl: Option<Duration>,
    /// Deadline for a single provider call, excluding the rate-limit wait.
    pub fetch_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            lookback_days: 400,
            concurrency: 8,
            batch_size: 100,
            compensation_cooldown: Duration::from_secs(30),
            compensation_concurrency: 2,
            max_series_len: 250,
            min_bars: 20,
            series_ttl: None,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// Why one instrument could not be refreshed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("failed to store series: {0}")]
    Store(#[from] StoreError),
}

impl FetchError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Source(error) => error.class(),
            Self::Store(_) => FailureClass::Transient,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Source(error) => error.code(),
            Self::Store(_) => "store.write",
        }
    }
}

/// Failed or skipped instrument as it appears in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedInstrument {
    pub instrument_id: String,
    pub code: &'static str,
    pub message: String,
}

impl FailedInstrument {
    fn new(instrument_id: &str, error: &FetchError) -> Self {
        Self {
            instrument_id: instrument_id.to_owned(),
            code: error.code(),
            message: error.to_string(),
        }
    }
}

/// Result of one `fetch_all` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    pub total: usize,
    pub success_count: usize,
    /// Instruments whose series was replaced in this run.
    pub succeeded: Vec<String>,
    /// Data-quality failures; not retried.
    pub skipped: Vec<FailedInstrument>,
    /// Transient failures still failing after compensation.
    pub failed: Vec<FailedInstrument>,
    /// Instruments the compensation pass retried.
    pub retried: Vec<String>,
    /// Subset of `retried` that succeeded.
    pub recovered: Vec<String>,
    /// Instruments never attempted because the run was cancelled.
    pub cancelled: usize,
    pub elapsed_ms: u64,
}

impl FetchReport {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed
            .iter()
            .map(|failure| failure.instrument_id.as_str())
            .collect()
    }
}

enum Attempt {
    Stored,
    Failed(FetchError),
    Cancelled,
}

pub struct FetchOrchestrator {
    provider: Arc<dyn MarketDataProvider>,
    limiter: Arc<RateLimiter>,
    store: Arc<dyn SeriesStore>,
    config: FetchConfig,
}

impl FetchOrchestrator {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        limiter: Arc<RateLimiter>,
        store: Arc<dyn SeriesStore>,
        config: FetchConfig,
    ) -> Self {
        Self {
            provider,
            limiter,
            store,
            config,
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Refresh every instrument's series as of `as_of`, replacing stored series.
    ///
    /// Cancellation is checked before each fetch starts; fetches already in
    /// flight run to completion or to their own timeout.
    pub async fn fetch_all(
        &self,
        instruments: &[Instrument],
        as_of: Date,
        cancel: &CancellationToken,
    ) -> FetchReport {
        let started = Instant::now();
        let start = as_of - time::Duration::days(i64::from(self.config.lookback_days));
        let mut report = FetchReport {
            total: instruments.len(),
            ..FetchReport::default()
        };
        let mut transient: Vec<(&Instrument, FetchError)> = Vec::new();

        let batch_size = self.config.batch_size.max(1);
        let batch_count = instruments.len().div_ceil(batch_size);
        for (batch_index, batch) in instruments.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                report.cancelled += batch.len();
                continue;
            }

            let outcomes = self
                .run_batch(batch, start, as_of, self.config.concurrency, cancel)
                .await;
            for (instrument, attempt) in outcomes {
                match attempt {
                    Attempt::Stored => {
                        report.success_count += 1;
                        report.succeeded.push(instrument.id.clone());
                    }
                    Attempt::Cancelled => report.cancelled += 1,
                    Attempt::Failed(error) => match error.class() {
                        FailureClass::Transient => transient.push((instrument, error)),
                        FailureClass::DataQuality => {
                            debug!(instrument = %instrument.id, error = %error, "instrument skipped");
                            report.skipped.push(FailedInstrument::new(&instrument.id, &error));
                        }
                    },
                }
            }
            debug!(
                batch = batch_index + 1,
                batches = batch_count,
                succeeded = report.success_count,
                "fetch batch finished"
            );
        }

        if !transient.is_empty() {
            self.compensate(transient, start, as_of, cancel, &mut report)
                .await;
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            total = report.total,
            succeeded = report.success_count,
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            recovered = report.recovered.len(),
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed_ms,
            "full refresh fetch finished"
        );
        report
    }

    async fn compensate<'i>(
        &self,
        transient: Vec<(&'i Instrument, FetchError)>,
        start: Date,
        end: Date,
        cancel: &CancellationToken,
        report: &mut FetchReport,
    ) {
        info!(
            failures = transient.len(),
            cooldown_ms = self.config.compensation_cooldown.as_millis() as u64,
            "starting compensation pass"
        );

        let cooled = tokio::select! {
            _ = tokio::time::sleep(self.config.compensation_cooldown) => true,
            _ = cancel.cancelled() => false,
        };
        if !cooled {
            for (instrument, error) in &transient {
                report.failed.push(FailedInstrument::new(&instrument.id, error));
            }
            return;
        }

        let retry: Vec<Instrument> = transient
            .iter()
            .map(|(instrument, _)| (*instrument).clone())
            .collect();
        report.retried = retry.iter().map(|instrument| instrument.id.clone()).collect();

        let outcomes = self
            .run_batch(&retry, start, end, self.config.compensation_concurrency, cancel)
            .await;
        for (instrument, attempt) in outcomes {
            match attempt {
                Attempt::Stored => {
                    report.success_count += 1;
                    report.succeeded.push(instrument.id.clone());
                    report.recovered.push(instrument.id.clone());
                }
                Attempt::Cancelled => {
                    let first = transient
                        .iter()
                        .find(|(candidate, _)| candidate.id == instrument.id)
                        .map(|(_, error)| FailedInstrument::new(&instrument.id, error));
                    report.failed.extend(first);
                }
                Attempt::Failed(error) => {
                    warn!(instrument = %instrument.id, error = %error, "compensation retry failed");
                    let failure = FailedInstrument::new(&instrument.id, &error);
                    match error.class() {
                        FailureClass::Transient => report.failed.push(failure),
                        FailureClass::DataQuality => report.skipped.push(failure),
                    }
                }
            }
        }
    }

    async fn run_batch<'i>(
        &self,
        batch: &'i [Instrument],
        start: Date,
        end: Date,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Vec<(&'i Instrument, Attempt)> {
        let attempts: Vec<_> = batch
            .iter()
            .map(|instrument| async move {
                if cancel.is_cancelled() {
                    return (instrument, Attempt::Cancelled);
                }
                let attempt = match self.fetch_one(instrument, start, end).await {
                    Ok(_) => Attempt::Stored,
                    Err(error) => Attempt::Failed(error),
                };
                (instrument, attempt)
            })
            .collect();
        stream::iter(attempts)
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    /// Fetch, validate, and store one instrument's series. Returns the stored length.
    pub async fn fetch_one(
        &self,
        instrument: &Instrument,
        start: Date,
        end: Date,
    ) -> Result<usize, FetchError> {
        self.limiter.wait_for_slot().await;

        let bars = tokio::time::timeout(
            self.config.fetch_timeout,
            self.provider.get_bars(instrument, start, end),
        )
        .await
        .map_err(|_| {
            SourceError::timeout(format!(
                "{} did not answer within {}ms",
                self.provider.id(),
                self.config.fetch_timeout.as_millis()
            ))
        })??;

        if bars.is_empty() {
            return Err(SourceError::empty(format!("no bars returned for {}", instrument.id)).into());
        }

        let series = Series::from_bars(instrument.id.clone(), bars, self.config.max_series_len);
        if series.len() < self.config.min_bars {
            return Err(SourceError::insufficient_history(format!(
                "{} has {} bars, need {}",
                instrument.id,
                series.len(),
                self.config.min_bars
            ))
            .into());
        }

        self.store
            .set(&instrument.id, &series, self.config.series_ttl)
            .await?;
        Ok(series.len())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::source::SourceFuture;
    use crate::store::MemorySeriesStore;
    use crate::{Bar, RateLimitConfig};
    use time::macros::date;

    #[derive(Default)]
    struct CountingProvider {
        errors: Mutex<HashMap<String, Vec<SourceError>>>,
        calls: AtomicUsize,
    }

    impl CountingProvider {
        fn fail(self, id: &str, errors: Vec<SourceError>) -> Self {
            self.errors.lock().expect("lock").insert(id.to_owned(), errors);
            self
        }
    }

    impl MarketDataProvider for CountingProvider {
        fn id(&self) -> &'static str {
            "counting"
        }

        fn get_bars<'a>(
            &'a self,
            instrument: &'a Instrument,
            _start: Date,
            end: Date,
        ) -> SourceFuture<'a, Vec<Bar>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self
                .errors
                .lock()
                .expect("lock")
                .get_mut(&instrument.id)
                .and_then(|errors| (!errors.is_empty()).then(|| errors.remove(0)));
            Box::pin(async move {
                if let Some(error) = scripted {
                    return Err(error);
                }
                Ok((0..30)
                    .map(|offset| {
                        Bar::new(end - time::Duration::days(offset), 10.0, 11.0, 9.0, 10.0, 100, 1_000.0)
                            .expect("valid bar")
                    })
                    .collect())
            })
        }
    }

    fn orchestrator(provider: Arc<CountingProvider>, store: Arc<MemorySeriesStore>) -> FetchOrchestrator {
        FetchOrchestrator::new(
            provider,
            Arc::new(RateLimiter::new(RateLimitConfig::per_minute(1_000))),
            store,
            FetchConfig {
                batch_size: 2,
                concurrency: 2,
                ..FetchConfig::default()
            },
        )
    }

    fn universe(ids: &[&str]) -> Vec<Instrument> {
        ids.iter()
            .map(|id| Instrument::parse_id(id).expect("valid id"))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn data_quality_failures_are_skipped_not_retried() {
        let provider = Arc::new(CountingProvider::default().fail(
            "000002.SZ",
            vec![SourceError::not_found("delisted")],
        ));
        let store = Arc::new(MemorySeriesStore::default());
        let orchestrator = orchestrator(provider.clone(), store.clone());

        let report = orchestrator
            .fetch_all(
                &universe(&["600000.SH", "000002.SZ", "000001.SZ"]),
                date!(2024 - 03 - 01),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.success_count, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].code, "source.not_found");
        assert!(report.retried.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(store.get("000002.SZ").await.expect("get").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn short_history_is_insufficient() {
        let provider = Arc::new(CountingProvider::default());
        let store = Arc::new(MemorySeriesStore::default());
        let orchestrator = FetchOrchestrator::new(
            provider,
            Arc::new(RateLimiter::per_minute(100)),
            store,
            FetchConfig {
                min_bars: 60,
                ..FetchConfig::default()
            },
        );

        let report = orchestrator
            .fetch_all(&universe(&["600000.SH"]), date!(2024 - 03 - 01), &CancellationToken::new())
            .await;

        assert_eq!(report.success_count, 0);
        assert_eq!(report.skipped[0].code, "source.insufficient_history");
        assert!(report.failed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stored_series_is_truncated_to_max_len() {
        let provider = Arc::new(CountingProvider::default());
        let store = Arc::new(MemorySeriesStore::default());
        let orchestrator = FetchOrchestrator::new(
            provider,
            Arc::new(RateLimiter::per_minute(100)),
            store.clone(),
            FetchConfig {
                max_series_len: 25,
                ..FetchConfig::default()
            },
        );

        orchestrator
            .fetch_all(&universe(&["600000.SH"]), date!(2024 - 03 - 01), &CancellationToken::new())
            .await;

        let series = store.get("600000.SH").await.expect("get").expect("stored");
        assert_eq!(series.len(), 25);
        assert_eq!(series.last().map(|bar| bar.trade_date), Some(date!(2024 - 03 - 01)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_attempts_nothing() {
        let provider = Arc::new(CountingProvider::default());
        let store = Arc::new(MemorySeriesStore::default());
        let orchestrator = orchestrator(provider.clone(), store);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = orchestrator
            .fetch_all(&universe(&["600000.SH", "000001.SZ", "000002.SZ"]), date!(2024 - 03 - 01), &cancel)
            .await;

        assert_eq!(report.cancelled, 3);
        assert_eq!(report.success_count, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn compensation_waits_for_cooldown() {
        let provider = Arc::new(CountingProvider::default().fail(
            "600000.SH",
            vec![SourceError::throttled("rc=102")],
        ));
        let store = Arc::new(MemorySeriesStore::default());
        let orchestrator = orchestrator(provider, store);
        let started = Instant::now();

        let report = orchestrator
            .fetch_all(&universe(&["600000.SH"]), date!(2024 - 03 - 01), &CancellationToken::new())
            .await;

        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(report.recovered, vec![String::from("600000.SH")]);
        assert_eq!(report.success_count, 1);
    }
}
