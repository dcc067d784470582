//! Intraday snapshot collection and merge.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::merge::{MergeEngine, MergeError, MergeOutcome};
use crate::rate_limiter::RateLimiter;
use crate::source::{QuoteSource, SourceError};
use crate::Instrument;

#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    pub concurrency: usize,
    pub quote_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            quote_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of one realtime pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RealtimeReport {
    pub total: usize,
    pub updated: usize,
    pub appended: usize,
    /// Instruments without a quote right now (suspended, not yet traded).
    pub no_quote: usize,
    /// Quote fetch or merge failures other than a missing series.
    pub failed: usize,
    /// Instruments with no cached series; excluded until a full refresh seeds them.
    pub unseeded: Vec<String>,
    pub cancelled: usize,
    pub elapsed_ms: u64,
}

impl RealtimeReport {
    pub fn merged(&self) -> usize {
        self.updated + self.appended
    }
}

enum Step {
    Merged(MergeOutcome),
    NoQuote,
    Unseeded,
    Failed,
    Cancelled,
}

/// Fetches a snapshot per instrument through the shared limiter and merges it.
pub struct RealtimeMerger {
    quotes: Arc<dyn QuoteSource>,
    limiter: Arc<RateLimiter>,
    merger: Arc<MergeEngine>,
    config: RealtimeConfig,
}

impl RealtimeMerger {
    pub fn new(
        quotes: Arc<dyn QuoteSource>,
        limiter: Arc<RateLimiter>,
        merger: Arc<MergeEngine>,
        config: RealtimeConfig,
    ) -> Self {
        Self {
            quotes,
            limiter,
            merger,
            config,
        }
    }

    pub async fn merge_all(
        &self,
        instruments: &[Instrument],
        cancel: &CancellationToken,
    ) -> RealtimeReport {
        let started = Instant::now();
        let mut report = RealtimeReport {
            total: instruments.len(),
            ..RealtimeReport::default()
        };

        let merges: Vec<_> = instruments
            .iter()
            .map(|instrument| async move { (instrument, self.merge_one(instrument, cancel).await) })
            .collect();
        let steps: Vec<(&Instrument, Step)> = stream::iter(merges)
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for (instrument, step) in steps {
            match step {
                Step::Merged(MergeOutcome::Updated) => report.updated += 1,
                Step::Merged(MergeOutcome::Appended) => report.appended += 1,
                Step::NoQuote => report.no_quote += 1,
                Step::Unseeded => report.unseeded.push(instrument.id.clone()),
                Step::Failed => report.failed += 1,
                Step::Cancelled => report.cancelled += 1,
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            total = report.total,
            merged = report.merged(),
            appended = report.appended,
            no_quote = report.no_quote,
            failed = report.failed,
            unseeded = report.unseeded.len(),
            elapsed_ms = report.elapsed_ms,
            "realtime merge finished"
        );
        report
    }

    async fn merge_one(&self, instrument: &Instrument, cancel: &CancellationToken) -> Step {
        if cancel.is_cancelled() {
            return Step::Cancelled;
        }
        self.limiter.wait_for_slot().await;

        let quote = tokio::time::timeout(
            self.config.quote_timeout,
            self.quotes.get_snapshot(instrument),
        )
        .await
        .unwrap_or_else(|_| Err(SourceError::timeout("snapshot request timed out")));

        let snapshot = match quote {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Step::NoQuote,
            Err(error) => {
                debug!(instrument = %instrument.id, error = %error, "snapshot unavailable");
                return Step::Failed;
            }
        };

        match self.merger.merge(&instrument.id, &snapshot).await {
            Ok(outcome) => Step::Merged(outcome),
            Err(MergeError::ClosedSession { session }) => {
                debug!(instrument = %instrument.id, %session, "quote belongs to a closed session");
                Step::NoQuote
            }
            Err(error @ MergeError::NoSeries { .. }) => {
                warn!(instrument = %instrument.id, error = %error, "merge precondition violated");
                Step::Unseeded
            }
            Err(error) => {
                warn!(instrument = %instrument.id, error = %error, "merge failed");
                Step::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::MergeConfig;
    use crate::source::SourceFuture;
    use crate::store::{MemorySeriesStore, SeriesStore};
    use crate::{Bar, RealtimeSnapshot, Series};
    use time::macros::{date, datetime};

    struct FixedQuotes;

    impl QuoteSource for FixedQuotes {
        fn get_snapshot<'a>(
            &'a self,
            instrument: &'a Instrument,
        ) -> SourceFuture<'a, Option<RealtimeSnapshot>> {
            let snapshot = (instrument.display_code != "000002").then(|| RealtimeSnapshot {
                instrument_id: instrument.id.clone(),
                price: 10.4,
                open: 10.1,
                high: 10.5,
                low: 10.0,
                prev_close: 10.0,
                volume: 2_000,
                amount: 20_800.0,
                change_pct: 4.0,
                observed_at: datetime!(2024-03-05 02:00 UTC),
            });
            Box::pin(async move { Ok(snapshot) })
        }
    }

    #[tokio::test]
    async fn classifies_each_instrument() {
        let store = Arc::new(MemorySeriesStore::default());
        let bar = Bar::new(date!(2024 - 03 - 04), 10.0, 10.2, 9.8, 10.0, 1_000, 10_000.0)
            .expect("valid bar");
        for id in ["600000.SH", "000002.SZ"] {
            store
                .set(id, &Series::from_bars(id, vec![bar.clone()], 10), None)
                .await
                .expect("seed");
        }
        let merger = RealtimeMerger::new(
            Arc::new(FixedQuotes),
            Arc::new(RateLimiter::per_minute(100)),
            Arc::new(MergeEngine::new(store.clone(), MergeConfig::default())),
            RealtimeConfig::default(),
        );
        let universe: Vec<Instrument> = ["600000.SH", "000002.SZ", "000001.SZ"]
            .iter()
            .map(|id| Instrument::parse_id(id).expect("valid id"))
            .collect();

        let report = merger.merge_all(&universe, &CancellationToken::new()).await;

        assert_eq!(report.appended, 1);
        assert_eq!(report.no_quote, 1);
        assert_eq!(report.unseeded, vec![String::from("000001.SZ")]);
        let series = store.get("600000.SH").await.expect("get").expect("stored");
        assert_eq!(series.len(), 2);
    }
}
