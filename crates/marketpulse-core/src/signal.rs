//! Strategy evaluation over cached series.
//!
//! For every instrument the engine loads the series, runs the strategy, and keeps
//! only an event that fired on the last bar. Strategy errors and panics are
//! contained per `(instrument, strategy)` pair and count as no signal.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::store::{SeriesStore, SignalStore, StoreError};
use crate::strategy::{Strategy, StrategyEvent, StrategyRegistry};
use crate::{Instrument, Series, SignalRecord};

const LOAD_CONCURRENCY: usize = 16;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-strategy outcome of one computation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignalReport {
    pub strategy_id: String,
    pub evaluated: usize,
    /// Instruments without a cached series.
    pub missing: usize,
    /// Series shorter than the strategy's minimum.
    pub too_short: usize,
    /// Strategy errors, panics, and per-instrument store failures.
    pub errors: usize,
    pub signal_count: usize,
    /// Records removed before this pass, when it was a recomputation.
    pub cleared: usize,
    pub elapsed_ms: u64,
}

enum Evaluation {
    Signal(SignalRecord),
    Quiet,
    Missing,
    TooShort,
    Failed,
}

pub struct SignalEngine {
    registry: StrategyRegistry,
    series_store: Arc<dyn SeriesStore>,
    signal_store: Arc<dyn SignalStore>,
}

impl SignalEngine {
    pub fn new(
        registry: StrategyRegistry,
        series_store: Arc<dyn SeriesStore>,
        signal_store: Arc<dyn SignalStore>,
    ) -> Self {
        Self {
            registry,
            series_store,
            signal_store,
        }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Run one strategy over `instruments` and upsert the resulting records.
    pub async fn compute(
        &self,
        strategy_id: &str,
        instruments: &[Instrument],
    ) -> Result<SignalReport, SignalError> {
        let strategy = self
            .registry
            .get(strategy_id)
            .ok_or_else(|| SignalError::UnknownStrategy(strategy_id.to_owned()))?;
        let started = Instant::now();
        let mut report = SignalReport {
            strategy_id: strategy_id.to_owned(),
            ..SignalReport::default()
        };

        let pending: Vec<_> = instruments
            .iter()
            .map(|instrument| self.evaluate(strategy.as_ref(), instrument))
            .collect();
        let evaluations: Vec<Evaluation> = stream::iter(pending)
            .buffer_unordered(LOAD_CONCURRENCY)
            .collect()
            .await;

        for evaluation in evaluations {
            match evaluation {
                Evaluation::Signal(record) => {
                    report.evaluated += 1;
                    match self.signal_store.upsert(&record).await {
                        Ok(()) => report.signal_count += 1,
                        Err(error) => {
                            warn!(
                                instrument = %record.instrument_id,
                                strategy = strategy_id,
                                error = %error,
                                "failed to persist signal"
                            );
                            report.errors += 1;
                        }
                    }
                }
                Evaluation::Quiet => report.evaluated += 1,
                Evaluation::Missing => report.missing += 1,
                Evaluation::TooShort => report.too_short += 1,
                Evaluation::Failed => report.errors += 1,
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            strategy = strategy_id,
            evaluated = report.evaluated,
            signals = report.signal_count,
            errors = report.errors,
            elapsed_ms = report.elapsed_ms,
            "strategy pass finished"
        );
        Ok(report)
    }

    /// Clear every record of `strategy_ids`, then compute each strategy afresh.
    ///
    /// Unknown ids are rejected before anything is cleared.
    pub async fn recompute(
        &self,
        strategy_ids: &[String],
        instruments: &[Instrument],
    ) -> Result<Vec<SignalReport>, SignalError> {
        if let Some(unknown) = strategy_ids
            .iter()
            .find(|id| self.registry.get(id).is_none())
        {
            return Err(SignalError::UnknownStrategy(unknown.clone()));
        }

        let cleared = self.signal_store.clear_strategies(strategy_ids).await?;
        debug!(strategies = strategy_ids.len(), cleared, "cleared stale signals");

        let mut reports = Vec::with_capacity(strategy_ids.len());
        for (position, strategy_id) in strategy_ids.iter().enumerate() {
            let mut report = self.compute(strategy_id, instruments).await?;
            if position == 0 {
                report.cleared = cleared;
            }
            reports.push(report);
        }
        Ok(reports)
    }

    async fn evaluate(&self, strategy: &dyn Strategy, instrument: &Instrument) -> Evaluation {
        let series = match self.series_store.get(&instrument.id).await {
            Ok(Some(series)) => series,
            Ok(None) => return Evaluation::Missing,
            Err(error) => {
                warn!(instrument = %instrument.id, error = %error, "failed to load series");
                return Evaluation::Failed;
            }
        };
        if series.len() < strategy.min_bars() {
            return Evaluation::TooShort;
        }

        match latest_event(strategy, &series) {
            Ok(Some(event)) => match build_record(strategy.id(), &series, event) {
                Some(record) => Evaluation::Signal(record),
                None => Evaluation::Quiet,
            },
            Ok(None) => Evaluation::Quiet,
            Err(reason) => {
                warn!(
                    instrument = %instrument.id,
                    strategy = strategy.id(),
                    reason = %reason,
                    "strategy failed"
                );
                Evaluation::Failed
            }
        }
    }
}

/// Apply `strategy` and return the strongest event on the last bar, if any.
///
/// Errors and panics raised by the strategy come back as a message.
pub fn latest_event(
    strategy: &dyn Strategy,
    series: &Series,
) -> Result<Option<StrategyEvent>, String> {
    let Some(last_index) = series.last_index() else {
        return Ok(None);
    };

    let events = match catch_unwind(AssertUnwindSafe(|| strategy.apply(series))) {
        Ok(Ok(events)) => events,
        Ok(Err(error)) => return Err(error.to_string()),
        Err(panic) => return Err(panic_message(panic.as_ref())),
    };

    Ok(events
        .into_iter()
        .filter(|event| event.index == last_index)
        .max_by(|left, right| left.confidence.total_cmp(&right.confidence)))
}

fn build_record(strategy_id: &str, series: &Series, event: StrategyEvent) -> Option<SignalRecord> {
    let bar = series.bars().get(event.index)?;
    Some(SignalRecord {
        instrument_id: series.instrument_id.clone(),
        strategy_id: strategy_id.to_owned(),
        price: bar.close,
        bar_date: bar.trade_date,
        confidence: event.confidence,
        computed_at: OffsetDateTime::now_utc(),
        metrics: event.metrics,
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        String::from("panicked")
    }
}
