//! The pipeline service: owns every component and runs cycles.
//!
//! A cycle is one execution of a [`CycleKind`]. Every path into a cycle, the
//! scheduler and the manual triggers alike, goes through the same per-kind
//! [`JobSlot`], so at most one execution of a kind is in flight and extra
//! triggers are coalesced. Full refresh and realtime merge also share a write
//! lock, so a fetch and a merge never rewrite the same series concurrently.
//! A successful data cycle is followed by a chained signals cycle.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::cycle::{CycleKind, CycleStatus, CycleSummary, JobSlot, TriggerSource};
use crate::fetch::FetchOrchestrator;
use crate::merge::MergeEngine;
use crate::realtime::RealtimeMerger;
use crate::scheduler::{JobRunner, Scheduler};
use crate::source::{MarketDataProvider, QuoteSource};
use crate::store::{CycleLog, SeriesStore, SignalStore, StoreError};
use crate::strategy::StrategyRegistry;
use crate::{Instrument, RateLimiter, Series, SignalEngine, SignalRecord, TradingCalendar};

/// Upper bounds on how long a data cycle may run before it is cancelled.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleConfig {
    pub full_refresh_max: Duration,
    pub realtime_max: Duration,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            full_refresh_max: Duration::from_secs(2 * 60 * 60),
            realtime_max: Duration::from_secs(4 * 60),
        }
    }
}

impl CycleConfig {
    /// Signals cycles are CPU-bound over cached data and are not bounded.
    pub fn max_duration(&self, kind: CycleKind) -> Option<Duration> {
        match kind {
            CycleKind::FullRefresh => Some(self.full_refresh_max),
            CycleKind::Realtime => Some(self.realtime_max),
            CycleKind::Signals => None,
        }
    }
}

/// Collaborators a [`Pipeline`] is assembled from.
pub struct PipelineParts {
    pub universe: Vec<Instrument>,
    pub provider: Arc<dyn MarketDataProvider>,
    pub quotes: Arc<dyn QuoteSource>,
    pub series_store: Arc<dyn SeriesStore>,
    pub signal_store: Arc<dyn SignalStore>,
    pub cycle_log: Arc<dyn CycleLog>,
    pub registry: StrategyRegistry,
    pub calendar: TradingCalendar,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Default)]
struct JobSlots {
    full_refresh: JobSlot,
    realtime: JobSlot,
    signals: JobSlot,
}

impl JobSlots {
    fn get(&self, kind: CycleKind) -> &JobSlot {
        match kind {
            CycleKind::FullRefresh => &self.full_refresh,
            CycleKind::Realtime => &self.realtime,
            CycleKind::Signals => &self.signals,
        }
    }
}

pub struct Pipeline {
    universe: Vec<Instrument>,
    calendar: TradingCalendar,
    clock: Arc<dyn Clock>,
    series_store: Arc<dyn SeriesStore>,
    signal_store: Arc<dyn SignalStore>,
    cycle_log: Arc<dyn CycleLog>,
    fetcher: FetchOrchestrator,
    realtime: RealtimeMerger,
    signals: SignalEngine,
    cycles: CycleConfig,
    slots: JobSlots,
    series_writes: tokio::sync::Mutex<()>,
    unseeded: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
}

impl Pipeline {
    pub fn new(parts: PipelineParts, config: &PipelineConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let merger = Arc::new(
            MergeEngine::new(Arc::clone(&parts.series_store), config.merge.clone())
                .with_calendar(parts.calendar.clone()),
        );
        Self {
            fetcher: FetchOrchestrator::new(
                parts.provider,
                Arc::clone(&limiter),
                Arc::clone(&parts.series_store),
                config.fetch.clone(),
            ),
            realtime: RealtimeMerger::new(parts.quotes, limiter, merger, config.realtime.clone()),
            signals: SignalEngine::new(
                parts.registry,
                Arc::clone(&parts.series_store),
                Arc::clone(&parts.signal_store),
            ),
            universe: parts.universe,
            calendar: parts.calendar,
            clock: parts.clock,
            series_store: parts.series_store,
            signal_store: parts.signal_store,
            cycle_log: parts.cycle_log,
            cycles: config.cycles.clone(),
            slots: JobSlots::default(),
            series_writes: tokio::sync::Mutex::new(()),
            unseeded: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn universe(&self) -> &[Instrument] {
        &self.universe
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    /// Registered strategy ids, sorted.
    pub fn strategies(&self) -> Vec<String> {
        self.signals.registry().ids()
    }

    pub async fn list_signals(
        &self,
        strategy_id: Option<&str>,
    ) -> Result<Vec<SignalRecord>, StoreError> {
        self.signal_store.list(strategy_id).await
    }

    pub async fn get_series(&self, instrument_id: &str) -> Result<Option<Series>, StoreError> {
        self.series_store.get(instrument_id).await
    }

    pub async fn recent_cycles(&self, limit: usize) -> Result<Vec<CycleSummary>, StoreError> {
        self.cycle_log.recent(limit).await
    }

    /// Instruments excluded from realtime merges until a full refresh seeds them.
    pub fn unseeded(&self) -> Vec<String> {
        let unseeded = self.unseeded.lock().expect("unseeded set lock is not poisoned");
        let mut ids: Vec<String> = unseeded.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Root token; cancelling it stops the scheduler and cancels running cycles.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Scheduler driving this pipeline's three jobs.
    pub fn scheduler(self: &Arc<Self>, config: &PipelineConfig) -> Scheduler {
        Scheduler::new(
            config.schedule.jobs(),
            Arc::clone(self) as Arc<dyn JobRunner>,
            Arc::clone(&self.clock),
            self.calendar.market_offset(),
        )
    }

    /// Manual trigger, gated by the trading calendar like a scheduled run.
    pub async fn trigger_cycle(&self, kind: CycleKind) -> CycleSummary {
        self.run_cycle(kind, TriggerSource::Manual, true).await
    }

    /// Manual trigger that bypasses the calendar gate but not the job slot.
    pub async fn trigger_cycle_forced(&self, kind: CycleKind) -> CycleSummary {
        self.run_cycle(kind, TriggerSource::Manual, false).await
    }

    async fn run_cycle(&self, kind: CycleKind, trigger: TriggerSource, gated: bool) -> CycleSummary {
        let summary = self.run_guarded(kind, trigger, gated).await;
        if kind != CycleKind::Signals && summary.is_success() {
            self.run_guarded(CycleKind::Signals, TriggerSource::Chained, false)
                .await;
        }
        summary
    }

    async fn run_guarded(
        &self,
        kind: CycleKind,
        trigger: TriggerSource,
        gated: bool,
    ) -> CycleSummary {
        let started_at = self.clock.now();
        let started = Instant::now();

        let mut summary = match self.slots.get(kind).try_trigger() {
            None => CycleSummary::new(kind, trigger, started_at)
                .with_status(CycleStatus::Coalesced, format!("{kind} cycle already in progress")),
            Some(guard) => match gated.then(|| self.gate(kind, trigger, started_at)).flatten() {
                Some(reason) => CycleSummary::new(kind, trigger, started_at)
                    .with_status(CycleStatus::Skipped, reason),
                None => {
                    guard.start_running();
                    self.execute(kind, trigger, started_at).await
                }
            },
        };
        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        self.finish(&summary).await;
        summary
    }

    /// Reason the calendar keeps `kind` from running at `now`, if any.
    fn gate(&self, kind: CycleKind, trigger: TriggerSource, now: OffsetDateTime) -> Option<String> {
        match kind {
            CycleKind::FullRefresh => {
                let date = self.calendar.to_local(now).date();
                (!self.calendar.is_trading_day(date))
                    .then(|| format!("{date} is not a trading day"))
            }
            CycleKind::Realtime => {
                (!self.calendar.is_trading_window(now)).then(|| "outside trading window".to_owned())
            }
            CycleKind::Signals => (trigger == TriggerSource::Scheduled
                && !self.calendar.is_trading_window(now))
            .then(|| "outside trading window".to_owned()),
        }
    }

    async fn execute(
        &self,
        kind: CycleKind,
        trigger: TriggerSource,
        started_at: OffsetDateTime,
    ) -> CycleSummary {
        let cancel = self.shutdown.child_token();
        let watchdog = self.cycles.max_duration(kind).map(|limit| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!(cycle = %kind, limit_ms = limit.as_millis() as u64, "cycle exceeded its maximum duration");
                cancel.cancel();
            })
        });

        let mut summary = CycleSummary::new(kind, trigger, started_at);
        match kind {
            CycleKind::FullRefresh => self.full_refresh(&mut summary, &cancel).await,
            CycleKind::Realtime => self.realtime_merge(&mut summary, &cancel).await,
            CycleKind::Signals => self.compute_signals(&mut summary).await,
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        summary
    }

    /// Take the series write lock unless `cancel` fires first.
    async fn lock_series_writes(
        &self,
        cancel: &CancellationToken,
    ) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            guard = self.series_writes.lock() => Some(guard),
        }
    }

    async fn full_refresh(&self, summary: &mut CycleSummary, cancel: &CancellationToken) {
        let Some(_writes) = self.lock_series_writes(cancel).await else {
            summary.status = CycleStatus::Cancelled;
            summary.detail = Some("cancelled while waiting for another series writer".to_owned());
            return;
        };
        match self.series_store.purge_expired().await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "purged expired series"),
            Err(error) => warn!(error = %error, "failed to purge expired series"),
        }
        let as_of = self.calendar.session_date(summary.started_at);
        let report = self.fetcher.fetch_all(&self.universe, as_of, cancel).await;

        {
            let mut unseeded = self.unseeded.lock().expect("unseeded set lock is not poisoned");
            for instrument_id in &report.succeeded {
                unseeded.remove(instrument_id);
            }
        }

        summary.total = report.total;
        summary.succeeded = report.success_count;
        summary.failed = report.failed.len();
        summary.skipped = report.skipped.len();
        summary.recovered = report.recovered.len();

        if cancel.is_cancelled() {
            summary.status = CycleStatus::Cancelled;
            summary.detail = Some(format!("{} instruments not attempted", report.cancelled));
        } else if report.total > 0 && report.success_count == 0 {
            summary.status = CycleStatus::Failed;
            summary.detail = Some("no instrument was refreshed".to_owned());
        }
    }

    async fn realtime_merge(&self, summary: &mut CycleSummary, cancel: &CancellationToken) {
        let Some(_writes) = self.lock_series_writes(cancel).await else {
            summary.status = CycleStatus::Cancelled;
            summary.detail = Some("cancelled while waiting for another series writer".to_owned());
            return;
        };
        let targets: Vec<Instrument> = {
            let unseeded = self.unseeded.lock().expect("unseeded set lock is not poisoned");
            self.universe
                .iter()
                .filter(|instrument| !unseeded.contains(&instrument.id))
                .cloned()
                .collect()
        };
        let excluded = self.universe.len() - targets.len();
        let report = self.realtime.merge_all(&targets, cancel).await;

        if !report.unseeded.is_empty() {
            warn!(
                count = report.unseeded.len(),
                "excluding instruments without a series until the next full refresh"
            );
            let mut unseeded = self.unseeded.lock().expect("unseeded set lock is not poisoned");
            unseeded.extend(report.unseeded.iter().cloned());
        }

        summary.total = self.universe.len();
        summary.succeeded = report.merged();
        summary.failed = report.failed + report.unseeded.len();
        summary.skipped = report.no_quote + excluded;

        if cancel.is_cancelled() {
            summary.status = CycleStatus::Cancelled;
            summary.detail = Some(format!("{} instruments not attempted", report.cancelled));
        } else if !targets.is_empty() && report.merged() == 0 && summary.failed > 0 {
            summary.status = CycleStatus::Failed;
            summary.detail = Some("no snapshot was merged".to_owned());
        }
    }

    async fn compute_signals(&self, summary: &mut CycleSummary) {
        let strategy_ids = self.signals.registry().ids();
        summary.total = self.universe.len();
        match self.signals.recompute(&strategy_ids, &self.universe).await {
            Ok(reports) => {
                for report in reports {
                    summary.succeeded += report.evaluated;
                    summary.skipped += report.missing + report.too_short;
                    summary.failed += report.errors;
                    summary.signals += report.signal_count;
                }
            }
            Err(error) => {
                summary.status = CycleStatus::Failed;
                summary.detail = Some(error.to_string());
            }
        }
    }

    async fn finish(&self, summary: &CycleSummary) {
        match summary.status {
            CycleStatus::Skipped | CycleStatus::Coalesced => {
                debug!(
                    cycle = %summary.kind,
                    trigger = ?summary.trigger,
                    status = ?summary.status,
                    detail = summary.detail.as_deref().unwrap_or_default(),
                    "cycle not executed"
                );
                return;
            }
            CycleStatus::Completed => info!(
                cycle = %summary.kind,
                trigger = ?summary.trigger,
                total = summary.total,
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                recovered = summary.recovered,
                signals = summary.signals,
                elapsed_ms = summary.elapsed_ms,
                "cycle completed"
            ),
            CycleStatus::Cancelled | CycleStatus::Failed => warn!(
                cycle = %summary.kind,
                trigger = ?summary.trigger,
                status = ?summary.status,
                succeeded = summary.succeeded,
                failed = summary.failed,
                elapsed_ms = summary.elapsed_ms,
                detail = summary.detail.as_deref().unwrap_or_default(),
                "cycle did not complete"
            ),
        }

        if let Err(error) = self.cycle_log.record(summary).await {
            warn!(cycle = %summary.kind, error = %error, "failed to record cycle summary");
        }
    }
}

impl JobRunner for Pipeline {
    fn run_scheduled(
        &self,
        kind: CycleKind,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.run_cycle(kind, TriggerSource::Scheduled, true).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SyntheticAdapter;
    use crate::clock::TokioClock;
    use crate::source::SourceFuture;
    use crate::store::{MemoryCycleLog, MemorySeriesStore, MemorySignalStore};
    use crate::RealtimeSnapshot;
    use time::macros::datetime;

    struct SlowQuotes;

    impl QuoteSource for SlowQuotes {
        fn get_snapshot<'a>(
            &'a self,
            _instrument: &'a Instrument,
        ) -> SourceFuture<'a, Option<RealtimeSnapshot>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(None)
            })
        }
    }

    fn pipeline(at: OffsetDateTime, quotes: Arc<dyn QuoteSource>) -> Pipeline {
        let parts = PipelineParts {
            universe: vec![Instrument::parse_id("600000.SH").expect("valid id")],
            provider: Arc::new(SyntheticAdapter::default()),
            quotes,
            series_store: Arc::new(MemorySeriesStore::default()),
            signal_store: Arc::new(MemorySignalStore::new()),
            cycle_log: Arc::new(MemoryCycleLog::default()),
            registry: StrategyRegistry::builtin(),
            calendar: TradingCalendar::default(),
            clock: Arc::new(TokioClock::starting_at(at)),
        };
        Pipeline::new(parts, &PipelineConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_triggers_are_coalesced() {
        let pipeline = pipeline(datetime!(2024-03-04 10:00 +8), Arc::new(SlowQuotes));

        let (first, second) = tokio::join!(
            pipeline.trigger_cycle(CycleKind::Realtime),
            pipeline.trigger_cycle(CycleKind::Realtime)
        );

        assert_eq!(first.status, CycleStatus::Completed);
        assert_eq!(second.status, CycleStatus::Coalesced);
    }

    #[tokio::test(start_paused = true)]
    async fn realtime_outside_trading_window_is_skipped_unless_forced() {
        let pipeline = pipeline(datetime!(2024-03-04 12:00 +8), Arc::new(SlowQuotes));

        let gated = pipeline.trigger_cycle(CycleKind::Realtime).await;
        let forced = pipeline.trigger_cycle_forced(CycleKind::Realtime).await;

        assert_eq!(gated.status, CycleStatus::Skipped);
        assert_eq!(forced.status, CycleStatus::Completed);
        let recorded = pipeline.recent_cycles(10).await.expect("recent");
        assert!(recorded.iter().all(|summary| summary.status != CycleStatus::Skipped));
    }

    #[tokio::test(start_paused = true)]
    async fn full_refresh_chains_a_signals_cycle() {
        let pipeline = pipeline(datetime!(2024-03-04 15:30 +8), Arc::new(SlowQuotes));

        let summary = pipeline.trigger_cycle(CycleKind::FullRefresh).await;

        assert_eq!(summary.status, CycleStatus::Completed);
        assert_eq!(summary.succeeded, 1);
        let recorded = pipeline.recent_cycles(10).await.expect("recent");
        assert_eq!(recorded[0].kind, CycleKind::Signals);
        assert_eq!(recorded[0].trigger, TriggerSource::Chained);
        assert!(pipeline.get_series("600000.SH").await.expect("get").is_some());
    }
}
