//! Behavior-driven tests for signal computation
//!
//! These tests verify HOW strategy output becomes signal records: only events
//! on the last bar count, recomputation replaces stale records, and a failing
//! strategy never takes the pass down with it.

use std::sync::Arc;

use marketpulse_core::strategy::{Strategy, StrategyError, StrategyEvent};
use marketpulse_core::{
    Bar, MemorySeriesStore, MemorySignalStore, Series, SeriesStore, SignalEngine, SignalError,
    SignalStore, StrategyRegistry,
};
use marketpulse_tests::{bar, daily_bars, instrument, series};
use time::macros::date;
use time::Duration;

const RISING: &str = "600000.SH";
const FALLING: &str = "000001.SZ";

/// Fires on the last bar when it closes above the first bar, otherwise on the
/// first bar only.
struct Breakout;

impl Strategy for Breakout {
    fn id(&self) -> &str {
        "breakout"
    }

    fn min_bars(&self) -> usize {
        5
    }

    fn apply(&self, series: &Series) -> Result<Vec<StrategyEvent>, StrategyError> {
        let bars = series.bars();
        let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
            return Ok(Vec::new());
        };
        let index = if last.close > first.close { bars.len() - 1 } else { 0 };
        Ok(vec![StrategyEvent::new(index, 0.8).with_metric("close", last.close)])
    }
}

/// Panics for one instrument and fires on the last bar for the rest.
struct Fragile {
    panics_on: &'static str,
}

impl Strategy for Fragile {
    fn id(&self) -> &str {
        "fragile"
    }

    fn min_bars(&self) -> usize {
        1
    }

    fn apply(&self, series: &Series) -> Result<Vec<StrategyEvent>, StrategyError> {
        if series.instrument_id == self.panics_on {
            panic!("indicator overflow");
        }
        Ok(series
            .last_index()
            .map(|index| vec![StrategyEvent::new(index, 0.5)])
            .unwrap_or_default())
    }
}

async fn stores() -> (Arc<MemorySeriesStore>, Arc<MemorySignalStore>) {
    let series_store = Arc::new(MemorySeriesStore::default());
    let rising = series(RISING, daily_bars(date!(2024 - 03 - 05), 30, 10.0));
    let falling: Vec<Bar> = (0..30)
        .map(|index| {
            let day = date!(2024 - 03 - 05) - Duration::days(29 - index);
            bar(day, 13.0 - index as f64 * 0.1, 1_000)
        })
        .collect();
    series_store
        .set(RISING, &rising, None)
        .await
        .expect("seed rising");
    series_store
        .set(FALLING, &series(FALLING, falling), None)
        .await
        .expect("seed falling");
    (series_store, Arc::new(MemorySignalStore::new()))
}

fn registry(strategies: Vec<Arc<dyn Strategy>>) -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    for strategy in strategies {
        registry.register(strategy);
    }
    registry
}

// =============================================================================
// Signals: Last Bar Rule
// =============================================================================

#[tokio::test]
async fn when_a_strategy_fires_only_on_an_earlier_bar_then_no_signal_is_recorded() {
    // Given: A rising series that fires on its last bar and a falling one that fires on its first
    let (series_store, signal_store) = stores().await;
    let engine = SignalEngine::new(
        registry(vec![Arc::new(Breakout) as Arc<dyn Strategy>]),
        series_store,
        signal_store.clone(),
    );

    // When: The strategy runs over both instruments
    let report = engine
        .compute("breakout", &[instrument(RISING), instrument(FALLING)])
        .await
        .expect("compute");

    // Then: Both were evaluated but only the rising instrument has a signal
    assert_eq!(report.evaluated, 2);
    assert_eq!(report.signal_count, 1);
    let signals = signal_store.list(Some("breakout")).await.expect("list");
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].instrument_id, RISING);
    assert_eq!(signals[0].bar_date, date!(2024 - 03 - 05));
    assert!(signals[0].metrics.contains_key("close"));
}

#[tokio::test]
async fn when_a_series_is_missing_or_short_then_it_is_counted_not_evaluated() {
    // Given: One instrument without a series and one with three bars
    let (series_store, signal_store) = stores().await;
    series_store
        .set(
            "510300.SH",
            &series("510300.SH", daily_bars(date!(2024 - 03 - 05), 3, 3.0)),
            None,
        )
        .await
        .expect("seed short");
    let engine = SignalEngine::new(
        registry(vec![Arc::new(Breakout) as Arc<dyn Strategy>]),
        series_store,
        signal_store,
    );

    // When: The strategy runs
    let report = engine
        .compute("breakout", &[instrument("510300.SH"), instrument("600519.SH")])
        .await
        .expect("compute");

    // Then: Neither instrument reaches the strategy
    assert_eq!(report.evaluated, 0);
    assert_eq!(report.too_short, 1);
    assert_eq!(report.missing, 1);
}

// =============================================================================
// Signals: Recompute
// =============================================================================

#[tokio::test]
async fn when_signals_are_recomputed_then_stale_records_of_that_strategy_disappear() {
    // Given: A stale breakout record for the falling instrument and a record of another strategy
    let (series_store, signal_store) = stores().await;
    let engine = SignalEngine::new(
        registry(vec![
            Arc::new(Breakout) as Arc<dyn Strategy>,
            Arc::new(Fragile { panics_on: "none" }),
        ]),
        series_store,
        signal_store.clone(),
    );
    engine
        .compute("fragile", &[instrument(FALLING)])
        .await
        .expect("seed fragile");
    let mut stale = signal_store
        .list(Some("fragile"))
        .await
        .expect("list")
        .remove(0);
    stale.strategy_id = String::from("breakout");
    signal_store.upsert(&stale).await.expect("seed stale");

    // When: Breakout is recomputed
    let reports = engine
        .recompute(&[String::from("breakout")], &[instrument(RISING), instrument(FALLING)])
        .await
        .expect("recompute");

    // Then: The stale record is gone and the other strategy is untouched
    assert_eq!(reports[0].cleared, 1);
    let breakout = signal_store.list(Some("breakout")).await.expect("list");
    assert_eq!(breakout.len(), 1);
    assert_eq!(breakout[0].instrument_id, RISING);
    assert_eq!(signal_store.list(Some("fragile")).await.expect("list").len(), 1);
}

#[tokio::test]
async fn when_an_unknown_strategy_is_requested_then_nothing_is_cleared() {
    // Given: A stored breakout signal
    let (series_store, signal_store) = stores().await;
    let engine = SignalEngine::new(
        registry(vec![Arc::new(Breakout) as Arc<dyn Strategy>]),
        series_store,
        signal_store.clone(),
    );
    engine
        .compute("breakout", &[instrument(RISING)])
        .await
        .expect("compute");

    // When: A recompute names an unregistered strategy
    let error = engine
        .recompute(
            &[String::from("breakout"), String::from("moonshot")],
            &[instrument(RISING)],
        )
        .await
        .expect_err("unknown strategy");

    // Then: The request is rejected before any record is removed
    assert!(matches!(error, SignalError::UnknownStrategy(id) if id == "moonshot"));
    assert_eq!(signal_store.list(None).await.expect("list").len(), 1);
}

// =============================================================================
// Signals: Fault Isolation
// =============================================================================

#[tokio::test]
async fn when_a_strategy_panics_on_one_instrument_then_the_others_still_get_signals() {
    // Given: A strategy that panics on the falling instrument
    let (series_store, signal_store) = stores().await;
    let engine = SignalEngine::new(
        registry(vec![Arc::new(Fragile { panics_on: FALLING }) as Arc<dyn Strategy>]),
        series_store,
        signal_store.clone(),
    );

    // When: The strategy runs over both instruments
    let report = engine
        .compute("fragile", &[instrument(RISING), instrument(FALLING)])
        .await
        .expect("compute");

    // Then: The panic is contained and counted
    assert_eq!(report.errors, 1);
    assert_eq!(report.signal_count, 1);
    let signals = signal_store.list(None).await.expect("list");
    assert_eq!(signals[0].instrument_id, RISING);
}
