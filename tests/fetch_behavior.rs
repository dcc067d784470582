//! Behavior-driven tests for the full refresh fetch
//!
//! These tests verify HOW a refresh treats failing instruments: transient
//! failures get one compensation attempt, data-quality failures are skipped.

use std::sync::Arc;
use std::time::Duration;

use marketpulse_core::{
    FetchConfig, FetchOrchestrator, Instrument, MemorySeriesStore, RateLimiter, SeriesStore,
    SourceErrorKind,
};
use marketpulse_tests::{instrument, ScriptedProvider};
use time::macros::date;
use tokio_util::sync::CancellationToken;

const A: &str = "600000.SH";
const B: &str = "000001.SZ";
const C: &str = "510300.SH";

fn universe() -> Vec<Instrument> {
    vec![instrument(A), instrument(B), instrument(C)]
}

fn orchestrator(
    provider: Arc<ScriptedProvider>,
    store: Arc<MemorySeriesStore>,
) -> FetchOrchestrator {
    FetchOrchestrator::new(
        provider,
        Arc::new(RateLimiter::per_minute(1_000)),
        store,
        FetchConfig {
            compensation_cooldown: Duration::from_secs(5),
            min_bars: 20,
            ..FetchConfig::default()
        },
    )
}

// =============================================================================
// Fetch: Compensation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_one_instrument_keeps_timing_out_then_the_others_still_refresh() {
    // Given: A provider where B times out on every attempt
    let provider = Arc::new(ScriptedProvider::new(30).fail_always(B, SourceErrorKind::Timeout));
    let store = Arc::new(MemorySeriesStore::default());
    let fetcher = orchestrator(Arc::clone(&provider), Arc::clone(&store));

    // When: The universe is refreshed
    let report = fetcher
        .fetch_all(&universe(), date!(2024 - 03 - 04), &CancellationToken::new())
        .await;

    // Then: A and C are stored and B fails after exactly one retry
    assert_eq!(report.total, 3);
    assert_eq!(report.success_count, 2);
    assert_eq!(report.failed_ids(), vec![B]);
    assert_eq!(report.retried, vec![B.to_owned()]);
    assert!(report.recovered.is_empty());
    assert_eq!(provider.calls(B), 2);
    assert!(store.get(A).await.expect("get").is_some());
    assert!(store.get(B).await.expect("get").is_none());
}

#[tokio::test(start_paused = true)]
async fn when_a_throttled_instrument_recovers_then_every_instrument_is_stored() {
    // Given: A provider that throttles B once
    let provider = Arc::new(ScriptedProvider::new(30).fail_once(B, SourceErrorKind::Throttled));
    let store = Arc::new(MemorySeriesStore::default());
    let fetcher = orchestrator(Arc::clone(&provider), Arc::clone(&store));

    // When: The universe is refreshed
    let report = fetcher
        .fetch_all(&universe(), date!(2024 - 03 - 04), &CancellationToken::new())
        .await;

    // Then: B is recovered by the compensation pass
    assert_eq!(report.success_count, 3);
    assert_eq!(report.retried, vec![B.to_owned()]);
    assert_eq!(report.recovered, vec![B.to_owned()]);
    assert!(report.failed.is_empty());
    let stored = store.get(B).await.expect("get").expect("B stored");
    assert_eq!(stored.len(), 30);
    assert!(stored.is_strictly_ordered());
}

#[tokio::test(start_paused = true)]
async fn when_an_instrument_is_unknown_then_it_is_skipped_without_retry() {
    // Given: A provider that does not know C
    let provider = Arc::new(ScriptedProvider::new(30).fail_always(C, SourceErrorKind::NotFound));
    let store = Arc::new(MemorySeriesStore::default());
    let fetcher = orchestrator(Arc::clone(&provider), store);

    // When: The universe is refreshed
    let report = fetcher
        .fetch_all(&universe(), date!(2024 - 03 - 04), &CancellationToken::new())
        .await;

    // Then: C is skipped, never retried, and not counted as failed
    assert_eq!(report.success_count, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].instrument_id, C);
    assert!(report.retried.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(provider.calls(C), 1);
}

#[tokio::test(start_paused = true)]
async fn when_history_is_too_short_then_the_instrument_is_skipped() {
    // Given: A provider that only has five bars per instrument
    let provider = Arc::new(ScriptedProvider::new(5));
    let store = Arc::new(MemorySeriesStore::default());
    let fetcher = orchestrator(provider, Arc::clone(&store));

    // When: The universe is refreshed with a 20-bar minimum
    let report = fetcher
        .fetch_all(&universe(), date!(2024 - 03 - 04), &CancellationToken::new())
        .await;

    // Then: Nothing is stored and nothing is retried
    assert_eq!(report.success_count, 0);
    assert_eq!(report.skipped.len(), 3);
    assert!(report.retried.is_empty());
    assert!(store.get(A).await.expect("get").is_none());
}

// =============================================================================
// Fetch: Cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_the_refresh_is_cancelled_up_front_then_no_instrument_is_attempted() {
    // Given: A token that is already cancelled
    let provider = Arc::new(ScriptedProvider::new(30));
    let fetcher = orchestrator(Arc::clone(&provider), Arc::new(MemorySeriesStore::default()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    // When: The universe is refreshed
    let report = fetcher
        .fetch_all(&universe(), date!(2024 - 03 - 04), &cancel)
        .await;

    // Then: Every instrument is reported as cancelled and the provider is untouched
    assert_eq!(report.cancelled, 3);
    assert_eq!(report.success_count, 0);
    assert_eq!(provider.calls(A), 0);
}
