//! Behavior-driven tests for realtime merge
//!
//! These tests verify HOW snapshots land in cached series: same-session quotes
//! rewrite the trailing bar, later sessions append, nothing reorders history.

use std::sync::Arc;

use marketpulse_core::{
    MergeConfig, MergeEngine, MergeError, MergeOutcome, MemorySeriesStore, RateLimiter,
    RealtimeConfig, RealtimeMerger, SeriesStore,
};
use marketpulse_tests::{bar, daily_bars, instrument, series, snapshot, ScriptedQuotes};
use time::macros::{date, datetime};
use tokio_util::sync::CancellationToken;

const ID: &str = "600000.SH";

async fn seeded_store() -> Arc<MemorySeriesStore> {
    let store = Arc::new(MemorySeriesStore::default());
    let seeded = series(
        ID,
        vec![bar(date!(2024 - 03 - 04), 10.0, 1_000), bar(date!(2024 - 03 - 05), 11.0, 1_000)],
    );
    store.set(ID, &seeded, None).await.expect("seed");
    store
}

// =============================================================================
// Merge: Trailing Bar
// =============================================================================

#[tokio::test]
async fn when_a_quote_arrives_for_the_last_session_then_the_trailing_bar_is_rewritten() {
    // Given: A series ending on 2024-03-05
    let store = seeded_store().await;
    let engine = MergeEngine::new(store.clone(), MergeConfig::default());

    // When: A 10:00 local quote for 2024-03-05 is merged
    let quote = snapshot(ID, 11.5, 5_000, datetime!(2024-03-05 10:00 +8));
    let outcome = engine.merge(ID, &quote).await.expect("merge");

    // Then: The series keeps two bars and the last one carries the quote
    assert_eq!(outcome, MergeOutcome::Updated);
    let merged = store.get(ID).await.expect("get").expect("series");
    assert_eq!(merged.len(), 2);
    let last = merged.last().expect("last bar");
    assert_eq!(last.trade_date, date!(2024 - 03 - 05));
    assert!((last.close - 11.5).abs() < 1e-9);
    assert_eq!(last.volume, 5_000);
    assert!(last.high >= 11.5);
    assert!((merged.bars()[0].close - 10.0).abs() < 1e-9);
}

#[tokio::test]
async fn when_repeated_quotes_carry_cumulative_volume_then_volume_is_replaced_not_summed() {
    // Given: A series ending on 2024-03-05
    let store = seeded_store().await;
    let engine = MergeEngine::new(store.clone(), MergeConfig::default());

    // When: Two quotes for the same session are merged in order
    engine
        .merge(ID, &snapshot(ID, 11.2, 3_000, datetime!(2024-03-05 10:00 +8)))
        .await
        .expect("first merge");
    engine
        .merge(ID, &snapshot(ID, 11.4, 7_000, datetime!(2024-03-05 10:30 +8)))
        .await
        .expect("second merge");

    // Then: The trailing volume is the latest session total
    let merged = store.get(ID).await.expect("get").expect("series");
    assert_eq!(merged.last().expect("last").volume, 7_000);
}

// =============================================================================
// Merge: New Session
// =============================================================================

#[tokio::test]
async fn when_a_quote_arrives_for_a_new_session_then_a_bar_is_appended() {
    // Given: A series ending on 2024-03-05
    let store = seeded_store().await;
    let engine = MergeEngine::new(store.clone(), MergeConfig::default());

    // When: A quote for 2024-03-06 is merged
    let quote = snapshot(ID, 12.0, 4_000, datetime!(2024-03-06 09:45 +8));
    let outcome = engine.merge(ID, &quote).await.expect("merge");

    // Then: A third bar dated 2024-03-06 closes at the quote price
    assert_eq!(outcome, MergeOutcome::Appended);
    let merged = store.get(ID).await.expect("get").expect("series");
    assert_eq!(merged.len(), 3);
    let last = merged.last().expect("last bar");
    assert_eq!(last.trade_date, date!(2024 - 03 - 06));
    assert!((last.close - 12.0).abs() < 1e-9);
    assert!(merged.is_strictly_ordered());
}

#[tokio::test]
async fn when_the_same_quote_is_merged_twice_then_the_series_matches_a_single_merge() {
    // Given: A series ending on 2024-03-05 and a quote for the next session
    let store = seeded_store().await;
    let engine = MergeEngine::new(store.clone(), MergeConfig::default());
    let quote = snapshot(ID, 12.0, 4_000, datetime!(2024-03-06 09:45 +8));

    // When: The quote is merged once, then again
    engine.merge(ID, &quote).await.expect("first merge");
    let once = store.get(ID).await.expect("get").expect("series");
    let outcome = engine.merge(ID, &quote).await.expect("second merge");

    // Then: The replay lands on the new bar and changes nothing
    assert_eq!(outcome, MergeOutcome::Updated);
    let twice = store.get(ID).await.expect("get").expect("series");
    assert_eq!(once, twice);
}

#[tokio::test]
async fn when_an_append_exceeds_the_length_cap_then_the_oldest_bar_is_dropped() {
    // Given: A series already at the 250-bar cap
    let store = Arc::new(MemorySeriesStore::default());
    let full = series(ID, daily_bars(date!(2024 - 03 - 05), 250, 10.0));
    let oldest = full.bars()[0].trade_date;
    store.set(ID, &full, None).await.expect("seed");
    let engine = MergeEngine::new(store.clone(), MergeConfig::default());

    // When: A new session is appended
    engine
        .merge(ID, &snapshot(ID, 40.0, 1_000, datetime!(2024-03-06 10:00 +8)))
        .await
        .expect("merge");

    // Then: The length stays capped and the window slid forward by one day
    let merged = store.get(ID).await.expect("get").expect("series");
    assert_eq!(merged.len(), 250);
    assert!(merged.bars()[0].trade_date > oldest);
    assert_eq!(merged.last().expect("last").trade_date, date!(2024 - 03 - 06));
}

// =============================================================================
// Merge: Rejections
// =============================================================================

#[tokio::test]
async fn when_no_series_is_cached_then_merge_fails_fast() {
    // Given: An empty store
    let store = Arc::new(MemorySeriesStore::default());
    let engine = MergeEngine::new(store.clone(), MergeConfig::default());

    // When: A quote is merged
    let error = engine
        .merge(ID, &snapshot(ID, 11.0, 1_000, datetime!(2024-03-05 10:00 +8)))
        .await
        .expect_err("no series");

    // Then: The error asks for a full refresh and nothing is written
    assert!(matches!(error, MergeError::NoSeries { .. }));
    assert!(error.is_precondition());
    assert!(store.get(ID).await.expect("get").is_none());
}

#[tokio::test]
async fn when_a_quote_is_older_than_the_last_bar_then_history_is_untouched() {
    // Given: A series ending on 2024-03-05
    let store = seeded_store().await;
    let engine = MergeEngine::new(store.clone(), MergeConfig::default());

    // When: A quote for 2024-03-01 is merged
    let error = engine
        .merge(ID, &snapshot(ID, 9.0, 1_000, datetime!(2024-03-01 10:00 +8)))
        .await
        .expect_err("stale");

    // Then: The merge is rejected and the series is unchanged
    assert!(matches!(error, MergeError::StaleSnapshot { .. }));
    let stored = store.get(ID).await.expect("get").expect("series");
    assert_eq!(stored.len(), 2);
    assert!((stored.last().expect("last").close - 11.0).abs() < 1e-9);
}

// =============================================================================
// Realtime: Batch Merge
// =============================================================================

#[tokio::test]
async fn when_the_realtime_batch_meets_an_unseeded_instrument_then_it_is_reported() {
    // Given: One seeded instrument, one without a series, one without a quote
    let store = seeded_store().await;
    let quotes = ScriptedQuotes::new();
    quotes.set(snapshot(ID, 11.3, 2_000, datetime!(2024-03-05 10:00 +8)));
    quotes.set(snapshot("000001.SZ", 8.0, 2_000, datetime!(2024-03-05 10:00 +8)));
    let merger = RealtimeMerger::new(
        quotes,
        Arc::new(RateLimiter::per_minute(100)),
        Arc::new(MergeEngine::new(store, MergeConfig::default())),
        RealtimeConfig::default(),
    );
    let targets = vec![instrument(ID), instrument("000001.SZ"), instrument("510300.SH")];

    // When: The batch is merged
    let report = merger.merge_all(&targets, &CancellationToken::new()).await;

    // Then: Each instrument lands in its own bucket
    assert_eq!(report.total, 3);
    assert_eq!(report.updated, 1);
    assert_eq!(report.unseeded, vec!["000001.SZ".to_owned()]);
    assert_eq!(report.no_quote, 1);
    assert_eq!(report.failed, 0);
}
