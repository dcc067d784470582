//! Incremental merge of realtime snapshots into cached series.
//!
//! A snapshot either updates the trailing bar (same session) or appends a new
//! bar (later session). Volume and amount are cumulative session totals and
//! replace the trailing bar's values rather than adding to them.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use time::{Date, UtcOffset};
use tracing::debug;

use crate::calendar::TradingCalendar;
use crate::store::{SeriesStore, StoreError};
use crate::{Bar, RealtimeSnapshot, Series};

#[derive(Debug, Clone, PartialEq)]
pub struct MergeConfig {
    pub max_series_len: usize,
    pub market_offset: UtcOffset,
    pub series_ttl: Option<Duration>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_series_len: 250,
            market_offset: UtcOffset::from_hms(8, 0, 0).unwrap_or(UtcOffset::UTC),
            series_ttl: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Trailing bar for the same session was updated in place.
    Updated,
    /// A new session bar was appended.
    Appended,
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no cached series for {instrument_id}; a full refresh must seed it first")]
    NoSeries { instrument_id: String },
    #[error("snapshot session {session} is older than the last bar {last}")]
    StaleSnapshot { session: Date, last: Date },
    #[error("snapshot rejected: {reason}")]
    InvalidSnapshot { reason: String },
    #[error("session {session} is not a trading day")]
    ClosedSession { session: Date },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MergeError {
    /// True when the instrument must wait for a full refresh before merging again.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::NoSeries { .. })
    }
}

/// Fold `snapshot` into `series` for the session dated `session`.
///
/// Never reorders history: a snapshot older than the trailing bar is rejected
/// and the series is left untouched.
pub fn apply_snapshot(
    series: &mut Series,
    snapshot: &RealtimeSnapshot,
    session: Date,
    max_len: usize,
) -> Result<MergeOutcome, MergeError> {
    if !snapshot.has_price() {
        return Err(MergeError::InvalidSnapshot {
            reason: format!("price {} is not a positive number", snapshot.price),
        });
    }

    let Some(last) = series.last() else {
        return Err(MergeError::NoSeries {
            instrument_id: series.instrument_id.clone(),
        });
    };
    let last_date = last.trade_date;
    let last_close = last.close;

    let outcome = if session == last_date {
        if let Some(bar) = series.last_mut() {
            update_bar(bar, snapshot);
        }
        MergeOutcome::Updated
    } else if session > last_date {
        let bar = new_bar(snapshot, session, last_close)?;
        if !series.push_after_last(bar) {
            return Err(MergeError::StaleSnapshot {
                session,
                last: last_date,
            });
        }
        MergeOutcome::Appended
    } else {
        return Err(MergeError::StaleSnapshot {
            session,
            last: last_date,
        });
    };

    series.truncate_to(max_len);
    Ok(outcome)
}

fn update_bar(bar: &mut Bar, snapshot: &RealtimeSnapshot) {
    let price = snapshot.price;
    bar.high = bar.high.max(snapshot.high).max(price);
    bar.low = positive_min(&[bar.low, snapshot.low, price]).unwrap_or(price);
    bar.close = price;
    if bar.open <= 0.0 {
        bar.open = if snapshot.open > 0.0 { snapshot.open } else { price };
    }
    bar.high = bar.high.max(bar.open);
    bar.low = bar.low.min(bar.open);
    bar.volume = snapshot.volume;
    bar.amount = snapshot.amount;
    if bar.prev_close <= 0.0 && snapshot.prev_close > 0.0 {
        bar.prev_close = snapshot.prev_close;
    }
    bar.recompute_change();
}

fn new_bar(snapshot: &RealtimeSnapshot, session: Date, last_close: f64) -> Result<Bar, MergeError> {
    let price = snapshot.price;
    let open = if snapshot.open > 0.0 { snapshot.open } else { price };
    let high = snapshot.high.max(open).max(price);
    let low = positive_min(&[snapshot.low, open, price]).unwrap_or(price);
    let prev_close = if snapshot.prev_close > 0.0 {
        snapshot.prev_close
    } else {
        last_close
    };

    Bar::new(session, open, high, low, price, snapshot.volume, snapshot.amount.max(0.0))
        .map(|bar| bar.with_prev_close(prev_close))
        .map_err(|error| MergeError::InvalidSnapshot {
            reason: error.to_string(),
        })
}

/// Smallest strictly positive value; zero means "not yet set" upstream.
fn positive_min(values: &[f64]) -> Option<f64> {
    values
        .iter()
        .copied()
        .filter(|value| value.is_finite() && *value > 0.0)
        .reduce(f64::min)
}

/// Reads, merges, and writes back one instrument's series.
pub struct MergeEngine {
    store: Arc<dyn SeriesStore>,
    config: MergeConfig,
    calendar: Option<TradingCalendar>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn SeriesStore>, config: MergeConfig) -> Self {
        Self {
            store,
            config,
            calendar: None,
        }
    }

    /// Reject snapshots whose session falls on a day the calendar marks closed.
    pub fn with_calendar(mut self, calendar: TradingCalendar) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge one snapshot. Fails fast when the store has no non-empty series.
    pub async fn merge(
        &self,
        instrument_id: &str,
        snapshot: &RealtimeSnapshot,
    ) -> Result<MergeOutcome, MergeError> {
        let mut series = self
            .store
            .get(instrument_id)
            .await?
            .filter(|series| !series.is_empty())
            .ok_or_else(|| MergeError::NoSeries {
                instrument_id: instrument_id.to_owned(),
            })?;

        let session = snapshot.session_date(self.config.market_offset);
        if let Some(calendar) = &self.calendar {
            if !calendar.is_trading_day(session) {
                return Err(MergeError::ClosedSession { session });
            }
        }
        let outcome = apply_snapshot(&mut series, snapshot, session, self.config.max_series_len)?;
        self.store
            .set(instrument_id, &series, self.config.series_ttl)
            .await?;

        debug!(
            instrument = instrument_id,
            ?outcome,
            session = %session,
            len = series.len(),
            "snapshot merged"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySeriesStore;
    use time::macros::{date, datetime};

    fn bar(trade_date: Date, close: f64) -> Bar {
        Bar::new(trade_date, close, close + 0.2, close - 0.2, close, 1_000, close * 1_000.0)
            .expect("valid bar")
    }

    fn seeded() -> Series {
        Series::from_bars(
            "600000.SH",
            vec![bar(date!(2024 - 03 - 04), 10.0), bar(date!(2024 - 03 - 05), 11.0)],
            10,
        )
    }

    fn snapshot(price: f64, high: f64, low: f64) -> RealtimeSnapshot {
        RealtimeSnapshot {
            instrument_id: String::from("600000.SH"),
            price,
            open: 11.0,
            high,
            low,
            prev_close: 10.0,
            volume: 5_000,
            amount: 57_000.0,
            change_pct: 0.0,
            observed_at: datetime!(2024-03-05 03:00 UTC),
        }
    }

    #[test]
    fn same_session_updates_trailing_bar() {
        let mut series = seeded();

        let outcome = apply_snapshot(&mut series, &snapshot(11.5, 11.6, 10.9), date!(2024 - 03 - 05), 10)
            .expect("merge");

        assert_eq!(outcome, MergeOutcome::Updated);
        assert_eq!(series.len(), 2);
        let last = series.last().expect("last");
        assert_eq!(last.close, 11.5);
        assert_eq!(last.high, 11.6);
        assert!((last.low - 10.8).abs() < 1e-9);
        assert_eq!(last.volume, 5_000);
    }

    #[test]
    fn zero_snapshot_low_is_ignored() {
        let mut series = seeded();
        apply_snapshot(&mut series, &snapshot(11.1, 11.1, 0.0), date!(2024 - 03 - 05), 10)
            .expect("merge");
        assert!((series.last().expect("last").low - 10.8).abs() < 1e-9);
    }

    #[test]
    fn new_session_appends_and_keeps_history() {
        let mut series = seeded();
        let before = series.bars()[..2].to_vec();

        let outcome = apply_snapshot(&mut series, &snapshot(11.5, 11.6, 10.9), date!(2024 - 03 - 06), 10)
            .expect("merge");

        assert_eq!(outcome, MergeOutcome::Appended);
        assert_eq!(series.len(), 3);
        assert_eq!(&series.bars()[..2], before.as_slice());
        let last = series.last().expect("last");
        assert_eq!(last.trade_date, date!(2024 - 03 - 06));
        assert_eq!(last.close, 11.5);
        assert_eq!(last.prev_close, 10.0);
    }

    #[test]
    fn append_truncates_from_the_front() {
        let mut series = seeded();
        apply_snapshot(&mut series, &snapshot(11.5, 11.6, 10.9), date!(2024 - 03 - 06), 2)
            .expect("merge");

        assert_eq!(series.len(), 2);
        assert_eq!(series.bars()[0].trade_date, date!(2024 - 03 - 05));
    }

    #[test]
    fn stale_snapshot_is_rejected_without_changes() {
        let mut series = seeded();
        let before = series.clone();

        let error = apply_snapshot(&mut series, &snapshot(9.0, 9.0, 9.0), date!(2024 - 03 - 01), 10)
            .expect_err("stale");

        assert!(matches!(error, MergeError::StaleSnapshot { .. }));
        assert_eq!(series, before);
    }

    #[test]
    fn priceless_snapshot_is_invalid() {
        let mut series = seeded();
        let error = apply_snapshot(&mut series, &snapshot(0.0, 0.0, 0.0), date!(2024 - 03 - 05), 10)
            .expect_err("invalid");
        assert!(matches!(error, MergeError::InvalidSnapshot { .. }));
    }

    #[tokio::test]
    async fn merge_without_series_fails_fast() {
        let engine = MergeEngine::new(Arc::new(MemorySeriesStore::default()), MergeConfig::default());

        let error = engine
            .merge("600000.SH", &snapshot(11.5, 11.6, 10.9))
            .await
            .expect_err("no series");

        assert!(error.is_precondition());
    }

    #[tokio::test]
    async fn merge_uses_market_offset_for_session_date() {
        let store = Arc::new(MemorySeriesStore::default());
        store.set("600000.SH", &seeded(), None).await.expect("seed");
        let engine = MergeEngine::new(store.clone(), MergeConfig::default());

        // 2024-03-05 17:00 UTC is already 2024-03-06 in market time.
        let mut late = snapshot(11.5, 11.6, 10.9);
        late.observed_at = datetime!(2024-03-05 17:00 UTC);
        let outcome = engine.merge("600000.SH", &late).await.expect("merge");

        assert_eq!(outcome, MergeOutcome::Appended);
        let stored = store.get("600000.SH").await.expect("get").expect("stored");
        assert_eq!(stored.last().map(|bar| bar.trade_date), Some(date!(2024 - 03 - 06)));
    }

    #[tokio::test]
    async fn merge_rejects_sessions_the_calendar_marks_closed() {
        let store = Arc::new(MemorySeriesStore::default());
        store.set("600000.SH", &seeded(), None).await.expect("seed");
        let engine = MergeEngine::new(store.clone(), MergeConfig::default())
            .with_calendar(TradingCalendar::default());

        // Saturday in market time.
        let mut weekend = snapshot(11.5, 11.6, 10.9);
        weekend.observed_at = datetime!(2024-03-09 02:00 UTC);
        let error = engine.merge("600000.SH", &weekend).await.expect_err("closed");

        assert!(matches!(error, MergeError::ClosedSession { session } if session == date!(2024 - 03 - 09)));
        assert_eq!(store.get("600000.SH").await.expect("get"), Some(seeded()));
    }
}
