use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, UtcOffset};

/// Single point-in-time quote produced by a realtime quote source.
///
/// `volume` and `amount` are the cumulative totals for the session so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeSnapshot {
    pub instrument_id: String,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub prev_close: f64,
    pub volume: u64,
    pub amount: f64,
    pub change_pct: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
}

impl RealtimeSnapshot {
    /// Calendar date of the session this quote belongs to, in market time.
    pub fn session_date(&self, market_offset: UtcOffset) -> Date {
        self.observed_at.to_offset(market_offset).date()
    }

    /// A quote with no traded price carries nothing to merge.
    pub fn has_price(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}
