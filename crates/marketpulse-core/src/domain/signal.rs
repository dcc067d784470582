use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

/// Latest buy signal for one `(instrument, strategy)` pair.
///
/// A newer computation for the same pair replaces the record; no history is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub instrument_id: String,
    pub strategy_id: String,
    pub price: f64,
    #[serde(with = "super::trade_date")]
    pub bar_date: Date,
    pub confidence: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub computed_at: OffsetDateTime,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl SignalRecord {
    pub fn key(&self) -> (&str, &str) {
        (self.instrument_id.as_str(), self.strategy_id.as_str())
    }
}
