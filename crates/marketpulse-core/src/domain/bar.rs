use serde::{Deserialize, Serialize};
use time::Date;

use crate::ValidationError;

/// One trading-session OHLCV record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    #[serde(with = "super::trade_date")]
    pub trade_date: Date,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub prev_close: f64,
    #[serde(default)]
    pub change: f64,
    #[serde(default)]
    pub change_pct: f64,
    pub volume: u64,
    pub amount: f64,
}

impl Bar {
    pub fn new(
        trade_date: Date,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
        amount: f64,
    ) -> Result<Self, ValidationError> {
        let bar = Self {
            trade_date,
            open,
            high,
            low,
            close,
            prev_close: 0.0,
            change: 0.0,
            change_pct: 0.0,
            volume,
            amount,
        };
        bar.validate()?;
        Ok(bar)
    }

    /// Set the previous close and derive `change`/`change_pct` from it.
    pub fn with_prev_close(mut self, prev_close: f64) -> Self {
        self.prev_close = prev_close;
        self.recompute_change();
        self
    }

    pub(crate) fn recompute_change(&mut self) {
        if self.prev_close > 0.0 {
            self.change = self.close - self.prev_close;
            self.change_pct = self.change / self.prev_close * 100.0;
        }
    }

    /// Check the price fields and the high/low envelope.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_price("open", self.open)?;
        validate_price("high", self.high)?;
        validate_price("low", self.low)?;
        validate_price("close", self.close)?;
        validate_price("amount", self.amount)?;

        if self.high < self.low {
            return Err(ValidationError::InvalidBarRange);
        }
        if self.open < self.low
            || self.open > self.high
            || self.close < self.low
            || self.close > self.high
        {
            return Err(ValidationError::InvalidBarBounds);
        }
        Ok(())
    }
}

/// Ordered, date-unique bar history for one instrument.
///
/// Bars are strictly increasing by `trade_date`. Every constructor and mutator
/// keeps that invariant; deserialized blobs are normalized on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSeries")]
pub struct Series {
    pub instrument_id: String,
    bars: Vec<Bar>,
}

#[derive(Deserialize)]
struct RawSeries {
    instrument_id: String,
    bars: Vec<Bar>,
}

impl From<RawSeries> for Series {
    fn from(raw: RawSeries) -> Self {
        Series::from_bars(raw.instrument_id, raw.bars, usize::MAX)
    }
}

impl Series {
    /// Build a series from provider bars in any order.
    ///
    /// Duplicate dates keep the last occurrence, missing `prev_close` values are
    /// filled from the preceding bar, and the result keeps the newest `max_len` bars.
    pub fn from_bars(instrument_id: impl Into<String>, mut bars: Vec<Bar>, max_len: usize) -> Self {
        bars.sort_by_key(|bar| bar.trade_date);

        let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.trade_date == bar.trade_date => *last = bar,
                _ => deduped.push(bar),
            }
        }

        for index in 1..deduped.len() {
            if deduped[index].prev_close <= 0.0 {
                let prev_close = deduped[index - 1].close;
                deduped[index].prev_close = prev_close;
                deduped[index].recompute_change();
            }
        }

        let mut series = Self {
            instrument_id: instrument_id.into(),
            bars: deduped,
        };
        series.truncate_to(max_len);
        series
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn last_index(&self) -> Option<usize> {
        self.bars.len().checked_sub(1)
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|bar| bar.close).collect()
    }

    pub(crate) fn last_mut(&mut self) -> Option<&mut Bar> {
        self.bars.last_mut()
    }

    /// Append a bar dated strictly after the trailing bar.
    pub(crate) fn push_after_last(&mut self, bar: Bar) -> bool {
        if let Some(last) = self.bars.last() {
            if bar.trade_date <= last.trade_date {
                return false;
            }
        }
        self.bars.push(bar);
        true
    }

    /// Drop the oldest bars so at most `max_len` remain.
    pub fn truncate_to(&mut self, max_len: usize) {
        if self.bars.len() > max_len {
            let excess = self.bars.len() - max_len;
            self.bars.drain(..excess);
        }
    }

    pub fn is_strictly_ordered(&self) -> bool {
        self.bars
            .windows(2)
            .all(|pair| pair[0].trade_date < pair[1].trade_date)
    }
}

fn validate_price(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}
