use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use time::{Date, Duration, OffsetDateTime, UtcOffset, Weekday};

use crate::source::{MarketDataProvider, QuoteSource, SourceError, SourceFuture};
use crate::{Bar, Instrument, RealtimeSnapshot};

/// Offline provider producing a deterministic price path per instrument.
///
/// Each weekday's bar depends only on `(seed, instrument, date)`, so overlapping
/// windows agree with each other and reruns are reproducible.
#[derive(Debug, Clone)]
pub struct SyntheticAdapter {
    seed: u64,
    market_offset: UtcOffset,
}

impl Default for SyntheticAdapter {
    fn default() -> Self {
        Self::new(7)
    }
}

impl SyntheticAdapter {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            market_offset: UtcOffset::from_hms(8, 0, 0).unwrap_or(UtcOffset::UTC),
        }
    }

    pub fn with_market_offset(mut self, market_offset: UtcOffset) -> Self {
        self.market_offset = market_offset;
        self
    }

    fn instrument_hash(&self, instrument: &Instrument) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        instrument.id.hash(&mut hasher);
        hasher.finish()
    }

    fn close_on(&self, base_hash: u64, date: Date) -> f64 {
        let base = 5.0 + (base_hash % 4_000) as f64 / 100.0;
        let day = f64::from(date.to_julian_day());
        let phase = (base_hash % 360) as f64;
        let trend = 1.0 + 0.15 * ((day + phase) / 37.0).sin() + 0.05 * ((day + phase) / 11.0).sin();
        let mut rng = fastrand::Rng::with_seed(base_hash ^ (date.to_julian_day() as u64));
        let noise = 1.0 + (rng.f64() - 0.5) * 0.02;
        round2(base * trend * noise)
    }

    fn bar_on(&self, base_hash: u64, date: Date, prev_close: f64) -> Result<Bar, SourceError> {
        let close = self.close_on(base_hash, date);
        let mut rng = fastrand::Rng::with_seed(base_hash.rotate_left(17) ^ (date.to_julian_day() as u64));
        let open = if prev_close > 0.0 {
            round2(prev_close * (1.0 + (rng.f64() - 0.5) * 0.01))
        } else {
            close
        };
        let high = round2(open.max(close) * (1.0 + rng.f64() * 0.01));
        let low = round2(open.min(close) * (1.0 - rng.f64() * 0.01));
        let volume = 50_000 + rng.u64(0..450_000);
        let amount = round2(volume as f64 * close * 100.0);

        let bar = Bar::new(date, open, high, low, close, volume, amount)
            .map_err(|error| SourceError::invalid_data(error.to_string()))?;
        Ok(if prev_close > 0.0 {
            bar.with_prev_close(prev_close)
        } else {
            bar
        })
    }
}

impl MarketDataProvider for SyntheticAdapter {
    fn id(&self) -> &'static str {
        "synthetic"
    }

    fn get_bars<'a>(
        &'a self,
        instrument: &'a Instrument,
        start: Date,
        end: Date,
    ) -> SourceFuture<'a, Vec<Bar>> {
        Box::pin(async move {
            let base_hash = self.instrument_hash(instrument);
            let mut bars = Vec::new();
            let mut prev_close = 0.0;
            let mut date = start;
            while date <= end {
                if !is_weekend(date) {
                    let bar = self.bar_on(base_hash, date, prev_close)?;
                    prev_close = bar.close;
                    bars.push(bar);
                }
                match date.next_day() {
                    Some(next) => date = next,
                    None => break,
                }
            }

            if bars.is_empty() {
                return Err(SourceError::empty(format!(
                    "no weekdays between {start} and {end}"
                )));
            }
            Ok(bars)
        })
    }
}

impl QuoteSource for SyntheticAdapter {
    fn get_snapshot<'a>(
        &'a self,
        instrument: &'a Instrument,
    ) -> SourceFuture<'a, Option<RealtimeSnapshot>> {
        Box::pin(async move {
            let observed_at = OffsetDateTime::now_utc();
            let today = observed_at.to_offset(self.market_offset).date();
            if is_weekend(today) {
                return Ok(None);
            }

            let base_hash = self.instrument_hash(instrument);
            let prev_close = self.close_on(base_hash, previous_weekday(today));
            let bar = self.bar_on(base_hash, today, prev_close)?;
            let minute = observed_at.unix_timestamp() / 60;
            let mut rng = fastrand::Rng::with_seed(base_hash ^ minute as u64);
            let price = round2((bar.low + (bar.high - bar.low) * rng.f64()).max(0.01));

            Ok(Some(RealtimeSnapshot {
                instrument_id: instrument.id.clone(),
                price,
                open: bar.open,
                high: bar.high.max(price),
                low: bar.low.min(price),
                prev_close,
                volume: bar.volume,
                amount: bar.amount,
                change_pct: round2((price - prev_close) / prev_close * 100.0),
                observed_at,
            }))
        })
    }
}

fn is_weekend(date: Date) -> bool {
    matches!(date.weekday(), Weekday::Saturday | Weekday::Sunday)
}

fn previous_weekday(date: Date) -> Date {
    let mut previous = date - Duration::days(1);
    while is_weekend(previous) {
        previous -= Duration::days(1);
    }
    previous
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn instrument() -> Instrument {
        Instrument::parse_id("600519.SH").expect("valid id")
    }

    #[tokio::test]
    async fn produces_weekday_bars_only() {
        let adapter = SyntheticAdapter::new(1);
        let bars = adapter
            .get_bars(&instrument(), date!(2024 - 01 - 01), date!(2024 - 01 - 14))
            .await
            .expect("bars");

        assert_eq!(bars.len(), 10);
        assert!(bars.iter().all(|bar| !is_weekend(bar.trade_date)));
        assert!(bars.iter().all(|bar| bar.validate().is_ok()));
    }

    #[tokio::test]
    async fn overlapping_windows_agree_on_closes() {
        let adapter = SyntheticAdapter::new(42);
        let long = adapter
            .get_bars(&instrument(), date!(2024 - 01 - 01), date!(2024 - 02 - 29))
            .await
            .expect("bars");
        let short = adapter
            .get_bars(&instrument(), date!(2024 - 02 - 01), date!(2024 - 02 - 29))
            .await
            .expect("bars");

        let tail: Vec<f64> = long[long.len() - short.len()..].iter().map(|bar| bar.close).collect();
        let closes: Vec<f64> = short.iter().map(|bar| bar.close).collect();
        assert_eq!(tail, closes);
    }

    #[tokio::test]
    async fn weekend_only_range_is_empty() {
        let adapter = SyntheticAdapter::default();
        let error = adapter
            .get_bars(&instrument(), date!(2024 - 01 - 06), date!(2024 - 01 - 07))
            .await
            .expect_err("must fail");
        assert!(error.retryable());
    }
}
