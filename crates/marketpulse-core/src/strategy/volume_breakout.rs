use super::{Strategy, StrategyError, StrategyEvent};
use crate::Series;

/// Close above the prior `lookback`-bar high on volume at least
/// `volume_multiple` times the prior average.
#[derive(Debug, Clone)]
pub struct VolumeBreakout {
    lookback: usize,
    volume_multiple: f64,
}

impl Default for VolumeBreakout {
    fn default() -> Self {
        Self {
            lookback: 20,
            volume_multiple: 2.0,
        }
    }
}

impl VolumeBreakout {
    pub fn new(lookback: usize, volume_multiple: f64) -> Result<Self, StrategyError> {
        if lookback == 0 || !volume_multiple.is_finite() || volume_multiple <= 0.0 {
            return Err(StrategyError::InvalidParameters {
                strategy: "volume_breakout",
                reason: format!(
                    "need lookback > 0 and a positive multiple, got {lookback} and {volume_multiple}"
                ),
            });
        }
        Ok(Self {
            lookback,
            volume_multiple,
        })
    }
}

impl Strategy for VolumeBreakout {
    fn id(&self) -> &str {
        "volume_breakout"
    }

    fn min_bars(&self) -> usize {
        self.lookback + 1
    }

    fn apply(&self, series: &Series) -> Result<Vec<StrategyEvent>, StrategyError> {
        let bars = series.bars();
        let mut events = Vec::new();

        for index in self.lookback..bars.len() {
            let window = &bars[index - self.lookback..index];
            let prior_high = window.iter().map(|bar| bar.high).fold(f64::MIN, f64::max);
            let avg_volume =
                window.iter().map(|bar| bar.volume as f64).sum::<f64>() / self.lookback as f64;
            if avg_volume <= 0.0 {
                continue;
            }

            let bar = &bars[index];
            let volume_ratio = bar.volume as f64 / avg_volume;
            if bar.close > prior_high && volume_ratio >= self.volume_multiple {
                let breakout_pct = (bar.close - prior_high) / prior_high * 100.0;
                let confidence = 0.4 + 0.3 * (volume_ratio / (2.0 * self.volume_multiple)).min(1.0)
                    + 0.3 * (breakout_pct / 5.0).min(1.0);
                events.push(
                    StrategyEvent::new(index, confidence)
                        .with_metric("prior_high", prior_high)
                        .with_metric("volume_ratio", volume_ratio)
                        .with_metric("breakout_pct", breakout_pct),
                );
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::fixtures::series;

    #[test]
    fn fires_when_price_and_volume_break_out() {
        let strategy = VolumeBreakout::new(3, 2.0).expect("valid");
        let series = series(&[10.0, 10.0, 10.0, 10.0, 11.0], &[100, 100, 100, 100, 300]);

        let events = strategy.apply(&series).expect("apply");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].index, 4);
        assert_eq!(events[0].metrics["volume_ratio"], 3.0);
    }

    #[test]
    fn price_breakout_on_thin_volume_is_ignored() {
        let strategy = VolumeBreakout::new(3, 2.0).expect("valid");
        let series = series(&[10.0, 10.0, 10.0, 10.0, 11.0], &[100, 100, 100, 100, 150]);
        assert!(strategy.apply(&series).expect("apply").is_empty());
    }
}
