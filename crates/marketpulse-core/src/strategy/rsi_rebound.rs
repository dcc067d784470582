use super::{rsi, Strategy, StrategyError, StrategyEvent};
use crate::Series;

/// RSI crossing up through the oversold threshold.
#[derive(Debug, Clone)]
pub struct RsiRebound {
    period: usize,
    oversold: f64,
}

impl Default for RsiRebound {
    fn default() -> Self {
        Self {
            period: 14,
            oversold: 30.0,
        }
    }
}

impl RsiRebound {
    pub fn new(period: usize, oversold: f64) -> Result<Self, StrategyError> {
        if period < 2 || !(0.0..100.0).contains(&oversold) {
            return Err(StrategyError::InvalidParameters {
                strategy: "rsi_rebound",
                reason: format!("need period >= 2 and oversold in [0, 100), got {period} and {oversold}"),
            });
        }
        Ok(Self { period, oversold })
    }
}

impl Strategy for RsiRebound {
    fn id(&self) -> &str {
        "rsi_rebound"
    }

    fn min_bars(&self) -> usize {
        self.period + 2
    }

    fn apply(&self, series: &Series) -> Result<Vec<StrategyEvent>, StrategyError> {
        let values = rsi(&series.closes(), self.period);

        let mut events = Vec::new();
        for index in (self.period + 1)..values.len() {
            let (previous, current) = (values[index - 1], values[index]);
            if previous.is_nan() || current.is_nan() {
                continue;
            }
            if previous < self.oversold && current >= self.oversold {
                let depth = (self.oversold - previous) / self.oversold.max(1.0);
                events.push(
                    StrategyEvent::new(index, 0.5 + depth / 2.0)
                        .with_metric("rsi", current)
                        .with_metric("prev_rsi", previous),
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
    fn fires_when_rsi_leaves_oversold() {
        let strategy = RsiRebound::new(3, 30.0).expect("valid");
        let series = series(&[10.0, 9.0, 8.0, 7.0, 6.0, 8.0], &[]);

        let events = strategy.apply(&series).expect("apply");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].index, 5);
        assert_eq!(events[0].metrics["prev_rsi"], 0.0);
        assert_eq!(events[0].confidence, 1.0);
    }

    #[test]
    fn rejects_threshold_outside_scale() {
        assert!(RsiRebound::new(14, 120.0).is_err());
        assert!(RsiRebound::new(1, 30.0).is_err());
    }
}
