use super::{sma, Strategy, StrategyError, StrategyEvent};
use crate::Series;

/// Fast SMA crossing above the slow SMA.
#[derive(Debug, Clone)]
pub struct MaGoldenCross {
    fast: usize,
    slow: usize,
}

impl Default for MaGoldenCross {
    fn default() -> Self {
        Self { fast: 5, slow: 20 }
    }
}

impl MaGoldenCross {
    pub fn new(fast: usize, slow: usize) -> Result<Self, StrategyError> {
        if fast == 0 || slow <= fast {
            return Err(StrategyError::InvalidParameters {
                strategy: "ma_golden_cross",
                reason: format!("need 0 < fast < slow, got fast={fast} slow={slow}"),
            });
        }
        Ok(Self { fast, slow })
    }
}

impl Strategy for MaGoldenCross {
    fn id(&self) -> &str {
        "ma_golden_cross"
    }

    fn min_bars(&self) -> usize {
        self.slow + 1
    }

    fn apply(&self, series: &Series) -> Result<Vec<StrategyEvent>, StrategyError> {
        let closes = series.closes();
        let fast = sma(&closes, self.fast);
        let slow = sma(&closes, self.slow);

        let mut events = Vec::new();
        for index in self.slow..closes.len() {
            let (fast_now, slow_now) = (fast[index], slow[index]);
            let (fast_prev, slow_prev) = (fast[index - 1], slow[index - 1]);
            if [fast_now, slow_now, fast_prev, slow_prev].iter().any(|value| value.is_nan()) {
                continue;
            }
            if fast_now > slow_now && fast_prev <= slow_prev && slow_now > 0.0 {
                let spread_pct = (fast_now - slow_now) / slow_now * 100.0;
                events.push(
                    StrategyEvent::new(index, 0.5 + spread_pct / 4.0)
                        .with_metric("fast_ma", fast_now)
                        .with_metric("slow_ma", slow_now)
                        .with_metric("spread_pct", spread_pct),
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
    fn fires_on_the_crossing_bar_only() {
        let strategy = MaGoldenCross::new(2, 4).expect("valid");
        let series = series(&[10.0, 9.0, 8.0, 7.0, 6.0, 7.0, 9.0], &[]);

        let events = strategy.apply(&series).expect("apply");

        assert_eq!(events.iter().map(|event| event.index).collect::<Vec<_>>(), vec![6]);
        assert_eq!(events[0].metrics["fast_ma"], 8.0);
        assert!(events[0].confidence > 0.5);
    }

    #[test]
    fn no_event_while_fast_stays_above() {
        let strategy = MaGoldenCross::new(2, 4).expect("valid");
        let rising: Vec<f64> = (1..=10).map(f64::from).collect();
        assert!(strategy.apply(&series(&rising, &[])).expect("apply").is_empty());
    }

    #[test]
    fn rejects_inverted_periods() {
        assert!(MaGoldenCross::new(20, 5).is_err());
        assert!(MaGoldenCross::new(0, 5).is_err());
    }
}
