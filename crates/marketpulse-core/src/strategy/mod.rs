//! Pluggable buy-signal strategies.
//!
//! A strategy is a pure function over a bar series that reports every index it
//! fired on. It never sees stores or other instruments; the
//! [`SignalEngine`](crate::SignalEngine) decides which events become records.

mod golden_cross;
mod indicators;
mod rsi_rebound;
mod volume_breakout;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

use crate::Series;

pub use golden_cross::MaGoldenCross;
pub use indicators::{rsi, sma};
pub use rsi_rebound::RsiRebound;
pub use volume_breakout::VolumeBreakout;

/// One firing of a strategy at `index` of the series it was applied to.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyEvent {
    pub index: usize,
    /// Conviction in `[0, 1]`.
    pub confidence: f64,
    pub metrics: BTreeMap<String, f64>,
}

impl StrategyEvent {
    pub fn new(index: usize, confidence: f64) -> Self {
        Self {
            index,
            confidence: confidence.clamp(0.0, 1.0),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_owned(), value);
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StrategyError {
    #[error("strategy '{strategy}' has invalid parameters: {reason}")]
    InvalidParameters { strategy: &'static str, reason: String },
    #[error("strategy '{strategy}' failed: {reason}")]
    Failed { strategy: String, reason: String },
}

/// A signal strategy: identity, warm-up requirement, evaluation.
pub trait Strategy: Send + Sync {
    fn id(&self) -> &str;

    /// Series shorter than this are skipped without calling [`apply`](Self::apply).
    fn min_bars(&self) -> usize;

    fn apply(&self, series: &Series) -> Result<Vec<StrategyEvent>, StrategyError>;
}

/// Strategies available to the signal engine, keyed by id.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in strategies with their default parameters.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MaGoldenCross::default()));
        registry.register(Arc::new(VolumeBreakout::default()));
        registry.register(Arc::new(RsiRebound::default()));
        registry
    }

    /// Add a strategy, replacing any previous one with the same id.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies.insert(strategy.id().to_owned(), strategy);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(id).cloned()
    }

    /// Registered ids in lexical order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.strategies.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use time::macros::date;
    use time::Duration;

    use crate::{Bar, Series};

    /// Consecutive daily bars with a 1% envelope around each close.
    pub fn series(closes: &[f64], volumes: &[u64]) -> Series {
        let start = date!(2024 - 01 - 01);
        let bars = closes
            .iter()
            .enumerate()
            .map(|(index, close)| {
                let volume = volumes.get(index).copied().unwrap_or(1_000);
                Bar::new(
                    start + Duration::days(index as i64),
                    *close,
                    close * 1.01,
                    close * 0.99,
                    *close,
                    volume,
                    close * volume as f64,
                )
                .expect("valid bar")
            })
            .collect();
        Series::from_bars("600000.SH", bars, usize::MAX)
    }
}
