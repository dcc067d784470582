//! Keyed storage for series and signal records.
//!
//! [`SeriesStore`] is the cache the fetch orchestrator overwrites and the merge
//! engine updates; [`SignalStore`] holds the at-most-one signal per
//! `(instrument, strategy)` pair. Series are stored as JSON blobs under
//! [`series_key`] keys so any blob cache can back them. [`CycleLog`] keeps the
//! summaries of finished cycles.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;

use crate::cycle::CycleSummary;
use crate::{Series, SignalRecord};

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Storage backend failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to encode or decode stored value: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Cache key for an instrument's daily series.
pub fn series_key(instrument_id: &str) -> String {
    format!("series:daily:{instrument_id}")
}

/// Series cache contract: `get`, `set` with optional TTL, `delete`.
pub trait SeriesStore: Send + Sync {
    fn get<'a>(&'a self, instrument_id: &'a str) -> StoreFuture<'a, Option<Series>>;

    /// Replace the stored series. `ttl` overrides the store default.
    fn set<'a>(
        &'a self,
        instrument_id: &'a str,
        series: &'a Series,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, ()>;

    fn delete<'a>(&'a self, instrument_id: &'a str) -> StoreFuture<'a, ()>;

    /// Drop every entry whose TTL has passed; returns the count removed.
    fn purge_expired(&self) -> StoreFuture<'_, usize>;
}

/// Signal record persistence contract.
pub trait SignalStore: Send + Sync {
    /// Insert or overwrite the record for its `(instrument, strategy)` key.
    fn upsert<'a>(&'a self, record: &'a SignalRecord) -> StoreFuture<'a, ()>;

    /// Records sorted by strategy then instrument, optionally for one strategy.
    fn list<'a>(&'a self, strategy_id: Option<&'a str>) -> StoreFuture<'a, Vec<SignalRecord>>;

    /// Delete every record belonging to `strategy_ids`; returns the count removed.
    fn clear_strategies<'a>(&'a self, strategy_ids: &'a [String]) -> StoreFuture<'a, usize>;
}

/// Append-only record of finished cycles.
pub trait CycleLog: Send + Sync {
    fn record<'a>(&'a self, summary: &'a CycleSummary) -> StoreFuture<'a, ()>;

    /// Most recent summaries first.
    fn recent(&self, limit: usize) -> StoreFuture<'_, Vec<CycleSummary>>;
}

#[derive(Debug, Clone)]
struct BlobEntry {
    body: String,
    expires_at: Option<Instant>,
}

impl BlobEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| now <= expires_at)
    }
}

/// Thread-safe in-memory series cache holding JSON blobs with optional expiry.
#[derive(Debug, Clone)]
pub struct MemorySeriesStore {
    inner: Arc<RwLock<HashMap<String, BlobEntry>>>,
    default_ttl: Option<Duration>,
}

impl Default for MemorySeriesStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MemorySeriesStore {
    /// Create a store; `default_ttl = None` keeps entries until overwritten.
    pub fn new(default_ttl: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            default_ttl,
        }
    }

    /// Number of entries, including expired ones not yet cleared.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl SeriesStore for MemorySeriesStore {
    fn get<'a>(&'a self, instrument_id: &'a str) -> StoreFuture<'a, Option<Series>> {
        Box::pin(async move {
            let body = {
                let map = self.inner.read().await;
                map.get(&series_key(instrument_id))
                    .filter(|entry| entry.is_live(Instant::now()))
                    .map(|entry| entry.body.clone())
            };
            match body {
                Some(body) => Ok(Some(serde_json::from_str(&body)?)),
                None => Ok(None),
            }
        })
    }

    fn set<'a>(
        &'a self,
        instrument_id: &'a str,
        series: &'a Series,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let body = serde_json::to_string(series)?;
            let expires_at = ttl.or(self.default_ttl).map(|ttl| Instant::now() + ttl);
            self.inner
                .write()
                .await
                .insert(series_key(instrument_id), BlobEntry { body, expires_at });
            Ok(())
        })
    }

    fn delete<'a>(&'a self, instrument_id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.inner.write().await.remove(&series_key(instrument_id));
            Ok(())
        })
    }

    fn purge_expired(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let now = Instant::now();
            let mut map = self.inner.write().await;
            let before = map.len();
            map.retain(|_, entry| entry.is_live(now));
            Ok(before - map.len())
        })
    }
}

/// In-memory signal table keyed by `(strategy_id, instrument_id)`.
#[derive(Debug, Clone, Default)]
pub struct MemorySignalStore {
    inner: Arc<RwLock<BTreeMap<(String, String), SignalRecord>>>,
}

impl MemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

impl SignalStore for MemorySignalStore {
    fn upsert<'a>(&'a self, record: &'a SignalRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let key = (record.strategy_id.clone(), record.instrument_id.clone());
            self.inner.write().await.insert(key, record.clone());
            Ok(())
        })
    }

    fn list<'a>(&'a self, strategy_id: Option<&'a str>) -> StoreFuture<'a, Vec<SignalRecord>> {
        Box::pin(async move {
            let map = self.inner.read().await;
            Ok(map
                .values()
                .filter(|record| strategy_id.map_or(true, |id| record.strategy_id == id))
                .cloned()
                .collect())
        })
    }

    fn clear_strategies<'a>(&'a self, strategy_ids: &'a [String]) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let mut map = self.inner.write().await;
            let before = map.len();
            map.retain(|(strategy, _), _| !strategy_ids.contains(strategy));
            Ok(before - map.len())
        })
    }
}

/// Bounded in-memory cycle log keeping the newest `capacity` summaries.
#[derive(Debug, Clone)]
pub struct MemoryCycleLog {
    inner: Arc<RwLock<VecDeque<CycleSummary>>>,
    capacity: usize,
}

impl MemoryCycleLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }
}

impl Default for MemoryCycleLog {
    fn default() -> Self {
        Self::new(500)
    }
}

impl CycleLog for MemoryCycleLog {
    fn record<'a>(&'a self, summary: &'a CycleSummary) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut log = self.inner.write().await;
            log.push_front(summary.clone());
            log.truncate(self.capacity);
            Ok(())
        })
    }

    fn recent(&self, limit: usize) -> StoreFuture<'_, Vec<CycleSummary>> {
        Box::pin(async move {
            Ok(self.inner.read().await.iter().take(limit).cloned().collect())
        })
    }
}
