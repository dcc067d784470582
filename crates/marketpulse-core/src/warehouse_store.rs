//! Store implementations backed by the DuckDB warehouse.
//!
//! The warehouse is synchronous; every call runs on the blocking pool.

use std::time::Duration;

use marketpulse_warehouse::{CycleRow, SignalRow, Warehouse, WarehouseError};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::cycle::CycleSummary;
use crate::domain::{format_trade_date, parse_trade_date};
use crate::store::{series_key, CycleLog, SeriesStore, SignalStore, StoreError, StoreFuture};
use crate::{Series, SignalRecord};

impl From<WarehouseError> for StoreError {
    fn from(error: WarehouseError) -> Self {
        Self::Backend(error.to_string())
    }
}

async fn blocking<T, F>(warehouse: &Warehouse, task: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&Warehouse) -> Result<T, StoreError> + Send + 'static,
{
    let warehouse = warehouse.clone();
    tokio::task::spawn_blocking(move || task(&warehouse))
        .await
        .map_err(|error| StoreError::Backend(format!("warehouse task failed: {error}")))?
}

/// [`SeriesStore`] keeping series as JSON blobs in `blob_cache`.
#[derive(Clone)]
pub struct WarehouseSeriesStore {
    warehouse: Warehouse,
    default_ttl: Option<Duration>,
}

impl WarehouseSeriesStore {
    pub fn new(warehouse: Warehouse, default_ttl: Option<Duration>) -> Self {
        Self {
            warehouse,
            default_ttl,
        }
    }
}

impl SeriesStore for WarehouseSeriesStore {
    fn get<'a>(&'a self, instrument_id: &'a str) -> StoreFuture<'a, Option<Series>> {
        let key = series_key(instrument_id);
        Box::pin(async move {
            let body = blocking(&self.warehouse, move |warehouse| {
                Ok(warehouse.get_blob(&key)?)
            })
            .await?;
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
        let key = series_key(instrument_id);
        let ttl = ttl.or(self.default_ttl);
        Box::pin(async move {
            let body = serde_json::to_string(series)?;
            blocking(&self.warehouse, move |warehouse| {
                Ok(warehouse.put_blob(&key, &body, ttl)?)
            })
            .await
        })
    }

    fn delete<'a>(&'a self, instrument_id: &'a str) -> StoreFuture<'a, ()> {
        let key = series_key(instrument_id);
        Box::pin(async move {
            blocking(&self.warehouse, move |warehouse| Ok(warehouse.delete_blob(&key)?)).await
        })
    }

    fn purge_expired(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            blocking(&self.warehouse, |warehouse| Ok(warehouse.purge_expired()?)).await
        })
    }
}

/// [`SignalStore`] over the `signals` table.
#[derive(Clone)]
pub struct WarehouseSignalStore {
    warehouse: Warehouse,
}

impl WarehouseSignalStore {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }
}

fn to_row(record: &SignalRecord) -> Result<SignalRow, StoreError> {
    Ok(SignalRow {
        instrument_id: record.instrument_id.clone(),
        strategy_id: record.strategy_id.clone(),
        price: record.price,
        bar_date: format_trade_date(record.bar_date),
        confidence: record.confidence,
        computed_at: record
            .computed_at
            .format(&Rfc3339)
            .map_err(|error| StoreError::Backend(error.to_string()))?,
        metrics: serde_json::to_string(&record.metrics)?,
    })
}

fn from_row(row: SignalRow) -> Result<SignalRecord, StoreError> {
    Ok(SignalRecord {
        bar_date: parse_trade_date(&row.bar_date)
            .map_err(|error| StoreError::Backend(error.to_string()))?,
        computed_at: OffsetDateTime::parse(&row.computed_at, &Rfc3339)
            .map_err(|error| StoreError::Backend(error.to_string()))?,
        metrics: serde_json::from_str(&row.metrics)?,
        instrument_id: row.instrument_id,
        strategy_id: row.strategy_id,
        price: row.price,
        confidence: row.confidence,
    })
}

impl SignalStore for WarehouseSignalStore {
    fn upsert<'a>(&'a self, record: &'a SignalRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let row = to_row(record)?;
            blocking(&self.warehouse, move |warehouse| {
                Ok(warehouse.upsert_signals(std::slice::from_ref(&row))?)
            })
            .await
        })
    }

    fn list<'a>(&'a self, strategy_id: Option<&'a str>) -> StoreFuture<'a, Vec<SignalRecord>> {
        let strategy_id = strategy_id.map(str::to_owned);
        Box::pin(async move {
            let rows = blocking(&self.warehouse, move |warehouse| {
                Ok(warehouse.list_signals(strategy_id.as_deref())?)
            })
            .await?;
            rows.into_iter().map(from_row).collect()
        })
    }

    fn clear_strategies<'a>(&'a self, strategy_ids: &'a [String]) -> StoreFuture<'a, usize> {
        let strategy_ids = strategy_ids.to_vec();
        Box::pin(async move {
            blocking(&self.warehouse, move |warehouse| {
                Ok(warehouse.clear_signals(&strategy_ids)?)
            })
            .await
        })
    }
}

/// [`CycleLog`] over the `cycle_log` table; summaries are kept as JSON bodies.
#[derive(Clone)]
pub struct WarehouseCycleLog {
    warehouse: Warehouse,
}

impl WarehouseCycleLog {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }
}

impl CycleLog for WarehouseCycleLog {
    fn record<'a>(&'a self, summary: &'a CycleSummary) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let row = CycleRow {
                cycle_id: summary.cycle_id.to_string(),
                kind: summary.kind.to_string(),
                status: serde_json::to_value(&summary.status)?
                    .as_str()
                    .unwrap_or_default()
                    .to_owned(),
                started_at: summary
                    .started_at
                    .format(&Rfc3339)
                    .map_err(|error| StoreError::Backend(error.to_string()))?,
                elapsed_ms: summary.elapsed_ms,
                body: serde_json::to_string(summary)?,
            };
            blocking(&self.warehouse, move |warehouse| Ok(warehouse.record_cycle(&row)?)).await
        })
    }

    fn recent(&self, limit: usize) -> StoreFuture<'_, Vec<CycleSummary>> {
        Box::pin(async move {
            let rows =
                blocking(&self.warehouse, move |warehouse| Ok(warehouse.recent_cycles(limit)?))
                    .await?;
            rows.iter()
                .map(|row| serde_json::from_str(&row.body).map_err(StoreError::from))
                .collect()
        })
    }
}
