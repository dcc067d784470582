//! # Marketpulse Warehouse
//!
//! DuckDB-backed durable storage for marketpulse.
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `blob_cache` | JSON blobs under string keys with optional expiry (series cache) |
//! | `signals` | Latest signal record per `(instrument_id, strategy_id)` |
//! | `cycle_log` | Summaries of finished pipeline cycles |
//!
//! All values are bound as query parameters. The warehouse is synchronous;
//! async callers run it on the blocking pool.

pub mod duckdb;
pub mod migrations;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ::duckdb::{Connection, ToSql};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl WarehouseConfig {
    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            max_pool_size: 4,
        }
    }
}

/// One row of the `signals` table. `metrics` is a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRow {
    pub instrument_id: String,
    pub strategy_id: String,
    pub price: f64,
    pub bar_date: String,
    pub confidence: f64,
    pub computed_at: String,
    pub metrics: String,
}

/// One row of the `cycle_log` table. `body` is the full JSON summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRow {
    pub cycle_id: String,
    pub kind: String,
    pub status: String,
    pub started_at: String,
    pub elapsed_ms: u64,
    pub body: String,
}

#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open (creating if needed) the database and apply pending migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(config.db_path, config.max_pool_size)?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    pub fn applied_migrations(&self) -> Result<Vec<String>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement =
            connection.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
        let versions = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    /// Live blob body under `key`; expired entries read as absent.
    pub fn get_blob(&self, key: &str) -> Result<Option<String>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 2] = [&key, &now_millis()];
        let mut statement = connection.prepare(
            "SELECT body FROM blob_cache \
             WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )?;
        let mut rows = statement.query(params.as_slice())?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace the blob under `key`; `ttl = None` never expires.
    pub fn put_blob(
        &self,
        key: &str,
        body: &str,
        ttl: Option<Duration>,
    ) -> Result<(), WarehouseError> {
        let expires_at = ttl.map(|ttl| now_millis().saturating_add(duration_millis(ttl)));
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 3] = [&key, &body, &expires_at];
        connection.execute(
            "INSERT OR REPLACE INTO blob_cache (key, body, expires_at, updated_at) \
             VALUES (?, ?, ?, CURRENT_TIMESTAMP)",
            params.as_slice(),
        )?;
        Ok(())
    }

    pub fn delete_blob(&self, key: &str) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        connection.execute("DELETE FROM blob_cache WHERE key = ?", [key])?;
        Ok(())
    }

    /// Delete expired blobs; returns the number removed.
    pub fn purge_expired(&self) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let removed = connection.execute(
            "DELETE FROM blob_cache WHERE expires_at IS NOT NULL AND expires_at <= ?",
            [now_millis()],
        )?;
        Ok(removed)
    }

    /// Upsert signal rows in one transaction.
    pub fn upsert_signals(&self, rows: &[SignalRow]) -> Result<(), WarehouseError> {
        if rows.is_empty() {
            return Ok(());
        }

        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            for row in rows {
                let params: [&dyn ToSql; 7] = [
                    &row.instrument_id,
                    &row.strategy_id,
                    &row.price,
                    &row.bar_date,
                    &row.confidence,
                    &row.computed_at,
                    &row.metrics,
                ];
                connection.execute(
                    "INSERT OR REPLACE INTO signals \
                     (instrument_id, strategy_id, price, bar_date, confidence, computed_at, metrics, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
                    params.as_slice(),
                )?;
            }
            Ok(())
        })();

        finalize_transaction(&connection, result)
    }

    /// Signal rows sorted by strategy then instrument.
    pub fn list_signals(&self, strategy_id: Option<&str>) -> Result<Vec<SignalRow>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let columns = "SELECT instrument_id, strategy_id, price, bar_date, confidence, computed_at, metrics \
                       FROM signals";
        let rows = match strategy_id {
            Some(strategy_id) => connection
                .prepare(&format!(
                    "{columns} WHERE strategy_id = ? ORDER BY instrument_id"
                ))?
                .query_map([strategy_id], read_signal)?
                .collect::<Result<Vec<_>, _>>()?,
            None => connection
                .prepare(&format!("{columns} ORDER BY strategy_id, instrument_id"))?
                .query_map([], read_signal)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    /// Delete every signal of `strategy_ids` in one transaction.
    pub fn clear_signals(&self, strategy_ids: &[String]) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            let mut removed = 0;
            for strategy_id in strategy_ids {
                removed += connection.execute(
                    "DELETE FROM signals WHERE strategy_id = ?",
                    [strategy_id],
                )?;
            }
            Ok(removed)
        })();

        finalize_transaction(&connection, result)
    }

    pub fn record_cycle(&self, row: &CycleRow) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 6] = [
            &row.cycle_id,
            &row.kind,
            &row.status,
            &row.started_at,
            &row.elapsed_ms,
            &row.body,
        ];
        connection.execute(
            "INSERT INTO cycle_log (cycle_id, kind, status, started_at, elapsed_ms, body) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Most recently recorded cycles first.
    pub fn recent_cycles(&self, limit: usize) -> Result<Vec<CycleRow>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut statement = connection.prepare(
            "SELECT cycle_id, kind, status, started_at, elapsed_ms, body \
             FROM cycle_log ORDER BY seq DESC LIMIT ?",
        )?;
        let rows = statement
            .query_map([limit], |row| {
                let elapsed_ms: i64 = row.get(4)?;
                Ok(CycleRow {
                    cycle_id: row.get(0)?,
                    kind: row.get(1)?,
                    status: row.get(2)?,
                    started_at: row.get(3)?,
                    elapsed_ms: u64::try_from(elapsed_ms).unwrap_or_default(),
                    body: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn read_signal(row: &::duckdb::Row<'_>) -> Result<SignalRow, ::duckdb::Error> {
    Ok(SignalRow {
        instrument_id: row.get(0)?,
        strategy_id: row.get(1)?,
        price: row.get(2)?,
        bar_date: row.get(3)?,
        confidence: row.get(4)?,
        computed_at: row.get(5)?,
        metrics: row.get(6)?,
    })
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_millis)
        .unwrap_or_default()
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
