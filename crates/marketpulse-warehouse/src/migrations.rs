use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_blob_cache",
        sql: r#"
CREATE TABLE IF NOT EXISTS blob_cache (
    key TEXT PRIMARY KEY,
    body TEXT NOT NULL,
    expires_at BIGINT,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0002_signals",
        sql: r#"
CREATE TABLE IF NOT EXISTS signals (
    instrument_id TEXT NOT NULL,
    strategy_id TEXT NOT NULL,
    price DOUBLE NOT NULL,
    bar_date TEXT NOT NULL,
    confidence DOUBLE NOT NULL,
    computed_at TEXT NOT NULL,
    metrics TEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(instrument_id, strategy_id)
);
"#,
    },
    Migration {
        version: "0003_cycle_log",
        sql: r#"
CREATE SEQUENCE IF NOT EXISTS cycle_log_seq;

CREATE TABLE IF NOT EXISTS cycle_log (
    seq BIGINT PRIMARY KEY DEFAULT nextval('cycle_log_seq'),
    cycle_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    elapsed_ms BIGINT NOT NULL,
    body TEXT NOT NULL
);
"#,
    },
    Migration {
        version: "0004_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_signals_strategy ON signals(strategy_id);
CREATE INDEX IF NOT EXISTS idx_cycle_log_kind ON cycle_log(kind);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}

/// Versions known to this build, in application order.
pub fn known_versions() -> Vec<&'static str> {
    MIGRATIONS.iter().map(|migration| migration.version).collect()
}
