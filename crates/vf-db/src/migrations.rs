//! Embedded SQL migrations and runner.
//!
//! Migrations are `&str` constants applied in order. A `schema_migrations`
//! table tracks which versions have been applied.

use rusqlite::Connection;
use vf_core::{Error, Result};

/// V1: assets and jobs.
///
/// `derived_from` is a weak reference, so it carries no foreign key.
const V1_INITIAL: &str = r#"
CREATE TABLE assets (
    id            TEXT PRIMARY KEY,
    file_name     TEXT NOT NULL,
    locator       TEXT NOT NULL UNIQUE,
    size_bytes    INTEGER NOT NULL CHECK (size_bytes >= 0),
    duration_secs REAL NOT NULL DEFAULT 0 CHECK (duration_secs >= 0),
    derived_from  TEXT,
    created_at    TEXT NOT NULL
);
CREATE INDEX idx_assets_derived_from ON assets(derived_from);

CREATE TABLE jobs (
    id              TEXT PRIMARY KEY,
    kind            TEXT NOT NULL,
    asset_id        TEXT NOT NULL,
    request         TEXT NOT NULL,
    state           TEXT NOT NULL DEFAULT 'PENDING'
                    CHECK (state IN ('PENDING', 'STARTED', 'SUCCESS', 'FAILURE')),
    claimed_by      TEXT,
    result_asset_id TEXT,
    error_message   TEXT,
    diagnostics     BLOB,
    attempt         INTEGER NOT NULL DEFAULT 1,
    retry_of        TEXT REFERENCES jobs(id),
    created_at      TEXT NOT NULL,
    started_at      TEXT,
    finished_at     TEXT
);
CREATE INDEX idx_jobs_state_created ON jobs(state, created_at);
CREATE INDEX idx_jobs_asset ON jobs(asset_id);
"#;

/// Ordered list of (version, sql) pairs.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL)];

/// Apply every migration not yet recorded in `schema_migrations`.
///
/// Each migration runs inside its own transaction together with its
/// bookkeeping row.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;
        if applied {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;
        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;
        tx.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [version])
            .map_err(|e| Error::database(e.to_string()))?;
        tx.commit().map_err(|e| Error::database(e.to_string()))?;

        tracing::debug!(version, "applied migration");
    }

    Ok(())
}
