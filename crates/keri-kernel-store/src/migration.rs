//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system. Each migration is a SQL batch that
//! transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Idempotent: it can be called on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database is at version {current}, newer than {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Accepted events, one per position
        CREATE TABLE key_events (
            prefix TEXT NOT NULL,             -- qualified identifier prefix
            sn INTEGER NOT NULL,              -- sequence number
            ilk TEXT NOT NULL,                -- icp, rot or ixn
            digest TEXT NOT NULL,             -- qualified digest of the event bytes
            message BLOB NOT NULL,            -- event bytes plus attached signatures
            stored_at INTEGER NOT NULL,       -- local timestamp of insertion

            PRIMARY KEY (prefix, sn)
        );

        -- Duplicity evidence
        CREATE TABLE duplicities (
            prefix TEXT NOT NULL,
            sn INTEGER NOT NULL,
            accepted TEXT NOT NULL,           -- digest of the stored event
            conflicting TEXT NOT NULL,        -- digest of a conflicting event
            detected_at INTEGER NOT NULL,

            PRIMARY KEY (prefix, sn, conflicting)
        );

        CREATE INDEX idx_key_events_digest ON key_events(digest);
        "#,
    )?;

    Ok(())
}

pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
