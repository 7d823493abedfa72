//! SQLite implementation of the LogStore trait.
//!
//! The primary persistent backend. Uses rusqlite with bundled SQLite behind
//! a mutex; every operation is a short synchronous statement.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use keri_kernel_core::{Digest, DuplicityRecord, Ilk, Prefix, Qualified};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{merge_conflicting, InsertResult, LogEntry, LogStore};

/// SQLite-based store implementation.
///
/// Thread-safe via an internal Mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        debug!(path = %path.display(), "sqlite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

type EntryRow = (String, i64, String, String, Vec<u8>);

const ENTRY_COLUMNS: &str = "prefix, sn, ilk, digest, message";

fn read_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn entry_from_row((prefix, sn, ilk, digest, message): EntryRow) -> Result<LogEntry> {
    Ok(LogEntry {
        prefix: Prefix::from_qb64(&prefix)?,
        sn: sn_from_sql(sn)?,
        ilk: ilk.parse::<Ilk>()?,
        digest: Digest::from_qb64(&digest)?,
        message: Bytes::from(message),
    })
}

fn sn_to_sql(sn: u64) -> Result<i64> {
    i64::try_from(sn).map_err(|_| StoreError::InvalidData(format!("sn {sn} out of range")))
}

fn sn_from_sql(sn: i64) -> Result<u64> {
    u64::try_from(sn).map_err(|_| StoreError::InvalidData(format!("negative sn {sn}")))
}

impl LogStore for SqliteStore {
    fn insert(&self, entry: &LogEntry) -> Result<InsertResult> {
        let conn = self.conn()?;
        let prefix = entry.prefix.qb64();
        let sn = sn_to_sql(entry.sn)?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT digest FROM key_events WHERE prefix = ?1 AND sn = ?2",
                params![prefix, sn],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(existing) = existing {
            let existing = Digest::from_qb64(&existing)?;
            if existing == entry.digest {
                return Ok(InsertResult::AlreadyExists);
            }
            warn!(prefix = %entry.prefix, sn = entry.sn, "conflicting entry not stored");
            return Ok(InsertResult::Conflict { existing });
        }

        conn.execute(
            "INSERT INTO key_events (prefix, sn, ilk, digest, message, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                prefix,
                sn,
                entry.ilk.as_str(),
                entry.digest.qb64(),
                entry.message.as_ref(),
                now_millis()
            ],
        )?;
        Ok(InsertResult::Inserted)
    }

    fn get(&self, prefix: &Prefix, sn: u64) -> Result<Option<LogEntry>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM key_events WHERE prefix = ?1 AND sn = ?2"),
                params![prefix.qb64(), sn_to_sql(sn)?],
                read_entry_row,
            )
            .optional()?;
        row.map(entry_from_row).transpose()
    }

    fn last_sn(&self, prefix: &Prefix) -> Result<Option<u64>> {
        let conn = self.conn()?;
        let sn: Option<i64> = conn.query_row(
            "SELECT MAX(sn) FROM key_events WHERE prefix = ?1",
            params![prefix.qb64()],
            |row| row.get(0),
        )?;
        sn.map(sn_from_sql).transpose()
    }

    fn range(&self, prefix: &Prefix, from: u64) -> Result<Vec<LogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM key_events WHERE prefix = ?1 AND sn >= ?2 ORDER BY sn"
        ))?;
        let rows = stmt
            .query_map(params![prefix.qb64(), sn_to_sql(from)?], read_entry_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(entry_from_row).collect()
    }

    fn prefixes(&self) -> Result<Vec<Prefix>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT prefix FROM key_events")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut prefixes = rows
            .iter()
            .map(|p| Prefix::from_qb64(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        prefixes.sort();
        Ok(prefixes)
    }

    fn record_duplicity(&self, record: &DuplicityRecord) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = now_millis();
        for conflicting in &record.conflicting {
            tx.execute(
                "INSERT OR IGNORE INTO duplicities (prefix, sn, accepted, conflicting, detected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.prefix.qb64(),
                    sn_to_sql(record.sn)?,
                    record.accepted.qb64(),
                    conflicting.qb64(),
                    now
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn duplicities(&self, prefix: &Prefix) -> Result<Vec<DuplicityRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT sn, accepted, conflicting FROM duplicities
             WHERE prefix = ?1 ORDER BY sn, detected_at, conflicting",
        )?;
        let rows = stmt
            .query_map(params![prefix.qb64()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut records: Vec<DuplicityRecord> = Vec::new();
        for (sn, accepted, conflicting) in rows {
            let sn = sn_from_sql(sn)?;
            let conflicting = Digest::from_qb64(&conflicting)?;
            match records.last_mut() {
                Some(record) if record.sn == sn => merge_conflicting(record, &[conflicting]),
                _ => records.push(DuplicityRecord {
                    prefix: prefix.clone(),
                    sn,
                    accepted: Digest::from_qb64(&accepted)?,
                    conflicting: vec![conflicting],
                }),
            }
        }
        Ok(records)
    }
}
