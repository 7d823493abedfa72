//! In-memory implementation of the LogStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use keri_kernel_core::{DuplicityRecord, Prefix};
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::traits::{merge_conflicting, InsertResult, LogEntry, LogStore};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Logs indexed by prefix, then sn.
    logs: HashMap<Prefix, BTreeMap<u64, LogEntry>>,

    /// Duplicity evidence indexed by prefix, then sn.
    duplicities: HashMap<Prefix, BTreeMap<u64, DuplicityRecord>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

impl LogStore for MemoryStore {
    fn insert(&self, entry: &LogEntry) -> Result<InsertResult> {
        let mut inner = self.write()?;
        let log = inner.logs.entry(entry.prefix.clone()).or_default();

        match log.get(&entry.sn) {
            Some(existing) if existing.digest == entry.digest => Ok(InsertResult::AlreadyExists),
            Some(existing) => {
                warn!(prefix = %entry.prefix, sn = entry.sn, "conflicting entry not stored");
                Ok(InsertResult::Conflict {
                    existing: existing.digest,
                })
            }
            None => {
                log.insert(entry.sn, entry.clone());
                Ok(InsertResult::Inserted)
            }
        }
    }

    fn get(&self, prefix: &Prefix, sn: u64) -> Result<Option<LogEntry>> {
        let inner = self.read()?;
        Ok(inner.logs.get(prefix).and_then(|log| log.get(&sn)).cloned())
    }

    fn last_sn(&self, prefix: &Prefix) -> Result<Option<u64>> {
        let inner = self.read()?;
        Ok(inner
            .logs
            .get(prefix)
            .and_then(|log| log.keys().next_back().copied()))
    }

    fn range(&self, prefix: &Prefix, from: u64) -> Result<Vec<LogEntry>> {
        let inner = self.read()?;
        Ok(inner
            .logs
            .get(prefix)
            .map(|log| log.range(from..).map(|(_, e)| e.clone()).collect())
            .unwrap_or_default())
    }

    fn prefixes(&self) -> Result<Vec<Prefix>> {
        let inner = self.read()?;
        let mut prefixes: Vec<_> = inner
            .logs
            .iter()
            .filter(|(_, log)| !log.is_empty())
            .map(|(p, _)| p.clone())
            .collect();
        prefixes.sort();
        Ok(prefixes)
    }

    fn record_duplicity(&self, record: &DuplicityRecord) -> Result<()> {
        let mut inner = self.write()?;
        let records = inner.duplicities.entry(record.prefix.clone()).or_default();
        match records.get_mut(&record.sn) {
            Some(existing) => merge_conflicting(existing, &record.conflicting),
            None => {
                records.insert(record.sn, record.clone());
            }
        }
        Ok(())
    }

    fn duplicities(&self, prefix: &Prefix) -> Result<Vec<DuplicityRecord>> {
        let inner = self.read()?;
        Ok(inner
            .duplicities
            .get(prefix)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }
}
