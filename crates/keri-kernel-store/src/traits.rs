//! Store trait: the abstract interface for key event log persistence.
//!
//! The kernel only ever appends accepted events, so the store is a map from
//! `(prefix, sn)` to the signed message that was accepted there.

use bytes::Bytes;
use keri_kernel_core::{
    parse_message, Digest, DuplicityRecord, Ilk, MatterCode, Parsed, Prefix, SignedMessage,
};

use crate::error::{Result, StoreError};

/// One accepted event with its signatures, as wire bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub prefix: Prefix,
    pub sn: u64,
    pub ilk: Ilk,
    /// Digest of the event bytes, without signatures.
    pub digest: Digest,
    /// The full signed message.
    pub message: Bytes,
}

impl LogEntry {
    pub fn from_message(message: &SignedMessage, code: MatterCode) -> Result<Self> {
        Ok(Self {
            prefix: message.prefix().clone(),
            sn: message.sn(),
            ilk: message.inner().ilk(),
            digest: message.event.digest(code)?,
            message: message.to_bytes()?,
        })
    }

    /// Parse the stored bytes back into a message.
    pub fn decode(&self) -> Result<SignedMessage> {
        match parse_message(&self.message)? {
            Parsed::Complete { value, consumed } if consumed == self.message.len() => {
                if value.prefix() != &self.prefix || value.sn() != self.sn {
                    return Err(StoreError::InvalidData(format!(
                        "entry at {}:{} holds {}:{}",
                        self.prefix,
                        self.sn,
                        value.prefix(),
                        value.sn()
                    )));
                }
                Ok(value)
            }
            Parsed::Complete { consumed, .. } => Err(StoreError::InvalidData(format!(
                "{} trailing bytes after message",
                self.message.len() - consumed
            ))),
            Parsed::Incomplete { needed } => Err(StoreError::InvalidData(format!(
                "truncated message, {needed} bytes missing"
            ))),
        }
    }
}

/// Result of inserting an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    /// Entry was inserted successfully.
    Inserted,
    /// The identical entry already exists (idempotent, not an error).
    AlreadyExists,
    /// A different entry is stored at the same position. It is kept.
    Conflict {
        /// Digest of the stored entry.
        existing: Digest,
    },
}

/// The store trait: synchronous interface for log persistence.
///
/// # Design Notes
///
/// - **Idempotent inserts**: Inserting the same entry twice returns `AlreadyExists`.
/// - **Conflict detection**: Inserting a different entry at an existing position
///   returns `Conflict` with the stored digest. Nothing is overwritten.
pub trait LogStore: Send + Sync {
    /// Insert an accepted entry.
    fn insert(&self, entry: &LogEntry) -> Result<InsertResult>;

    /// Get the entry at a position.
    fn get(&self, prefix: &Prefix, sn: u64) -> Result<Option<LogEntry>>;

    /// Highest stored sequence number for a prefix.
    fn last_sn(&self, prefix: &Prefix) -> Result<Option<u64>>;

    /// Entries with `sn >= from`, ordered by sn.
    fn range(&self, prefix: &Prefix, from: u64) -> Result<Vec<LogEntry>>;

    /// Every prefix with at least one stored entry.
    fn prefixes(&self) -> Result<Vec<Prefix>>;

    /// Record duplicity evidence. Merges with any record at the same position.
    fn record_duplicity(&self, record: &DuplicityRecord) -> Result<()>;

    /// Duplicity evidence for a prefix, ordered by sn.
    fn duplicities(&self, prefix: &Prefix) -> Result<Vec<DuplicityRecord>>;
}

/// Extension trait for working in messages rather than entries.
pub trait LogStoreExt: LogStore {
    /// Insert an accepted message, digesting it with `code`.
    fn insert_message(&self, message: &SignedMessage, code: MatterCode) -> Result<InsertResult> {
        self.insert(&LogEntry::from_message(message, code)?)
    }

    /// The full stored log for a prefix, decoded.
    fn load_log(&self, prefix: &Prefix) -> Result<Vec<SignedMessage>> {
        self.range(prefix, 0)?.iter().map(LogEntry::decode).collect()
    }
}

impl<S: LogStore + ?Sized> LogStoreExt for S {}

/// Fold `conflicting` digests into `record` without repeats.
pub(crate) fn merge_conflicting(record: &mut DuplicityRecord, conflicting: &[Digest]) {
    for digest in conflicting {
        if !record.conflicting.contains(digest) {
            record.conflicting.push(*digest);
        }
    }
}
