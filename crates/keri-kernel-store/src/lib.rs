//! # KERI Kernel Store
//!
//! Persistence for accepted key event logs. Provides the [`LogStore`] trait
//! with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`LogStore`] - The trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`LogEntry`] - One accepted signed message at `(prefix, sn)`
//! - [`InsertResult`] - Result of inserting an entry
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keri_kernel_store::{LogStore, SqliteStore};
//!
//! let store = SqliteStore::open("kel.db").unwrap();
//! for prefix in store.prefixes().unwrap() {
//!     let last = store.last_sn(&prefix).unwrap();
//!     println!("{prefix} at sn {last:?}");
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: Inserting the same entry twice returns `AlreadyExists`
//! - **No overwrites**: A different entry at an occupied `(prefix, sn)` returns `Conflict`
//! - **Duplicity evidence**: Conflicts are recorded, never resolved, by the store

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{InsertResult, LogEntry, LogStore, LogStoreExt};

#[cfg(test)]
mod test_support;
