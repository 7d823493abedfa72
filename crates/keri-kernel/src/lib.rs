//! # KERI Kernel
//!
//! The unified API for verifying and keeping key event logs.
//!
//! ## Overview
//!
//! - **Habitat**: a local controller with a pre-rotated signer sequence that
//!   incepts, rotates and interacts, emitting signed messages
//! - **Kernel**: an event router backed by a [`LogStore`](store::LogStore);
//!   every accepted event is persisted and the router is rebuilt from the
//!   store on open
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keri_kernel::{Habitat, Kernel, KernelConfig};
//! use keri_kernel::store::SqliteStore;
//!
//! let config = KernelConfig::default();
//! let mut kernel = Kernel::open(SqliteStore::open("kel.db").unwrap(), config.clone()).unwrap();
//!
//! let mut hab = Habitat::generate(3, &config).unwrap();
//! kernel.ingest_message(hab.kel()[0].clone()).unwrap();
//!
//! let rot = hab.rotate().unwrap();
//! kernel.ingest(&rot.to_bytes().unwrap()).unwrap();
//! assert_eq!(kernel.key_state(hab.prefix()).unwrap().sn, 1);
//! ```
//!
//! ## Re-exports
//!
//! - `keri_kernel::core` - Core primitives, validation and routing
//! - `keri_kernel::store` - Storage abstraction and SQLite

pub mod config;
pub mod error;
pub mod habitat;
pub mod kernel;

pub use keri_kernel_core as core;
pub use keri_kernel_store as store;

pub use config::KernelConfig;
pub use error::{KernelError, Result};
pub use habitat::Habitat;
pub use kernel::Kernel;

pub use keri_kernel_core::{
    Digest, EventRouter, KeyState, MatterCode, Prefix, ProcessOutcome, ProcessReport, Seal,
    SerialKind, SignedMessage, Signer, Threshold,
};
