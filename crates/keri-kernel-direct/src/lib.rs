//! # KERI Kernel Direct
//!
//! Direct-mode exchange of key event logs between two controllers.
//!
//! ## Overview
//!
//! Each side runs a [`Session`]: it sends its own signed log over a
//! [`Transport`], feeds whatever bytes arrive into its kernel, and performs
//! scripted rotations or interactions at given ticks. A [`Doist`] drives any
//! number of sessions on one logical clock.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use keri_kernel::{Habitat, Kernel, KernelConfig};
//! use keri_kernel::store::MemoryStore;
//! use keri_kernel_direct::{memory, Action, Doist, Doer, Session, SessionConfig};
//!
//! let config = KernelConfig::default();
//! let (a, b) = memory::duplex();
//! let mut bob = Session::new(
//!     Habitat::generate(3, &config).unwrap(),
//!     Kernel::open(MemoryStore::new(), config.clone()).unwrap(),
//!     a,
//!     SessionConfig::default().at(4, Action::Rotate),
//! )
//! .unwrap();
//! let mut eve = Session::new(
//!     Habitat::generate(3, &config).unwrap(),
//!     Kernel::open(MemoryStore::new(), config).unwrap(),
//!     b,
//!     SessionConfig::default(),
//! )
//! .unwrap();
//!
//! let mut doist = Doist::new(Duration::from_millis(50), Duration::from_secs(1));
//! doist.run(&mut [&mut bob as &mut dyn Doer, &mut eve]).unwrap();
//! ```

pub mod doist;
pub mod error;
pub mod session;
pub mod transport;

pub use doist::{Doer, Doist, DoistReport, Step};
pub use error::{DirectError, Result};
pub use session::{Action, Scripted, Session, SessionConfig, SessionPhase};
pub use transport::{memory, Transport};
