//! # KERI Kernel Testkit
//!
//! Testing utilities for the KERI Kernel.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Vectors**: Fixed secrets and the logs they produce, for cross-implementation checks
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Deterministic controllers and kernels for test scenarios
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use keri_kernel_testkit::generators::ChainParams;
//!
//! proptest! {
//!     #[test]
//!     fn chains_verify(params: ChainParams) {
//!         let hab = params.build();
//!         // feed hab.kel() to a router ...
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use keri_kernel_testkit::fixtures::TestController;
//!
//! let mut bob = TestController::with_seed(1, 3);
//! bob.habitat.rotate().unwrap();
//! let fork = bob.fork_interaction(0);
//! assert_eq!(fork.sn(), 1);
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{memory_kernel, multi_party_fixtures, TestController};
