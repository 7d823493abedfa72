//! # KERI Kernel Core
//!
//! Pure primitives for verifying key event logs: qualified crypto material,
//! key events and their canonical encoding, key state, per-identifier
//! validation and multi-identifier routing.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Prefix`] - Self-certifying identifier prefix
//! - [`Event`] - Inception, rotation or interaction
//! - [`SignedMessage`] - Event bytes plus indexed signatures
//! - [`KeyState`] - Authoritative key state after an accepted event
//! - [`EventValidator`] - Applies events for one identifier
//! - [`EventRouter`] - Dispatches messages, escrows out-of-order arrivals
//!
//! ## Canonicalization
//!
//! Events serialize deterministically in JSON or CBOR with a leading version
//! string. See the [`canonical`] module.

pub mod builder;
pub mod canonical;
pub mod crypto;
pub mod derivation;
pub mod error;
pub mod escrow;
pub mod event;
pub mod message;
pub mod prefix;
pub mod router;
pub mod state;
pub mod threshold;
pub mod validation;

pub use builder::{build_inception, build_interaction, build_rotation, EventBuilder};
pub use canonical::{parse_event, serialize_event, Parsed, SerialKind, SerializedEvent};
pub use crypto::{
    next_commitment, Digest, IndexedSignature, PublicKey, Qualified, Signature, Signer,
};
pub use derivation::MatterCode;
pub use error::{CoreError, ValidationError};
pub use escrow::{EscrowReason, EscrowedEvent};
pub use event::{ConfigTrait, Event, Ilk, Inception, Interaction, Rotation, Seal, WitnessConfig};
pub use message::{parse_message, SignedMessage};
pub use prefix::{derive_prefix, Prefix};
pub use router::{DuplicityRecord, EventRouter, ProcessOutcome, ProcessReport, RouterConfig};
pub use state::KeyState;
pub use threshold::{Threshold, Weight};
pub use validation::{EventValidator, ValidatorPhase};
