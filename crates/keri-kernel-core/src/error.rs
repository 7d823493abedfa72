//! Error types for the KERI Kernel Core.

use thiserror::Error;

/// Core errors raised while encoding or decoding key material and events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Unsupported or unknown derivation code, or bad qualified text.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Bytes that cannot be parsed into an event or message.
    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

impl CoreError {
    pub(crate) fn encoding(msg: impl Into<String>) -> Self {
        CoreError::Encoding(msg.into())
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        CoreError::MalformedEvent(msg.into())
    }
}

/// Reasons an individual key event is not applied to a key state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("signature threshold not met at sn {sn}: {verified} of {keys} keys verified")]
    ThresholdNotMet { sn: u64, verified: usize, keys: usize },

    #[error("sequence gap: expected sn {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("event at sn {sn} was already accepted")]
    SequenceReplay { sn: u64 },

    #[error("prior digest mismatch at sn {sn}: expected {expected}, got {got}")]
    PriorDigestMismatch {
        sn: u64,
        expected: String,
        got: String,
    },

    #[error("next key commitment mismatch at sn {sn}")]
    NextCommitmentMismatch { sn: u64 },

    #[error("duplicity at sn {sn}: identifier is compromised since sn {since}")]
    Duplicity { sn: u64, since: u64 },

    #[error("prefix mismatch: declared {declared}, derived {derived}")]
    PrefixMismatch { declared: String, derived: String },

    #[error("key {key} appears more than once")]
    DuplicateKey { key: String },

    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("invalid witness configuration: {0}")]
    InvalidWitnessConfig(String),

    #[error("identifier is not transferable")]
    NotTransferable,

    #[error("identifier is establishment-only; interaction events are not allowed")]
    EstablishmentOnly,

    #[error("escrow is full ({capacity} events)")]
    EscrowFull { capacity: usize },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl ValidationError {
    /// Whether the event may become valid once its predecessors arrive.
    pub fn is_escrowable(&self) -> bool {
        matches!(self, ValidationError::SequenceGap { .. })
    }

    /// Whether the event must be rejected permanently.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ValidationError::PriorDigestMismatch { .. }
                | ValidationError::NextCommitmentMismatch { .. }
                | ValidationError::PrefixMismatch { .. }
                | ValidationError::DuplicateKey { .. }
                | ValidationError::Duplicity { .. }
        )
    }
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Encoding(msg) => ValidationError::Encoding(msg),
            CoreError::MalformedEvent(msg) => ValidationError::StructuralError(msg),
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
