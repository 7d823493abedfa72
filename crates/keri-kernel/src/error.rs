//! Error types for the Kernel.

use keri_kernel_core::{CoreError, Digest, Prefix, ValidationError};
use keri_kernel_store::StoreError;
use thiserror::Error;

/// Errors that can occur during Kernel operations.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Encoding or parse error.
    #[error("codec error: {0}")]
    Core(#[from] CoreError),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A locally issued event collides with a stored one.
    #[error("conflict at {prefix} sn {sn}: existing event {existing}")]
    Conflict {
        prefix: Prefix,
        sn: u64,
        existing: Digest,
    },

    /// The habitat has no pre-rotated signers left to rotate to.
    #[error("no pre-rotated signers left for {0}")]
    SignersExhausted(Prefix),

    /// Invalid operation.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for Kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;
