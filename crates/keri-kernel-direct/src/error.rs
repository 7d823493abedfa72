//! Error types for direct-mode sessions.

use keri_kernel::KernelError;
use thiserror::Error;

/// Errors that can occur during direct-mode operations.
#[derive(Debug, Error)]
pub enum DirectError {
    /// The transport is closed.
    #[error("transport closed")]
    Closed,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Kernel operation failed.
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    /// Encoding a message for the wire failed.
    #[error("codec error: {0}")]
    Codec(#[from] keri_kernel_core::CoreError),
}

/// Result type for direct-mode operations.
pub type Result<T> = std::result::Result<T, DirectError>;
