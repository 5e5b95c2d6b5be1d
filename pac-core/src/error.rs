//! Error types for the conversion core.
//!
//! Two layers, mirroring the propagation policy: `Error` is fatal and
//! unwinds out of the core (preflight failures, broken pool); `ActionError`
//! is per-file, caught at the action boundary and recorded in the run
//! summary without halting the worker pool.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors. A run that hits one of these stops.
#[derive(Debug, Error)]
pub enum Error {
    /// Preflight could not select an encoder backend for the requested codec.
    #[error("no {codec} encoder backend available")]
    NoBackendAvailable { codec: String },

    /// Source root missing or not a directory.
    #[error("source root not usable: {0}")]
    BadSourceRoot(PathBuf),

    /// Destination root could not be created or entered.
    #[error("destination root not usable: {0}")]
    BadDestRoot(PathBuf),

    /// Worker pool broke down (a worker panicked or the channel closed early).
    #[error("worker pool failure: {0}")]
    Pool(String),

    /// I/O error outside the per-file action scope.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-file action failures.
///
/// Variant names are the reason kinds of the run report; `kind()` yields the
/// stable string used in per-file events.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// Child subprocess exited non-zero, was killed, or its pipe broke.
    #[error("encode failed ({detail})")]
    EncodeFailed { detail: String },

    /// Post-encode tag, art, or fingerprint write failed.
    #[error("tag write failed: {0}")]
    TagWriteFailed(String),

    /// The atomic rename could not complete (after one retry).
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// Post-encode verification found a discrepancy (strict mode only).
    #[error("verification mismatch: {0}")]
    VerifyMismatch(String),

    /// Cooperative cancellation observed before the commit step.
    #[error("cancelled")]
    Cancelled,
}

impl ActionError {
    /// Stable reason-kind string for event records.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::EncodeFailed { .. } => "encode_failed",
            ActionError::TagWriteFailed(_) => "tag_write_failed",
            ActionError::CommitFailed(_) => "commit_failed",
            ActionError::VerifyMismatch(_) => "verify_mismatch",
            ActionError::Cancelled => "cancelled",
        }
    }
}
