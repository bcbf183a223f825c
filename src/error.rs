use thiserror::Error;

use crate::status::Status;

/// Everything that can go wrong during a transfer, grouped the way the
/// state machine needs to react to it: transport failures may be softened
/// into a local fallback, cancellation becomes `Aborted`, integrity and
/// contract violations are always hard failures.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("invalid redirect target: {0}")]
    Redirect(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("transfer cancelled")]
    Cancelled,

    /// A lifecycle call arrived out of order (e.g. a write while the sink
    /// was not in progress). Indicates a driver bug, never retried.
    #[error("operation not allowed while {0}")]
    IllegalState(Status),
}

impl DownloadError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}
