//! Error taxonomy shared by every module in this crate.
//!
//! Mirrors the layering the original sync engine used: a failure is either
//! validation/logic, transient and worth retrying, permanent, or a service
//! lifecycle condition. Callers branch on [`SyncError::is_retryable`] rather
//! than matching every variant by hand.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // -- validation / logic --
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("path not allowed: {0}")]
    PathNotAllowed(String),

    #[error("corrupt index at {path}: {source}")]
    CorruptIndex {
        path: std::path::PathBuf,
        #[source]
        source: Box<SyncError>,
    },

    #[error("node not found")]
    NodeNotFound,

    #[error("node already has an assigned task")]
    NodeAlreadyAcquired,

    // -- transient / retryable --
    #[error("network timeout")]
    NetworkTimeout,

    #[error("connection reset")]
    ConnectionReset,

    #[error("download interrupted")]
    InterruptedDownload,

    #[error("filesystem busy")]
    FilesystemBusy,

    #[error("transient failure, retry later: {0}")]
    Transient(String),

    // -- permanent --
    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("decryption failed")]
    DecryptFailed,

    #[error("passphrase required")]
    PassphraseRequired,

    #[error("passphrase entry aborted")]
    PassphraseAborted,

    #[error("permanent failure: {0}")]
    Permanent(String),

    // -- service lifecycle --
    #[error("service is stopping, no new work accepted")]
    ServiceStopping,

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("operation cancelled")]
    Cancelled,

    #[error("encryption error: {0}")]
    Encryption(String),
}

impl SyncError {
    /// Whether a caller should schedule a retry rather than give up (§7).
    /// Conservative: anything not explicitly known to be permanent or a
    /// logic error is treated as retryable, since transient network/disk
    /// hiccups vastly outnumber real permanent failures in practice.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::InvalidState(_)
            | SyncError::PathNotAllowed(_)
            | SyncError::CorruptIndex { .. }
            | SyncError::NodeAlreadyAcquired
            | SyncError::QuotaExceeded
            | SyncError::PermissionDenied(_)
            | SyncError::DecryptFailed
            | SyncError::PassphraseRequired
            | SyncError::PassphraseAborted
            | SyncError::Permanent(_)
            | SyncError::ServiceStopping
            | SyncError::ServiceUnavailable
            | SyncError::Cancelled => false,
            SyncError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::NotFound
            ),
            SyncError::NetworkTimeout
            | SyncError::ConnectionReset
            | SyncError::InterruptedDownload
            | SyncError::FilesystemBusy
            | SyncError::Transient(_)
            | SyncError::NodeNotFound
            | SyncError::Serde(_)
            | SyncError::Encryption(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
