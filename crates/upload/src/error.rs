//! Upload error types.

use blobferry_transfer::TransferError;

use crate::client::Operation;

/// Errors produced while uploading content.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} failed: {message}")]
    Remote { operation: Operation, message: String },

    #[error("{0} timed out")]
    Timeout(Operation),

    #[error("checksum mismatch for part {part}: computed {expected}, store returned {actual}")]
    ChecksumMismatch {
        part: u32,
        expected: String,
        actual: String,
    },

    #[error("object checksum mismatch: expected {expected}, got {actual}")]
    ObjectChecksumMismatch { expected: String, actual: String },

    #[error("part {0} has no completion record")]
    MissingPart(u32),

    #[error("content of {length} bytes exceeds the maximum blob size of {limit} bytes")]
    ContentTooLarge { length: u64, limit: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("task join error: {0}")]
    TaskFailed(String),

    #[error("invalid settings: {0}")]
    Config(String),
}

impl UploadError {
    /// Error reported by the object store for `operation`.
    pub fn remote(operation: Operation, message: impl Into<String>) -> Self {
        Self::Remote {
            operation,
            message: message.into(),
        }
    }
}

/// What happened to the remote multipart upload after a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortStatus {
    /// No remote upload existed, or the failure happened before one did.
    NotAttempted,
    Aborted,
    /// The abort itself failed; parts may remain in the store.
    AbortFailed(String),
}

/// Terminal failure of one upload.
///
/// `cause` is always the error that made the upload fail, never an error
/// from the compensating abort.
#[derive(Debug, thiserror::Error)]
#[error("{cause}")]
pub struct UploadFailure {
    #[source]
    pub cause: UploadError,
    pub abort: AbortStatus,
}

impl UploadFailure {
    pub fn new(cause: UploadError, abort: AbortStatus) -> Self {
        Self { cause, abort }
    }
}

impl From<UploadError> for UploadFailure {
    fn from(cause: UploadError) -> Self {
        Self::new(cause, AbortStatus::NotAttempted)
    }
}
