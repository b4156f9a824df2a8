//! Local filesystem blob container.
//!
//! Writes a blob from a [`WriteContext`] by reading every part on its own
//! OS thread, waiting a bounded time for all of them, and only then
//! writing the assembled content to `<container dir>/<blob name>`.

mod container;

pub use container::{DEFAULT_PARTS, DEFAULT_TRANSFER_TIMEOUT, FsBlobContainer};

use std::time::Duration;

use blobferry_transfer::TransferError;

/// Errors produced by the filesystem blob container.
#[derive(Debug, thiserror::Error)]
pub enum FsStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("timed out after {timeout:?} waiting for the parts of {name}")]
    Timeout { name: String, timeout: Duration },

    #[error("blob {0} already exists")]
    AlreadyExists(String),

    #[error("incorrect content length read for {name}: expected {expected} bytes, read {actual}")]
    LengthMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("part {part} of {name} failed: {message}")]
    PartFailed {
        name: String,
        part: u32,
        message: String,
    },
}
