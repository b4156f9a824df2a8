//! Multipart transfer primitives.
//!
//! Splits a content source of known length into parts, hands out one
//! offset-bounded, checksummed stream per part, and keeps ownership of
//! every stream it creates so they can all be released when the upload
//! is over.

mod checksum;
mod container;
mod context;
mod partition;
mod range;
pub mod stream;
mod validation;

use std::sync::{Mutex, MutexGuard};

pub use checksum::{combine_crc32, crc32, decode_crc32, encode_crc32};
pub use container::{OffsetRangeStreamSupplier, TransferContainer};
pub use context::{PartStream, StreamContext, UploadFinalizer, WriteContext, WritePriority};
pub use partition::{
    LARGE_OBJECT_THRESHOLD, MAX_UPLOAD_PARTS, PartDescriptor, PartLayout,
    calculate_optimal_part_size, partition,
};
pub use range::ByteRange;
pub use stream::{
    OffsetRangeBytesStream, OffsetRangeFileStream, OffsetRangeStream, ResettableChecksumStream,
};
pub use validation::validate_blob_name;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    #[error("{parts} parts of {part_size} bytes exceed the limit of {max_parts} parts")]
    TooManyParts {
        parts: u64,
        part_size: u64,
        max_parts: u64,
    },

    #[error("multi-part streams are already created")]
    StreamContextReused,

    #[error("part {0} is out of range")]
    PartIndexOutOfRange(usize),

    #[error("stream for part {0} was already provided")]
    StreamAlreadyProvided(usize),

    #[error("transfer container is closed")]
    Closed,

    #[error("closure of {failed} of {total} multi-part streams failed")]
    CloseFailed { failed: usize, total: usize },

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("invalid blob name: {0}")]
    InvalidPath(String),
}

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
