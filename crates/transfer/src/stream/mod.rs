//! Offset-bounded, mark/reset-capable byte streams.
//!
//! An [`OffsetRangeStream`] exposes a fixed window of an underlying source.
//! [`ResettableChecksumStream`] wraps one and keeps a CRC32 of the bytes it
//! returned, rolled back together with the read position on `reset`.

mod checked;
mod offset_range;

use std::io::{self, Read};

pub use checked::ResettableChecksumStream;
pub use offset_range::{OffsetRangeBytesStream, OffsetRangeFileStream};

/// A bounded view over a byte source with save/restore of the read position.
///
/// Reads stop at the end of the window or the end of the underlying
/// source, whichever comes first. A freshly created stream is marked at
/// the start of its window, so `reset` without an explicit `mark` rewinds
/// to the beginning. Not meant to be read from more than one place at once.
pub trait OffsetRangeStream: Read + Send {
    /// Current absolute offset in the underlying source.
    fn file_pointer(&self) -> u64;

    /// Saves the current read position.
    fn mark(&mut self);

    /// Restores the read position saved by the last `mark`.
    fn reset(&mut self) -> io::Result<()>;

    /// Releases the underlying source. Closing twice is a no-op.
    fn close(&mut self) -> io::Result<()>;
}

impl<S: OffsetRangeStream + ?Sized> OffsetRangeStream for Box<S> {
    fn file_pointer(&self) -> u64 {
        (**self).file_pointer()
    }

    fn mark(&mut self) {
        (**self).mark()
    }

    fn reset(&mut self) -> io::Result<()> {
        (**self).reset()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

pub(crate) fn closed_error() -> io::Error {
    io::Error::other("stream is closed")
}
