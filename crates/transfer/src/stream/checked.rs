use std::io::{self, Read};

use crc32fast::Hasher;

use super::OffsetRangeStream;

/// Checksumming wrapper whose CRC32 follows `mark`/`reset`.
///
/// `mark` snapshots the running checksum along with the position and
/// `reset` restores both, so bytes read and then discarded by a retried
/// read never reach the final value.
pub struct ResettableChecksumStream<S> {
    inner: S,
    checksum: Hasher,
    marked_checksum: Hasher,
    source_name: String,
}

impl<S: OffsetRangeStream> ResettableChecksumStream<S> {
    pub fn new(inner: S, source_name: impl Into<String>) -> Self {
        Self {
            inner,
            checksum: Hasher::new(),
            marked_checksum: Hasher::new(),
            source_name: source_name.into(),
        }
    }

    /// CRC32 of every byte returned since the window start.
    pub fn checksum(&self) -> u32 {
        self.checksum.clone().finalize()
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: OffsetRangeStream> Read for ResettableChecksumStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.checksum.update(&buf[..n]);
        Ok(n)
    }
}

impl<S: OffsetRangeStream> OffsetRangeStream for ResettableChecksumStream<S> {
    fn file_pointer(&self) -> u64 {
        self.inner.file_pointer()
    }

    fn mark(&mut self) {
        self.marked_checksum = self.checksum.clone();
        self.inner.mark();
    }

    fn reset(&mut self) -> io::Result<()> {
        self.inner.reset()?;
        self.checksum = self.marked_checksum.clone();
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }
}
