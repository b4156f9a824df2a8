use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use super::{OffsetRangeStream, closed_error};

/// Number of bytes that can still be handed out from a window, capped to
/// what fits in a read buffer.
fn readable(limit: u64, consumed: u64, buf_len: usize) -> usize {
    let remaining = limit - consumed;
    usize::try_from(remaining).map_or(buf_len, |r| r.min(buf_len))
}

// ---------------------------------------------------------------------------
// OffsetRangeFileStream
// ---------------------------------------------------------------------------

/// File-backed offset range: `size` bytes starting at `position`.
pub struct OffsetRangeFileStream {
    file: Option<File>,
    name: String,
    start: u64,
    /// Window length clamped to the bytes the file actually has.
    limit: u64,
    consumed: u64,
    marked: u64,
}

impl OffsetRangeFileStream {
    /// Opens `path` and positions the stream at `position`.
    pub fn open(path: &Path, size: u64, position: u64) -> io::Result<Self> {
        let file = File::open(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_file(file, name, size, position)
    }

    /// Wraps an already opened file.
    pub fn from_file(
        mut file: File,
        name: impl Into<String>,
        size: u64,
        position: u64,
    ) -> io::Result<Self> {
        let source_len = file.metadata()?.len();
        let limit = size.min(source_len.saturating_sub(position));
        file.seek(SeekFrom::Start(position))?;
        Ok(Self {
            file: Some(file),
            name: name.into(),
            start: position,
            limit,
            consumed: 0,
            marked: 0,
        })
    }

    /// File name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes left before end-of-data.
    pub fn remaining(&self) -> u64 {
        self.limit - self.consumed
    }
}

impl Read for OffsetRangeFileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = readable(self.limit, self.consumed, buf.len());
        let file = self.file.as_mut().ok_or_else(closed_error)?;
        if want == 0 {
            return Ok(0);
        }
        let n = file.read(&mut buf[..want])?;
        self.consumed += n as u64;
        Ok(n)
    }
}

impl OffsetRangeStream for OffsetRangeFileStream {
    fn file_pointer(&self) -> u64 {
        self.start + self.consumed
    }

    fn mark(&mut self) {
        self.marked = self.consumed;
    }

    fn reset(&mut self) -> io::Result<()> {
        let file = self.file.as_mut().ok_or_else(closed_error)?;
        file.seek(SeekFrom::Start(self.start + self.marked))?;
        self.consumed = self.marked;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.file.take();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OffsetRangeBytesStream
// ---------------------------------------------------------------------------

/// In-memory offset range over shared bytes.
pub struct OffsetRangeBytesStream {
    source: Option<Arc<[u8]>>,
    start: u64,
    limit: u64,
    consumed: u64,
    marked: u64,
}

impl OffsetRangeBytesStream {
    pub fn new(source: impl Into<Arc<[u8]>>, size: u64, position: u64) -> Self {
        let source = source.into();
        let limit = size.min((source.len() as u64).saturating_sub(position));
        Self {
            source: Some(source),
            start: position,
            limit,
            consumed: 0,
            marked: 0,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.consumed
    }
}

impl Read for OffsetRangeBytesStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = readable(self.limit, self.consumed, buf.len());
        let source = self.source.as_ref().ok_or_else(closed_error)?;
        if want == 0 {
            return Ok(0);
        }
        // `limit` never extends past the source, so the window is in bounds.
        let from = (self.start + self.consumed) as usize;
        buf[..want].copy_from_slice(&source[from..from + want]);
        self.consumed += want as u64;
        Ok(want)
    }
}

impl OffsetRangeStream for OffsetRangeBytesStream {
    fn file_pointer(&self) -> u64 {
        self.start + self.consumed
    }

    fn mark(&mut self) {
        self.marked = self.consumed;
    }

    fn reset(&mut self) -> io::Result<()> {
        if self.source.is_none() {
            return Err(closed_error());
        }
        self.consumed = self.marked;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.source.take();
        Ok(())
    }
}
