//! Descriptions of an upload handed from the content side to the uploader.

use std::fmt;
use std::io::{self, Read};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::container::ContainerInner;
use crate::partition::{PartDescriptor, PartLayout};
use crate::stream::{OffsetRangeStream, ResettableChecksumStream};
use crate::{TransferError, lock};

pub(crate) type CheckedStream = ResettableChecksumStream<Box<dyn OffsetRangeStream>>;
pub(crate) type SharedStream = Arc<Mutex<CheckedStream>>;

/// Builds the stream context for a chosen part size.
pub type StreamContextSupplier =
    Box<dyn Fn(u64) -> Result<StreamContext, TransferError> + Send + Sync>;

/// Invoked once with `true` when the upload succeeded, `false` otherwise.
pub type UploadFinalizer = Box<dyn FnOnce(bool) + Send>;

/// Scheduling hint for part uploads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePriority {
    #[default]
    Normal,
    High,
}

// ---------------------------------------------------------------------------
// WriteContext
// ---------------------------------------------------------------------------

/// Everything an uploader needs to move one piece of content.
pub struct WriteContext {
    file_name: String,
    content_length: u64,
    fail_if_exists: bool,
    priority: WritePriority,
    integrity_check: bool,
    expected_checksum: Option<u32>,
    stream_context_supplier: StreamContextSupplier,
    finalizer: Mutex<Option<UploadFinalizer>>,
}

impl WriteContext {
    pub fn new(
        file_name: impl Into<String>,
        content_length: u64,
        priority: WritePriority,
        stream_context_supplier: StreamContextSupplier,
        finalizer: UploadFinalizer,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_length,
            fail_if_exists: false,
            priority,
            integrity_check: false,
            expected_checksum: None,
            stream_context_supplier,
            finalizer: Mutex::new(Some(finalizer)),
        }
    }

    pub fn with_fail_if_exists(mut self, fail_if_exists: bool) -> Self {
        self.fail_if_exists = fail_if_exists;
        self
    }

    pub fn with_integrity_check(mut self, integrity_check: bool) -> Self {
        self.integrity_check = integrity_check;
        self
    }

    pub fn with_expected_checksum(mut self, expected_checksum: Option<u32>) -> Self {
        self.expected_checksum = expected_checksum;
        self
    }

    /// Destination name of the upload.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn fail_if_exists(&self) -> bool {
        self.fail_if_exists
    }

    pub fn priority(&self) -> WritePriority {
        self.priority
    }

    pub fn integrity_check(&self) -> bool {
        self.integrity_check
    }

    /// CRC32 of the whole content, when the caller knows it up front.
    pub fn expected_checksum(&self) -> Option<u32> {
        self.expected_checksum
    }

    /// Partitions the content by `part_size`. Only the first call succeeds.
    pub fn stream_context(&self, part_size: u64) -> Result<StreamContext, TransferError> {
        (self.stream_context_supplier)(part_size)
    }

    /// Runs the finalizer. Returns `false` if it already ran.
    pub fn finalize(&self, upload_successful: bool) -> bool {
        match lock(&self.finalizer).take() {
            Some(finalizer) => {
                finalizer(upload_successful);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for WriteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteContext")
            .field("file_name", &self.file_name)
            .field("content_length", &self.content_length)
            .field("fail_if_exists", &self.fail_if_exists)
            .field("priority", &self.priority)
            .field("integrity_check", &self.integrity_check)
            .field("expected_checksum", &self.expected_checksum)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// StreamContext
// ---------------------------------------------------------------------------

/// Part layout plus a lazy per-part stream factory.
#[derive(Clone)]
pub struct StreamContext {
    layout: PartLayout,
    container: Arc<ContainerInner>,
}

impl StreamContext {
    pub(crate) fn new(layout: PartLayout, container: Arc<ContainerInner>) -> Self {
        Self { layout, container }
    }

    pub fn number_of_parts(&self) -> usize {
        self.layout.part_count
    }

    pub fn layout(&self) -> PartLayout {
        self.layout
    }

    /// Opens the stream for part `part_index` (0-based). Each part can be
    /// provided once; the container keeps ownership of the stream.
    pub fn provide_stream(&self, part_index: usize) -> Result<PartStream, TransferError> {
        let part = self
            .layout
            .part(part_index)
            .ok_or(TransferError::PartIndexOutOfRange(part_index))?;
        let stream = self.container.open_part_stream(&part)?;
        Ok(PartStream { stream, part })
    }
}

impl fmt::Debug for StreamContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamContext")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// PartStream
// ---------------------------------------------------------------------------

/// Handle to one part's checksummed stream: `{stream, content length, offset}`.
///
/// Clones share the same underlying stream, which stays owned by the
/// transfer container and is released when the container closes.
#[derive(Clone)]
pub struct PartStream {
    stream: SharedStream,
    part: PartDescriptor,
}

impl PartStream {
    pub fn part(&self) -> PartDescriptor {
        self.part
    }

    pub fn part_number(&self) -> u32 {
        self.part.part_number()
    }

    pub fn content_length(&self) -> u64 {
        self.part.size
    }

    pub fn offset(&self) -> u64 {
        self.part.offset
    }

    pub fn file_pointer(&self) -> u64 {
        lock(&self.stream).file_pointer()
    }

    pub fn mark(&self) {
        lock(&self.stream).mark();
    }

    pub fn reset(&self) -> io::Result<()> {
        lock(&self.stream).reset()
    }

    /// CRC32 of the bytes delivered so far.
    pub fn checksum(&self) -> u32 {
        lock(&self.stream).checksum()
    }

    /// Rewinds to the last mark and reads to the end of the part.
    ///
    /// Calling it again after a failed transport attempt yields the same
    /// bytes and leaves the same checksum. A part cut short by the end of
    /// the source is an error, never a silently truncated payload.
    pub fn read_from_mark(&self) -> io::Result<Vec<u8>> {
        let mut stream = lock(&self.stream);
        stream.reset()?;
        let expected = self.part.end().saturating_sub(stream.file_pointer());
        let mut buf = Vec::with_capacity(usize::try_from(expected).unwrap_or(0));
        stream.read_to_end(&mut buf)?;
        if buf.len() as u64 != expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "part {} of {}: expected {expected} bytes, read {}",
                    self.part.part_number(),
                    stream.source_name(),
                    buf.len()
                ),
            ));
        }
        Ok(buf)
    }
}

impl Read for PartStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        lock(&self.stream).read(buf)
    }
}

impl fmt::Debug for PartStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartStream")
            .field("part", &self.part)
            .finish_non_exhaustive()
    }
}
