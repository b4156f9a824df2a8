//! Transfer container: binds a content source to one upload and owns the
//! part streams opened for it.

use std::io;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

use crate::context::{SharedStream, StreamContext, WriteContext, WritePriority};
use crate::partition::{MAX_UPLOAD_PARTS, PartDescriptor, partition};
use crate::stream::{OffsetRangeStream, ResettableChecksumStream};
use crate::{TransferError, lock};

/// Opens an offset range of `size` bytes at `position` in the content source.
pub type OffsetRangeStreamSupplier =
    Arc<dyn Fn(u64, u64) -> io::Result<Box<dyn OffsetRangeStream>> + Send + Sync>;

enum Streams {
    Unopened,
    Open(Vec<Option<SharedStream>>),
    Closed,
}

pub(crate) struct ContainerInner {
    local_name: String,
    supplier: OffsetRangeStreamSupplier,
    streams: Mutex<Streams>,
    outcome: Mutex<Option<bool>>,
}

/// Manages the transfer of one local file (segment, translog, ...) to a
/// remote blob.
///
/// Streams are created lazily per part and stay owned by the container
/// until [`close`](Self::close), which is also attempted on drop.
pub struct TransferContainer {
    inner: Arc<ContainerInner>,
    remote_name: String,
    content_length: u64,
    fail_if_exists: bool,
    priority: WritePriority,
    integrity_check: bool,
    expected_checksum: Option<u32>,
}

impl TransferContainer {
    pub fn new(
        local_name: impl Into<String>,
        remote_name: impl Into<String>,
        content_length: u64,
        priority: WritePriority,
        supplier: OffsetRangeStreamSupplier,
    ) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                local_name: local_name.into(),
                supplier,
                streams: Mutex::new(Streams::Unopened),
                outcome: Mutex::new(None),
            }),
            remote_name: remote_name.into(),
            content_length,
            fail_if_exists: false,
            priority,
            integrity_check: false,
            expected_checksum: None,
        }
    }

    /// Fails the upload instead of overwriting an existing blob.
    pub fn with_fail_if_exists(mut self, fail_if_exists: bool) -> Self {
        self.fail_if_exists = fail_if_exists;
        self
    }

    pub fn with_integrity_check(mut self, integrity_check: bool) -> Self {
        self.integrity_check = integrity_check;
        self
    }

    /// CRC32 of the whole content, if the caller already knows it.
    pub fn with_expected_checksum(mut self, checksum: Option<u32>) -> Self {
        self.expected_checksum = checksum;
        self
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    /// Value passed to the write context's finalizer, once it has run.
    pub fn upload_outcome(&self) -> Option<bool> {
        *lock(&self.inner.outcome)
    }

    /// Describes this upload for an uploader.
    pub fn create_write_context(&self) -> WriteContext {
        let content_length = self.content_length;
        let supplier_inner = Arc::clone(&self.inner);
        let finalizer_inner = Arc::clone(&self.inner);

        WriteContext::new(
            self.remote_name.clone(),
            content_length,
            self.priority,
            Box::new(move |part_size| {
                ContainerInner::supply_stream_context(&supplier_inner, content_length, part_size)
            }),
            Box::new(move |upload_successful| {
                debug!(
                    file = %finalizer_inner.local_name,
                    upload_successful,
                    "upload finalized"
                );
                *lock(&finalizer_inner.outcome) = Some(upload_successful);
            }),
        )
        .with_fail_if_exists(self.fail_if_exists)
        .with_integrity_check(self.integrity_check)
        .with_expected_checksum(self.expected_checksum)
    }

    /// Partitions the content by `part_size` and returns the stream context.
    ///
    /// May be called once per container; a second call fails with
    /// [`TransferError::StreamContextReused`].
    pub fn supply_stream_context(&self, part_size: u64) -> Result<StreamContext, TransferError> {
        ContainerInner::supply_stream_context(&self.inner, self.content_length, part_size)
    }

    /// Closes every stream opened so far.
    ///
    /// All streams are attempted even if some fail; failures are reported
    /// once, as [`TransferError::CloseFailed`]. Closing again is a no-op.
    pub fn close(&self) -> Result<(), TransferError> {
        self.inner.close_streams(true)
    }
}

impl Drop for TransferContainer {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close_streams(false) {
            warn!(file = %self.inner.local_name, error = %e, "failed to release streams on drop");
        }
    }
}

impl ContainerInner {
    fn supply_stream_context(
        this: &Arc<Self>,
        content_length: u64,
        part_size: u64,
    ) -> Result<StreamContext, TransferError> {
        let mut streams = lock(&this.streams);
        if !matches!(*streams, Streams::Unopened) {
            return Err(TransferError::StreamContextReused);
        }

        let layout = partition(content_length, part_size, MAX_UPLOAD_PARTS)?;
        *streams = Streams::Open(vec![None; layout.part_count]);

        debug!(
            file = %this.local_name,
            part_size = layout.part_size,
            last_part_size = layout.last_part_size,
            parts = layout.part_count,
            "multi-part streams initialised"
        );
        Ok(StreamContext::new(layout, Arc::clone(this)))
    }

    pub(crate) fn open_part_stream(
        &self,
        part: &PartDescriptor,
    ) -> Result<SharedStream, TransferError> {
        match &*lock(&self.streams) {
            Streams::Open(slots) if slots.get(part.index).is_some_and(Option::is_some) => {
                return Err(TransferError::StreamAlreadyProvided(part.index));
            }
            Streams::Open(_) => {}
            Streams::Unopened | Streams::Closed => return Err(TransferError::Closed),
        }

        // Opening may hit the disk; the slot lock is not held meanwhile.
        let raw = (self.supplier)(part.size, part.offset).map_err(|e| {
            error!(file = %self.local_name, part = part.index, error = %e, "failed to create input stream");
            TransferError::Io(e)
        })?;
        let shared: SharedStream = Arc::new(Mutex::new(ResettableChecksumStream::new(
            raw,
            self.local_name.clone(),
        )));

        let mut streams = lock(&self.streams);
        let rejected = match &mut *streams {
            Streams::Open(slots) => match slots.get_mut(part.index) {
                Some(slot) if slot.is_none() => {
                    *slot = Some(Arc::clone(&shared));
                    return Ok(shared);
                }
                Some(_) => TransferError::StreamAlreadyProvided(part.index),
                None => TransferError::PartIndexOutOfRange(part.index),
            },
            Streams::Unopened | Streams::Closed => TransferError::Closed,
        };
        drop(streams);

        // Lost a race with close() or a second caller for the same part.
        if let Err(e) = lock(&shared).close() {
            warn!(file = %self.local_name, part = part.index, error = %e, "failed to close rejected stream");
        }
        Err(rejected)
    }

    fn close_streams(&self, warn_unopened: bool) -> Result<(), TransferError> {
        let slots = {
            let mut streams = lock(&self.streams);
            match std::mem::replace(&mut *streams, Streams::Closed) {
                Streams::Open(slots) => slots,
                Streams::Unopened => {
                    *streams = Streams::Unopened;
                    if warn_unopened {
                        warn!(
                            file = %self.local_name,
                            "input streams cannot be closed since they are not yet set for multi stream upload"
                        );
                    }
                    return Ok(());
                }
                Streams::Closed => return Ok(()),
            }
        };

        let total = slots.iter().flatten().count();
        let mut failed = 0;
        for (index, stream) in slots.iter().enumerate() {
            let Some(stream) = stream else { continue };
            if let Err(e) = lock(stream).close() {
                failed += 1;
                error!(file = %self.local_name, part = index, error = %e, "multipart stream failed to close");
            }
        }

        if failed > 0 {
            return Err(TransferError::CloseFailed { failed, total });
        }
        debug!(file = %self.local_name, streams = total, "multi-part streams closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{OffsetRangeBytesStream, OffsetRangeFileStream};
    use std::io::{Read, Write};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const TEST_FILE_SIZE_BYTES: u64 = 128;

    fn create_test_file(dir: &Path) -> (PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..TEST_FILE_SIZE_BYTES).map(|i| (i * 7 % 251) as u8).collect();
        let path = dir.join("_0.cfs");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&data).unwrap();
        (path, data)
    }

    fn file_container(path: &Path) -> TransferContainer {
        let path = path.to_path_buf();
        TransferContainer::new(
            "_0.cfs",
            "indices/0/_0.cfs",
            TEST_FILE_SIZE_BYTES,
            WritePriority::High,
            Arc::new(move |size, position| {
                Ok(Box::new(OffsetRangeFileStream::open(&path, size, position)?)
                    as Box<dyn OffsetRangeStream>)
            }),
        )
        .with_fail_if_exists(true)
    }

    /// Stream that counts closes and optionally fails them.
    struct TrackedStream {
        inner: OffsetRangeBytesStream,
        closes: Arc<AtomicUsize>,
        fail_close: bool,
    }

    impl Read for TrackedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl OffsetRangeStream for TrackedStream {
        fn file_pointer(&self) -> u64 {
            self.inner.file_pointer()
        }
        fn mark(&mut self) {
            self.inner.mark()
        }
        fn reset(&mut self) -> io::Result<()> {
            self.inner.reset()
        }
        fn close(&mut self) -> io::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(io::Error::other("disk went away"));
            }
            self.inner.close()
        }
    }

    fn tracked_container(closes: Arc<AtomicUsize>, failing_offsets: Vec<u64>) -> TransferContainer {
        let data: Arc<[u8]> = Arc::from(vec![1u8; TEST_FILE_SIZE_BYTES as usize]);
        TransferContainer::new(
            "translog-3.tlog",
            "translog/translog-3.tlog",
            TEST_FILE_SIZE_BYTES,
            WritePriority::Normal,
            Arc::new(move |size, position| {
                Ok(Box::new(TrackedStream {
                    inner: OffsetRangeBytesStream::new(data.clone(), size, position),
                    closes: closes.clone(),
                    fail_close: failing_offsets.contains(&position),
                }) as Box<dyn OffsetRangeStream>)
            }),
        )
    }

    fn check_stream_context(
        container: &TransferContainer,
        data: &[u8],
        part_size: u64,
        last_part_size: u64,
        expected_part_count: usize,
    ) {
        let context = container.supply_stream_context(part_size).unwrap();
        let part_count = context.number_of_parts();
        assert_eq!(part_count, expected_part_count);
        assert_eq!(
            part_size * (part_count as u64 - 1) + last_part_size,
            container.content_length()
        );

        let handles: Vec<_> = (0..part_count)
            .map(|index| {
                let context = context.clone();
                std::thread::spawn(move || {
                    let stream = context.provide_stream(index).unwrap();
                    let bytes = stream.read_from_mark().unwrap();
                    (index, stream.content_length(), stream.offset(), bytes)
                })
            })
            .collect();

        for handle in handles {
            let (index, length, offset, bytes) = handle.join().unwrap();
            let expected_length = if index == part_count - 1 {
                last_part_size
            } else {
                part_size
            };
            assert_eq!(length, expected_length);
            assert_eq!(offset, index as u64 * part_size);
            assert_eq!(bytes, &data[offset as usize..(offset + length) as usize]);
        }
    }

    #[test]
    fn supply_stream_context_divisible_parts() {
        let dir = TempDir::new().unwrap();
        let (path, data) = create_test_file(dir.path());
        let container = file_container(&path);
        check_stream_context(&container, &data, 16, 16, 8);
        container.close().unwrap();
    }

    #[test]
    fn supply_stream_context_non_divisible_parts() {
        let dir = TempDir::new().unwrap();
        let (path, data) = create_test_file(dir.path());
        let container = file_container(&path);
        check_stream_context(&container, &data, 10, 8, 13);
        container.close().unwrap();
    }

    #[test]
    fn supply_stream_context_called_twice() {
        let dir = TempDir::new().unwrap();
        let (path, _) = create_test_file(dir.path());
        let container = file_container(&path);
        container.supply_stream_context(16).unwrap();
        assert!(matches!(
            container.supply_stream_context(16),
            Err(TransferError::StreamContextReused)
        ));
    }

    #[test]
    fn write_context_shares_the_once_guard() {
        let dir = TempDir::new().unwrap();
        let (path, _) = create_test_file(dir.path());
        let container = file_container(&path).with_integrity_check(true);
        let context = container.create_write_context();

        assert_eq!(context.file_name(), "indices/0/_0.cfs");
        assert_eq!(context.content_length(), TEST_FILE_SIZE_BYTES);
        assert_eq!(context.priority(), WritePriority::High);
        assert!(context.fail_if_exists());
        assert!(context.integrity_check());

        context.stream_context(32).unwrap();
        assert!(matches!(
            context.stream_context(32),
            Err(TransferError::StreamContextReused)
        ));
        assert!(matches!(
            container.supply_stream_context(32),
            Err(TransferError::StreamContextReused)
        ));
    }

    #[test]
    fn finalizer_runs_once_and_records_outcome() {
        let dir = TempDir::new().unwrap();
        let (path, _) = create_test_file(dir.path());
        let container = file_container(&path);
        let context = container.create_write_context();

        assert_eq!(container.upload_outcome(), None);
        assert!(context.finalize(true));
        assert!(!context.finalize(false));
        assert_eq!(container.upload_outcome(), Some(true));
    }

    #[test]
    fn invalid_part_size_is_rejected_before_opening() {
        let dir = TempDir::new().unwrap();
        let (path, _) = create_test_file(dir.path());
        let container = file_container(&path);
        assert!(matches!(
            container.supply_stream_context(0),
            Err(TransferError::InvalidPartition(_))
        ));
    }

    #[test]
    fn part_stream_checksum_matches_part_bytes() {
        let dir = TempDir::new().unwrap();
        let (path, data) = create_test_file(dir.path());
        let container = file_container(&path);
        let context = container.supply_stream_context(50).unwrap();

        let stream = context.provide_stream(2).unwrap();
        assert_eq!(stream.part_number(), 3);
        let first = stream.read_from_mark().unwrap();
        let second = stream.read_from_mark().unwrap();
        assert_eq!(first, second);
        assert_eq!(first, &data[100..128]);
        assert_eq!(stream.checksum(), crate::crc32(&data[100..128]));
    }

    #[test]
    fn providing_a_part_twice_fails() {
        let closes = Arc::new(AtomicUsize::new(0));
        let container = tracked_container(closes, vec![]);
        let context = container.supply_stream_context(64).unwrap();
        context.provide_stream(0).unwrap();
        assert!(matches!(
            context.provide_stream(0),
            Err(TransferError::StreamAlreadyProvided(0))
        ));
        assert!(matches!(
            context.provide_stream(2),
            Err(TransferError::PartIndexOutOfRange(2))
        ));
    }

    #[test]
    fn supplier_failure_is_reported() {
        let container = TransferContainer::new(
            "gone",
            "gone",
            10,
            WritePriority::Normal,
            Arc::new(|_, _| Err(io::Error::new(io::ErrorKind::NotFound, "no such file"))),
        );
        let context = container.supply_stream_context(5).unwrap();
        assert!(matches!(context.provide_stream(0), Err(TransferError::Io(_))));
        container.close().unwrap();
    }

    #[test]
    fn close_releases_only_created_streams() {
        let closes = Arc::new(AtomicUsize::new(0));
        let container = tracked_container(closes.clone(), vec![]);
        let context = container.supply_stream_context(16).unwrap();
        for index in [0, 3, 5] {
            context.provide_stream(index).unwrap();
        }

        container.close().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 3);

        container.close().unwrap();
        drop(container);
        assert_eq!(closes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn close_attempts_every_stream_and_reports_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let container = tracked_container(closes.clone(), vec![0, 32]);
        let context = container.supply_stream_context(32).unwrap();
        for index in 0..4 {
            context.provide_stream(index).unwrap();
        }

        let err = container.close().unwrap_err();
        assert!(matches!(
            err,
            TransferError::CloseFailed {
                failed: 2,
                total: 4
            }
        ));
        assert_eq!(closes.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn close_before_stream_context_is_noop() {
        let closes = Arc::new(AtomicUsize::new(0));
        let container = tracked_container(closes.clone(), vec![]);
        container.close().unwrap();
        // Nothing was opened, so the container can still be used.
        let context = container.supply_stream_context(64).unwrap();
        context.provide_stream(1).unwrap();
        container.close().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn provide_after_close_fails_and_open_streams_stop_reading() {
        let closes = Arc::new(AtomicUsize::new(0));
        let container = tracked_container(closes.clone(), vec![]);
        let context = container.supply_stream_context(64).unwrap();
        let stream = context.provide_stream(0).unwrap();

        container.close().unwrap();
        assert!(matches!(context.provide_stream(1), Err(TransferError::Closed)));
        assert!(stream.read_from_mark().is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
