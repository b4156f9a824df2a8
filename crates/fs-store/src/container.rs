use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use blobferry_transfer::{StreamContext, WriteContext, validate_blob_name};
use tracing::{debug, info, warn};

use crate::FsStoreError;

/// Number of parts a blob is split into.
pub const DEFAULT_PARTS: usize = 10;

/// How long to wait for all part readers before giving up.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(30);

/// A directory of blobs.
#[derive(Debug, Clone)]
pub struct FsBlobContainer {
    path: PathBuf,
    parts: usize,
    timeout: Duration,
}

impl FsBlobContainer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            parts: DEFAULT_PARTS,
            timeout: DEFAULT_TRANSFER_TIMEOUT,
        }
    }

    pub fn with_parts(mut self, parts: usize) -> Self {
        self.parts = parts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of blob `name` inside the container directory.
    pub fn blob_path(&self, name: &str) -> Result<PathBuf, FsStoreError> {
        validate_blob_name(name)?;
        Ok(self.path.join(name))
    }

    pub fn blob_exists(&self, name: &str) -> Result<bool, FsStoreError> {
        Ok(self.blob_path(name)?.is_file())
    }

    pub fn read_blob(&self, name: &str) -> Result<Vec<u8>, FsStoreError> {
        Ok(std::fs::read(self.blob_path(name)?)?)
    }

    /// Writes the blob described by `context` and returns its length.
    ///
    /// The finalizer of `context` runs exactly once, with `true` only if
    /// the file was written in full. Nothing is written on timeout or on a
    /// short read.
    pub fn write_blob_by_streams(&self, context: &WriteContext) -> Result<u64, FsStoreError> {
        let result = self.write_parts(context);
        if let Err(e) = &result {
            warn!(blob = %context.file_name(), error = %e, "blob write failed");
        }
        context.finalize(result.is_ok());
        result
    }

    fn write_parts(&self, context: &WriteContext) -> Result<u64, FsStoreError> {
        let name = context.file_name();
        let file_path = self.blob_path(name)?;
        let length = context.content_length();
        let buffer_len = usize::try_from(length)
            .map_err(|_| io::Error::other(format!("{name} is too large to buffer")))?;

        let part_size = length.div_ceil(self.parts as u64).max(1);
        let stream_context = context.stream_context(part_size)?;
        let part_count = stream_context.number_of_parts();

        let (tx, rx) = mpsc::channel();
        for index in 0..part_count {
            let tx = tx.clone();
            let stream_context = stream_context.clone();
            thread::Builder::new()
                .name(format!("fs-blob-part-{index}"))
                .spawn(move || {
                    let _ = tx.send((index, read_part(&stream_context, index)));
                })?;
        }
        drop(tx);

        let mut buffer = vec![0u8; buffer_len];
        let mut total_read = 0u64;
        let deadline = Instant::now() + self.timeout;
        for _ in 0..part_count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (index, result) = match rx.recv_timeout(remaining) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(FsStoreError::Timeout {
                        name: name.to_string(),
                        timeout: self.timeout,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::other("part reader exited without reporting").into());
                }
            };

            let (offset, bytes) = result.map_err(|message| FsStoreError::PartFailed {
                name: name.to_string(),
                part: index as u32 + 1,
                message,
            })?;
            let start = usize::try_from(offset).unwrap_or(usize::MAX);
            let slot = start
                .checked_add(bytes.len())
                .and_then(|end| buffer.get_mut(start..end))
                .ok_or_else(|| FsStoreError::LengthMismatch {
                    name: name.to_string(),
                    expected: length,
                    actual: offset + bytes.len() as u64,
                })?;
            slot.copy_from_slice(&bytes);
            total_read += bytes.len() as u64;
        }

        if total_read != length {
            return Err(FsStoreError::LengthMismatch {
                name: name.to_string(),
                expected: length,
                actual: total_read,
            });
        }

        let mut options = OpenOptions::new();
        options.write(true);
        if context.fail_if_exists() {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }
        let mut file = options.open(&file_path).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                FsStoreError::AlreadyExists(name.to_string())
            } else {
                FsStoreError::Io(e)
            }
        })?;
        file.write_all(&buffer)?;
        file.sync_all()?;

        debug!(blob = %name, parts = part_count, part_size, "parts assembled");
        info!(blob = %name, bytes = length, path = %file_path.display(), "blob written");
        Ok(length)
    }
}

/// Reads part `index` in full, returning its offset and bytes.
fn read_part(stream_context: &StreamContext, index: usize) -> Result<(u64, Vec<u8>), String> {
    let stream = stream_context
        .provide_stream(index)
        .map_err(|e| e.to_string())?;
    let bytes = stream.read_from_mark().map_err(|e| e.to_string())?;
    Ok((stream.offset(), bytes))
}
