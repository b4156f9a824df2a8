//! Splitting content into parts and choosing a part size.

use crate::TransferError;

/// Maximum number of parts an object store accepts for one multipart upload.
pub const MAX_UPLOAD_PARTS: u64 = 10_000;

/// Content longer than this is sent as a single part.
pub const LARGE_OBJECT_THRESHOLD: u64 = 100 * 1024 * 1024;

/// A contiguous byte range of the content, uploaded as one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartDescriptor {
    /// 0-based part index.
    pub index: usize,
    /// Size of this part in bytes.
    pub size: u64,
    /// Byte offset of this part within the content.
    pub offset: u64,
}

impl PartDescriptor {
    /// 1-based part number, as object stores number parts.
    pub fn part_number(&self) -> u32 {
        self.index as u32 + 1
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Result of partitioning a content length by a part size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLayout {
    pub content_length: u64,
    pub part_size: u64,
    pub last_part_size: u64,
    pub part_count: usize,
}

impl PartLayout {
    /// Returns the descriptor of the part at `index`, if it exists.
    pub fn part(&self, index: usize) -> Option<PartDescriptor> {
        if index >= self.part_count {
            return None;
        }
        let size = if index + 1 == self.part_count {
            self.last_part_size
        } else {
            self.part_size
        };
        Some(PartDescriptor {
            index,
            size,
            offset: index as u64 * self.part_size,
        })
    }

    /// Iterates over every part in index order.
    pub fn parts(&self) -> impl Iterator<Item = PartDescriptor> + '_ {
        (0..self.part_count).filter_map(|index| self.part(index))
    }

    /// `true` if the content fits in one part.
    pub fn is_single_part(&self) -> bool {
        self.part_count == 1
    }
}

/// Partitions `content_length` bytes into parts of `part_size` bytes.
///
/// Every part except the last is exactly `part_size` long; the last one
/// holds the remainder, or a full `part_size` when the length divides
/// evenly. Empty content yields a single zero-length part.
pub fn partition(
    content_length: u64,
    part_size: u64,
    max_parts: u64,
) -> Result<PartLayout, TransferError> {
    if part_size == 0 {
        return Err(TransferError::InvalidPartition(
            "part size must be greater than zero".into(),
        ));
    }
    if max_parts == 0 {
        return Err(TransferError::InvalidPartition(
            "maximum part count must be greater than zero".into(),
        ));
    }

    if content_length == 0 {
        return Ok(PartLayout {
            content_length,
            part_size,
            last_part_size: 0,
            part_count: 1,
        });
    }

    let parts = content_length.div_ceil(part_size);
    if parts > max_parts {
        return Err(TransferError::TooManyParts {
            parts,
            part_size,
            max_parts,
        });
    }

    let remainder = content_length % part_size;
    let last_part_size = if remainder == 0 { part_size } else { remainder };

    Ok(PartLayout {
        content_length,
        part_size,
        last_part_size,
        part_count: parts as usize,
    })
}

/// Picks the part size for a multipart upload of `content_length` bytes.
///
/// Content above [`LARGE_OBJECT_THRESHOLD`] is sent whole. Anything else
/// is split so that the part count stays within [`MAX_UPLOAD_PARTS`]
/// without any part dropping below `minimum_part_size`.
pub fn calculate_optimal_part_size(content_length: u64, minimum_part_size: u64) -> u64 {
    if content_length > LARGE_OBJECT_THRESHOLD {
        return content_length;
    }
    content_length
        .div_ceil(MAX_UPLOAD_PARTS)
        .max(minimum_part_size)
        .max(1)
}
