//! Inclusive byte ranges and their HTTP header forms.

use std::fmt;

use crate::TransferError;
use crate::partition::PartDescriptor;

/// An inclusive byte range `start..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Result<Self, TransferError> {
        if end < start {
            return Err(TransferError::InvalidRange(format!(
                "end {end} is before start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Range covered by a part; `None` for a zero-length part.
    pub fn for_part(part: &PartDescriptor) -> Option<Self> {
        (part.size > 0).then(|| Self {
            start: part.offset,
            end: part.end() - 1,
        })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Range` request header value, e.g. `bytes=0-99`.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// `Content-Range` header value, e.g. `bytes 0-99/200`.
    pub fn content_range_header(&self, total: Option<u64>) -> String {
        match total {
            Some(total) => format!("bytes {}-{}/{total}", self.start, self.end),
            None => format!("bytes {}-{}/*", self.start, self.end),
        }
    }

    /// Parses a `Range` or `Content-Range` value such as `bytes 0-99/200`,
    /// `bytes 0-99/*` or `bytes=0-99`.
    pub fn parse(header: &str) -> Result<Self, TransferError> {
        let invalid = |reason: &str| TransferError::InvalidRange(format!("{header:?}: {reason}"));

        let header = header.trim();
        let split = header
            .find(|c: char| c == ' ' || c == '=')
            .ok_or_else(|| invalid("missing unit"))?;
        let (unit, rest) = header.split_at(split);
        if !unit.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Err(invalid("unit must start with a letter"));
        }

        let rest = rest[1..].trim();
        let rest = match rest.split_once('/') {
            Some((range, total)) => {
                let total = total.trim();
                if total != "*" && total.parse::<u64>().is_err() {
                    return Err(invalid("total length is not a number"));
                }
                range.trim()
            }
            None => rest,
        };

        let (start, end) = rest.split_once('-').ok_or_else(|| invalid("missing '-'"))?;
        let start = start
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid("start is not a number"))?;
        let end = end
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid("end is not a number"))?;
        Self::new(start, end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
