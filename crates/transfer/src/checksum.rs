//! CRC32 helpers shared by the streams and the upload path.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use crc32fast::Hasher;

use crate::TransferError;

/// CRC32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Encodes a CRC32 the way object stores carry it: base64 of the four
/// big-endian bytes.
pub fn encode_crc32(value: u32) -> String {
    STANDARD.encode(value.to_be_bytes())
}

/// Decodes a base64 CRC32 produced by [`encode_crc32`] or an object store.
pub fn decode_crc32(encoded: &str) -> Result<u32, TransferError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| TransferError::InvalidChecksum(format!("{encoded}: {e}")))?;
    let bytes: [u8; 4] = bytes.try_into().map_err(|b: Vec<u8>| {
        TransferError::InvalidChecksum(format!("{encoded}: expected 4 bytes, got {}", b.len()))
    })?;
    Ok(u32::from_be_bytes(bytes))
}

/// Combines per-part `(crc, length)` pairs, in content order, into the CRC32
/// of the whole content.
pub fn combine_crc32(parts: impl IntoIterator<Item = (u32, u64)>) -> u32 {
    let mut whole = Hasher::new();
    for (crc, len) in parts {
        whole.combine(&Hasher::new_with_initial_len(crc, len));
    }
    whole.finalize()
}
