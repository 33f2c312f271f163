//! Block framing on disk: compression on the way out, checksum
//! verification and decompression on the way in.
//!
//! Every block is written as `payload | compression_type: u8 | checksum: fixed32`.

use crate::compression::{self, CompressionType};
use crate::env::RandomAccessFile;
use crate::error::{Error, Result};
use crate::sstable::format::{block_checksum, BlockHandle, ChecksumType, BLOCK_TRAILER_SIZE};
use crate::util::coding::decode_fixed32;
use bytes::Bytes;
use std::borrow::Cow;

/// Blocks at or above this size are never compressed.
pub const COMPRESSION_SIZE_LIMIT: usize = i32::MAX as usize;

/// Whether a compressed size is worth keeping: it must save at least
/// 12.5% of the raw size.
pub fn good_compression_ratio(compressed_size: usize, raw_size: usize) -> bool {
    compressed_size < raw_size - raw_size / 8
}

/// Compresses a raw block if that pays off.
///
/// Returns the bytes to store and the tag that describes them. Falls back
/// to the raw bytes tagged `None` when the codec is unavailable, fails, or
/// misses the ratio. With `verify`, an accepted compressed block is
/// decompressed again and compared against `raw`; a mismatch is an error.
pub fn compress_block<'a>(
    raw: &'a [u8],
    ctype: CompressionType,
    format_version: u32,
    dict: &[u8],
    verify: bool,
) -> Result<(Cow<'a, [u8]>, CompressionType)> {
    if ctype == CompressionType::None || raw.len() >= COMPRESSION_SIZE_LIMIT {
        return Ok((Cow::Borrowed(raw), CompressionType::None));
    }

    let compressed = match compression::compress(raw, ctype, format_version, dict) {
        Some(c) if good_compression_ratio(c.len(), raw.len()) => c,
        _ => return Ok((Cow::Borrowed(raw), CompressionType::None)),
    };

    if verify {
        match compression::decompress(&compressed, ctype, format_version, dict) {
            Ok(restored) if restored == raw => {}
            Ok(_) => {
                return Err(Error::corruption(
                    "Decompressed block did not match raw block",
                ))
            }
            Err(_) => return Err(Error::corruption("Could not decompress")),
        }
    }

    Ok((Cow::Owned(compressed), ctype))
}

/// Builds the 5-byte trailer for a stored payload.
pub fn block_trailer(
    payload: &[u8],
    ctype: CompressionType,
    checksum: ChecksumType,
) -> [u8; BLOCK_TRAILER_SIZE] {
    let type_byte = ctype as u8;
    let mut trailer = [0u8; BLOCK_TRAILER_SIZE];
    trailer[0] = type_byte;
    trailer[1..].copy_from_slice(&block_checksum(checksum, payload, type_byte).to_le_bytes());
    trailer
}

/// A block as stored: payload bytes (maybe compressed) and their tag.
#[derive(Debug, Clone)]
pub struct BlockContents {
    /// Stored payload, trailer stripped.
    pub data: Bytes,
    /// Compression of `data`.
    pub compression: CompressionType,
}

impl BlockContents {
    /// Uncompressed contents.
    pub fn uncompressed(data: Bytes) -> Self {
        Self {
            data,
            compression: CompressionType::None,
        }
    }

    /// Decompresses if needed.
    pub fn into_uncompressed(self, format_version: u32, dict: &[u8]) -> Result<Bytes> {
        if self.compression == CompressionType::None {
            return Ok(self.data);
        }
        compression::decompress(&self.data, self.compression, format_version, dict)
            .map(Bytes::from)
    }
}

/// Reads the block at `handle` and checks its trailer.
///
/// A short read, a checksum mismatch or an unknown compression tag is
/// reported as corruption. The payload is returned still compressed.
pub fn read_block_contents(
    file: &dyn RandomAccessFile,
    checksum: ChecksumType,
    handle: &BlockHandle,
    verify_checksums: bool,
) -> Result<BlockContents> {
    let n = handle.size as usize;
    let data = file.read(handle.offset, n + BLOCK_TRAILER_SIZE)?;
    if data.len() != n + BLOCK_TRAILER_SIZE {
        return Err(Error::corruption(format!(
            "truncated block read at offset {}: wanted {} bytes, got {}",
            handle.offset,
            n + BLOCK_TRAILER_SIZE,
            data.len()
        )));
    }

    let type_byte = data[n];
    if verify_checksums && checksum != ChecksumType::NoChecksum {
        let stored = decode_fixed32(&data[n + 1..]);
        let actual = block_checksum(checksum, &data[..n], type_byte);
        if stored != actual {
            return Err(Error::corruption(format!(
                "block checksum mismatch at offset {}: stored {:#x}, computed {:#x}",
                handle.offset, stored, actual
            )));
        }
    }

    let compression = CompressionType::from_u8(type_byte).ok_or_else(|| {
        Error::corruption(format!(
            "bad block type {} at offset {}",
            type_byte, handle.offset
        ))
    })?;
    Ok(BlockContents {
        data: data.slice(..n),
        compression,
    })
}
