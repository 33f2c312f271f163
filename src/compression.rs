//! Block compression codecs keyed by the on-disk compression tag.
//!
//! Every tag is recognized when decoding a block trailer; which tags can
//! actually be compressed or decompressed depends on the enabled features.

use crate::error::{Error, Result};
#[allow(unused_imports)]
use crate::util::coding::{decode_fixed64, get_varint32, put_fixed64, put_varint32};
use serde::{Deserialize, Serialize};

/// Compression algorithms, as stored in a block trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression.
    None = 0x0,
    /// Snappy compression (fast, moderate compression ratio).
    Snappy = 0x1,
    /// Zlib. Recognized on disk, not available in this build.
    Zlib = 0x2,
    /// BZip2. Recognized on disk, not available in this build.
    BZip2 = 0x3,
    /// LZ4 compression (very fast, lower compression ratio).
    Lz4 = 0x4,
    /// LZ4 high-compression mode.
    Lz4hc = 0x5,
    /// Xpress. Recognized on disk, not available in this build.
    Xpress = 0x6,
    /// Zstandard, with optional dictionary.
    Zstd = 0x7,
}

impl Default for CompressionType {
    fn default() -> Self {
        if CompressionType::Snappy.is_supported() {
            CompressionType::Snappy
        } else {
            CompressionType::None
        }
    }
}

impl CompressionType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(CompressionType::None),
            0x1 => Some(CompressionType::Snappy),
            0x2 => Some(CompressionType::Zlib),
            0x3 => Some(CompressionType::BZip2),
            0x4 => Some(CompressionType::Lz4),
            0x5 => Some(CompressionType::Lz4hc),
            0x6 => Some(CompressionType::Xpress),
            0x7 => Some(CompressionType::Zstd),
            _ => None,
        }
    }

    /// Name recorded in table properties.
    pub fn name(self) -> &'static str {
        match self {
            CompressionType::None => "NoCompression",
            CompressionType::Snappy => "Snappy",
            CompressionType::Zlib => "Zlib",
            CompressionType::BZip2 => "BZip2",
            CompressionType::Lz4 => "LZ4",
            CompressionType::Lz4hc => "LZ4HC",
            CompressionType::Xpress => "Xpress",
            CompressionType::Zstd => "ZSTD",
        }
    }

    /// Whether this build can compress and decompress with the algorithm.
    pub fn is_supported(self) -> bool {
        match self {
            CompressionType::None => true,
            CompressionType::Snappy => cfg!(feature = "snappy"),
            CompressionType::Lz4 | CompressionType::Lz4hc => cfg!(feature = "lz4-compression"),
            CompressionType::Zstd => cfg!(feature = "zstd-compression"),
            CompressionType::Zlib | CompressionType::BZip2 | CompressionType::Xpress => false,
        }
    }
}

/// Size header in front of LZ4/ZSTD payloads: varint32 from format
/// version 2 on, fixed64 before that.
#[allow(dead_code)]
fn put_size_header(dst: &mut Vec<u8>, raw_len: usize, format_version: u32) {
    if format_version >= 2 {
        put_varint32(dst, raw_len as u32);
    } else {
        put_fixed64(dst, raw_len as u64);
    }
}

#[allow(dead_code)]
fn split_size_header(data: &[u8], format_version: u32) -> Result<(usize, &[u8])> {
    if format_version >= 2 {
        let mut cursor = data;
        let len = get_varint32(&mut cursor)? as usize;
        Ok((len, cursor))
    } else {
        if data.len() < 8 {
            return Err(Error::corruption("compressed block missing size header"));
        }
        Ok((decode_fixed64(data) as usize, &data[8..]))
    }
}

/// Compresses `raw`. Returns `None` when the algorithm is unavailable or
/// the codec fails; the caller then stores the block uncompressed.
#[allow(unused_variables)]
pub fn compress(
    raw: &[u8],
    ctype: CompressionType,
    format_version: u32,
    dict: &[u8],
) -> Option<Vec<u8>> {
    match ctype {
        CompressionType::None => Some(raw.to_vec()),
        #[cfg(feature = "snappy")]
        CompressionType::Snappy => snap::raw::Encoder::new().compress_vec(raw).ok(),
        #[cfg(feature = "lz4-compression")]
        CompressionType::Lz4 | CompressionType::Lz4hc => {
            let mode = if ctype == CompressionType::Lz4hc {
                lz4::block::CompressionMode::HIGHCOMPRESSION(9)
            } else {
                lz4::block::CompressionMode::DEFAULT
            };
            let body = lz4::block::compress(raw, Some(mode), false).ok()?;
            let mut out = Vec::with_capacity(body.len() + 8);
            put_size_header(&mut out, raw.len(), format_version);
            out.extend_from_slice(&body);
            Some(out)
        }
        #[cfg(feature = "zstd-compression")]
        CompressionType::Zstd => {
            let body = if dict.is_empty() {
                zstd::bulk::compress(raw, 3).ok()?
            } else {
                zstd::bulk::Compressor::with_dictionary(3, dict)
                    .and_then(|mut c| c.compress(raw))
                    .ok()?
            };
            let mut out = Vec::with_capacity(body.len() + 8);
            put_size_header(&mut out, raw.len(), format_version);
            out.extend_from_slice(&body);
            Some(out)
        }
        _ => None,
    }
}

/// Decompresses a block payload stored with `ctype`.
#[allow(unused_variables)]
pub fn decompress(
    data: &[u8],
    ctype: CompressionType,
    format_version: u32,
    dict: &[u8],
) -> Result<Vec<u8>> {
    match ctype {
        CompressionType::None => Ok(data.to_vec()),
        #[cfg(feature = "snappy")]
        CompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| Error::corruption(format!("Snappy: {}", e))),
        #[cfg(feature = "lz4-compression")]
        CompressionType::Lz4 | CompressionType::Lz4hc => {
            let (raw_len, body) = split_size_header(data, format_version)?;
            lz4::block::decompress(body, Some(raw_len as i32))
                .map_err(|e| Error::corruption(format!("LZ4: {}", e)))
        }
        #[cfg(feature = "zstd-compression")]
        CompressionType::Zstd => {
            let (raw_len, body) = split_size_header(data, format_version)?;
            let result = if dict.is_empty() {
                zstd::bulk::decompress(body, raw_len)
            } else {
                zstd::bulk::Decompressor::with_dictionary(dict)
                    .and_then(|mut d| d.decompress(body, raw_len))
            };
            result.map_err(|e| Error::corruption(format!("ZSTD: {}", e)))
        }
        other => Err(Error::not_supported(format!(
            "{} compression is not available in this build",
            other.name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for tag in 0u8..=7 {
            let ctype = CompressionType::from_u8(tag).unwrap();
            assert_eq!(ctype as u8, tag);
        }
        assert!(CompressionType::from_u8(8).is_none());
    }

    #[test]
    fn test_unsupported_codecs() {
        assert!(compress(b"data", CompressionType::Zlib, 2, &[]).is_none());
        let err = decompress(b"data", CompressionType::BZip2, 2, &[]).unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[cfg(feature = "snappy")]
    #[test]
    fn test_snappy() {
        let raw = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".repeat(8);
        let compressed = compress(&raw, CompressionType::Snappy, 2, &[]).unwrap();
        assert!(compressed.len() < raw.len());
        let restored = decompress(&compressed, CompressionType::Snappy, 2, &[]).unwrap();
        assert_eq!(restored, raw);

        assert!(decompress(b"\xff\xff\xff\xff\xff", CompressionType::Snappy, 2, &[])
            .unwrap_err()
            .is_corruption());
    }

    #[cfg(feature = "lz4-compression")]
    #[test]
    fn test_lz4_size_header_versions() {
        let raw = b"0123456789".repeat(100);
        for version in [1, 2] {
            let compressed = compress(&raw, CompressionType::Lz4, version, &[]).unwrap();
            let restored = decompress(&compressed, CompressionType::Lz4, version, &[]).unwrap();
            assert_eq!(restored, raw);
        }
    }
}
