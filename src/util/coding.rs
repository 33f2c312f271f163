//! Fixed-width and variable-length integer encodings.
//!
//! Fixed integers are little-endian. Varints use 7 bits per byte with the
//! high bit as a continuation flag.

use crate::error::{Error, Result};

/// Maximum encoded length of a varint32.
pub const MAX_VARINT32_LEN: usize = 5;
/// Maximum encoded length of a varint64.
pub const MAX_VARINT64_LEN: usize = 10;

/// Appends a little-endian u32.
pub fn put_fixed32(dst: &mut Vec<u8>, value: u32) {
    dst.extend_from_slice(&value.to_le_bytes());
}

/// Appends a little-endian u64.
pub fn put_fixed64(dst: &mut Vec<u8>, value: u64) {
    dst.extend_from_slice(&value.to_le_bytes());
}

/// Reads a little-endian u32 from the first four bytes of `src`.
///
/// Callers must pass at least four bytes.
pub fn decode_fixed32(src: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&src[..4]);
    u32::from_le_bytes(buf)
}

/// Reads a little-endian u64 from the first eight bytes of `src`.
///
/// Callers must pass at least eight bytes.
pub fn decode_fixed64(src: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&src[..8]);
    u64::from_le_bytes(buf)
}

/// Appends a varint-encoded u32.
pub fn put_varint32(dst: &mut Vec<u8>, value: u32) {
    put_varint64(dst, value as u64);
}

/// Appends a varint-encoded u64.
pub fn put_varint64(dst: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        dst.push((value as u8) | 0x80);
        value >>= 7;
    }
    dst.push(value as u8);
}

/// Number of bytes `value` takes as a varint.
pub fn varint_length(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Decodes a varint64 from the front of `src`, returning the value and the
/// number of bytes consumed.
pub fn decode_varint64(src: &[u8]) -> Option<(u64, usize)> {
    let mut result = 0u64;
    for (i, &byte) in src.iter().take(MAX_VARINT64_LEN).enumerate() {
        result |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }
    None
}

/// Decodes a varint32 from the front of `src`.
pub fn decode_varint32(src: &[u8]) -> Option<(u32, usize)> {
    let mut result = 0u32;
    for (i, &byte) in src.iter().take(MAX_VARINT32_LEN).enumerate() {
        result |= ((byte & 0x7f) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }
    None
}

/// Consumes a varint64 from a cursor slice.
pub fn get_varint64(src: &mut &[u8]) -> Result<u64> {
    let (value, n) =
        decode_varint64(src).ok_or_else(|| Error::corruption("bad varint64"))?;
    *src = &src[n..];
    Ok(value)
}

/// Consumes a varint32 from a cursor slice.
pub fn get_varint32(src: &mut &[u8]) -> Result<u32> {
    let (value, n) =
        decode_varint32(src).ok_or_else(|| Error::corruption("bad varint32"))?;
    *src = &src[n..];
    Ok(value)
}

/// Appends a varint32 length followed by the bytes.
pub fn put_length_prefixed_slice(dst: &mut Vec<u8>, value: &[u8]) {
    put_varint32(dst, value.len() as u32);
    dst.extend_from_slice(value);
}

/// Consumes a length-prefixed slice from a cursor slice.
pub fn get_length_prefixed_slice<'a>(src: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = get_varint32(src)? as usize;
    if src.len() < len {
        return Err(Error::corruption("truncated length-prefixed slice"));
    }
    let (value, rest) = src.split_at(len);
    *src = rest;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_boundaries() {
        for value in [0u64, 1, 127, 128, 16383, 16384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            put_varint64(&mut buf, value);
            assert_eq!(buf.len(), varint_length(value));
            let (decoded, n) = decode_varint64(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(n, buf.len());
        }
        assert_eq!(varint_length(u64::MAX), MAX_VARINT64_LEN);
    }

    #[test]
    fn test_truncated_varint() {
        let mut buf = Vec::new();
        put_varint64(&mut buf, 1 << 40);
        buf.pop();
        assert!(decode_varint64(&buf).is_none());

        let mut cursor: &[u8] = &buf;
        assert!(get_varint64(&mut cursor).unwrap_err().is_corruption());
    }

    #[test]
    fn test_length_prefixed_cursor() {
        let mut buf = Vec::new();
        put_length_prefixed_slice(&mut buf, b"alpha");
        put_length_prefixed_slice(&mut buf, b"");
        put_fixed32(&mut buf, 7);

        let mut cursor: &[u8] = &buf;
        assert_eq!(get_length_prefixed_slice(&mut cursor).unwrap(), b"alpha");
        assert_eq!(get_length_prefixed_slice(&mut cursor).unwrap(), b"");
        assert_eq!(decode_fixed32(cursor), 7);
    }
}
