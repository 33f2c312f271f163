//! Table file framing: block handles, block trailers and the footer.
//!
//! ```text
//! legacy footer (48 bytes):
//!   metaindex_handle | index_handle | padding to 40 | magic: fixed64
//! current footer (53 bytes):
//!   checksum_type: u8 | metaindex_handle | index_handle | padding to 41
//!   | format_version: fixed32 | magic: fixed64
//! ```

use crate::env::RandomAccessFile;
use crate::error::{Error, Result};
use crate::util::coding::{
    decode_fixed32, decode_fixed64, get_varint64, put_fixed32, put_fixed64, put_varint64,
};
use serde::{Deserialize, Serialize};

/// Magic number of tables written by this crate.
pub const BLOCK_BASED_TABLE_MAGIC_NUMBER: u64 = 0x88e2_41b7_85f4_cff7;

/// Magic number of legacy tables (no checksum type or format version).
pub const LEGACY_BLOCK_BASED_TABLE_MAGIC_NUMBER: u64 = 0xdb47_7524_8b80_fb57;

/// compression type (1 byte) + checksum (4 bytes).
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Newest format version this crate writes and reads.
pub const LATEST_FORMAT_VERSION: u32 = 2;

/// Checksum algorithms for block trailers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChecksumType {
    /// No checksum; the slot is written as zero and never verified.
    NoChecksum = 0x0,
    /// Masked CRC32.
    #[default]
    Crc32 = 0x1,
    /// xxHash32 with seed 0.
    XxHash = 0x2,
}

impl ChecksumType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(ChecksumType::NoChecksum),
            0x1 => Some(ChecksumType::Crc32),
            0x2 => Some(ChecksumType::XxHash),
            _ => None,
        }
    }
}

const MASK_DELTA: u32 = 0xa282_ead8;

/// Rotates and offsets a CRC so that a CRC computed over data holding
/// embedded CRCs is still well distributed.
pub fn mask_crc(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Inverse of [`mask_crc`].
pub fn unmask_crc(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}

/// Checksum over `payload` followed by the compression type byte, as
/// stored in a block trailer.
pub fn block_checksum(checksum: ChecksumType, payload: &[u8], type_byte: u8) -> u32 {
    match checksum {
        ChecksumType::NoChecksum => 0,
        ChecksumType::Crc32 => {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(payload);
            hasher.update(&[type_byte]);
            mask_crc(hasher.finalize())
        }
        ChecksumType::XxHash => {
            let mut hasher = xxhash_rust::xxh32::Xxh32::new(0);
            hasher.update(payload);
            hasher.update(&[type_byte]);
            hasher.digest()
        }
    }
}

/// Pointer to a block: offset and payload size (trailer excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockHandle {
    /// Offset of the block in the file
    pub offset: u64,
    /// Size of the block payload in bytes
    pub size: u64,
}

impl BlockHandle {
    /// Upper bound of an encoded handle: two varint64s.
    pub const MAX_ENCODED_LENGTH: usize = 20;

    /// The `{0, 0}` sentinel.
    pub const NULL: BlockHandle = BlockHandle { offset: 0, size: 0 };

    /// Create a new BlockHandle
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// True for the null sentinel.
    pub fn is_null(&self) -> bool {
        self.offset == 0 && self.size == 0
    }

    /// Appends the varint encoding.
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    /// Varint encoding as a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::MAX_ENCODED_LENGTH);
        self.encode_to(&mut buf);
        buf
    }

    /// Decodes a handle from the front of a cursor slice.
    pub fn decode_from(src: &mut &[u8]) -> Result<Self> {
        let offset = get_varint64(src).map_err(|_| Error::corruption("bad block handle"))?;
        let size = get_varint64(src).map_err(|_| Error::corruption("bad block handle"))?;
        Ok(Self { offset, size })
    }

    /// Decodes a handle that must fill `data` from the start.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = data;
        Self::decode_from(&mut cursor)
    }

    /// Offset just past the block's trailer.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.size + BLOCK_TRAILER_SIZE as u64
    }

    /// Fails unless the block and its trailer end at or before `file_size`.
    pub fn check_within(&self, file_size: u64) -> Result<()> {
        let end = self
            .size
            .checked_add(BLOCK_TRAILER_SIZE as u64)
            .and_then(|n| self.offset.checked_add(n));
        match end {
            Some(end) if end <= file_size => Ok(()),
            _ => Err(Error::corruption(format!(
                "block handle (offset {}, size {}) past end of file ({} bytes)",
                self.offset, self.size, file_size
            ))),
        }
    }
}

/// The fixed-size trailer of a table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Table magic number; selects the encoding.
    pub table_magic_number: u64,
    /// Format version (0 for legacy footers).
    pub format_version: u32,
    /// Checksum algorithm of every block in the file.
    pub checksum: ChecksumType,
    /// Handle to the meta-index block.
    pub metaindex_handle: BlockHandle,
    /// Handle to the (top-level) index block.
    pub index_handle: BlockHandle,
}

impl Footer {
    /// Size of a legacy footer.
    pub const LEGACY_ENCODED_LENGTH: usize = 2 * BlockHandle::MAX_ENCODED_LENGTH + 8;
    /// Size of a current footer.
    pub const NEW_ENCODED_LENGTH: usize = 1 + 2 * BlockHandle::MAX_ENCODED_LENGTH + 4 + 8;
    /// Largest footer; readers fetch this many trailing bytes.
    pub const MAX_ENCODED_LENGTH: usize = Self::NEW_ENCODED_LENGTH;

    /// Footer for a file written with `format_version`. Version 0 selects
    /// the legacy encoding, which implies CRC checksums.
    pub fn new(
        format_version: u32,
        checksum: ChecksumType,
        metaindex_handle: BlockHandle,
        index_handle: BlockHandle,
    ) -> Self {
        let legacy = format_version == 0;
        Self {
            table_magic_number: if legacy {
                LEGACY_BLOCK_BASED_TABLE_MAGIC_NUMBER
            } else {
                BLOCK_BASED_TABLE_MAGIC_NUMBER
            },
            format_version,
            checksum: if legacy { ChecksumType::Crc32 } else { checksum },
            metaindex_handle,
            index_handle,
        }
    }

    fn is_legacy(&self) -> bool {
        self.table_magic_number == LEGACY_BLOCK_BASED_TABLE_MAGIC_NUMBER
    }

    /// Encoded length of this footer.
    pub fn encoded_length(&self) -> usize {
        if self.is_legacy() {
            Self::LEGACY_ENCODED_LENGTH
        } else {
            Self::NEW_ENCODED_LENGTH
        }
    }

    /// Encodes the footer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_length());
        if self.is_legacy() {
            self.metaindex_handle.encode_to(&mut buf);
            self.index_handle.encode_to(&mut buf);
            buf.resize(2 * BlockHandle::MAX_ENCODED_LENGTH, 0);
        } else {
            buf.push(self.checksum as u8);
            self.metaindex_handle.encode_to(&mut buf);
            self.index_handle.encode_to(&mut buf);
            buf.resize(1 + 2 * BlockHandle::MAX_ENCODED_LENGTH, 0);
            put_fixed32(&mut buf, self.format_version);
        }
        put_fixed64(&mut buf, self.table_magic_number);
        debug_assert_eq!(buf.len(), self.encoded_length());
        buf
    }

    /// Decodes a footer from the trailing bytes of a file. `input` may
    /// hold extra leading bytes; the magic number at its end selects the
    /// layout.
    pub fn decode(input: &[u8]) -> Result<Self> {
        if input.len() < Self::LEGACY_ENCODED_LENGTH {
            return Err(Error::corruption("input is too short to be an sstable footer"));
        }
        let magic = decode_fixed64(&input[input.len() - 8..]);

        let (checksum, format_version, mut handles) = match magic {
            LEGACY_BLOCK_BASED_TABLE_MAGIC_NUMBER => {
                let start = input.len() - Self::LEGACY_ENCODED_LENGTH;
                (ChecksumType::Crc32, 0, &input[start..input.len() - 8])
            }
            BLOCK_BASED_TABLE_MAGIC_NUMBER => {
                if input.len() < Self::NEW_ENCODED_LENGTH {
                    return Err(Error::corruption("input is too short to be an sstable footer"));
                }
                let start = input.len() - Self::NEW_ENCODED_LENGTH;
                let checksum = ChecksumType::from_u8(input[start]).ok_or_else(|| {
                    Error::corruption(format!("unknown checksum type {}", input[start]))
                })?;
                let version = decode_fixed32(&input[input.len() - 12..]);
                (checksum, version, &input[start + 1..input.len() - 12])
            }
            other => {
                return Err(Error::corruption(format!(
                    "Bad table magic number: {:#x}",
                    other
                )))
            }
        };

        if format_version > LATEST_FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "unknown table format version {}",
                format_version
            )));
        }

        let metaindex_handle = BlockHandle::decode_from(&mut handles)?;
        let index_handle = BlockHandle::decode_from(&mut handles)?;
        Ok(Self {
            table_magic_number: magic,
            format_version,
            checksum,
            metaindex_handle,
            index_handle,
        })
    }
}

/// Reads and validates the footer of a table file of `file_size` bytes.
/// With `enforce_magic` set, any other magic number is rejected.
pub fn read_footer(
    file: &dyn RandomAccessFile,
    file_size: u64,
    enforce_magic: Option<u64>,
) -> Result<Footer> {
    if file_size < Footer::LEGACY_ENCODED_LENGTH as u64 {
        return Err(Error::corruption(format!(
            "file is too short ({} bytes) to be an sstable",
            file_size
        )));
    }
    let read_offset = file_size.saturating_sub(Footer::MAX_ENCODED_LENGTH as u64);
    let data = file.read(read_offset, (file_size - read_offset) as usize)?;
    if data.len() < Footer::LEGACY_ENCODED_LENGTH {
        return Err(Error::corruption(format!(
            "file is too short ({} bytes) to be an sstable",
            data.len()
        )));
    }

    let footer = Footer::decode(&data)?;
    footer.metaindex_handle.check_within(file_size)?;
    footer.index_handle.check_within(file_size)?;
    if let Some(expected) = enforce_magic {
        if footer.table_magic_number != expected {
            return Err(Error::corruption(format!(
                "Bad table magic number: expected {:#x}, found {:#x}",
                expected, footer.table_magic_number
            )));
        }
    }
    Ok(footer)
}
