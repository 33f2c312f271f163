//! # Internal Key Format
//!
//! Keys stored in a table are internal keys: the user key followed by an
//! 8-byte little-endian trailer packing the sequence number and value type.
//!
//! ```text
//! InternalKey:
//!   [user_key: bytes] [(sequence << 8) | type: fixed64]
//! ```
//!
//! InternalKeys are ordered by user key ascending, then sequence descending,
//! then type descending, so the newest entry for a user key comes first.

use crate::error::{Error, Result};
use crate::util::coding::{decode_fixed64, put_fixed64};

/// Length of the sequence/type trailer.
pub const INTERNAL_KEY_TRAILER_LEN: usize = 8;

/// Largest sequence number that fits beside the type byte.
pub const MAX_SEQUENCE_NUMBER: u64 = (1 << 56) - 1;

/// The type of an entry in a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// A tombstone for a single key.
    Deletion = 0x0,
    /// A normal value.
    Value = 0x1,
    /// A merge operand.
    Merge = 0x2,
    /// A tombstone that only cancels one put.
    SingleDeletion = 0x7,
    /// A range tombstone; the value holds the exclusive end key.
    RangeDeletion = 0xF,
}

/// Type used when building a seek key; sorts before every real entry with
/// the same user key and sequence.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::RangeDeletion;

impl ValueType {
    /// Converts a u8 to a ValueType.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(ValueType::Deletion),
            0x1 => Some(ValueType::Value),
            0x2 => Some(ValueType::Merge),
            0x7 => Some(ValueType::SingleDeletion),
            0xF => Some(ValueType::RangeDeletion),
            _ => None,
        }
    }

    /// Converts the ValueType to a u8.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for the point tombstone types.
    pub fn is_deletion(self) -> bool {
        matches!(self, ValueType::Deletion | ValueType::SingleDeletion)
    }
}

/// Packs a sequence number and type into the trailer value.
pub fn pack_sequence_and_type(sequence: u64, value_type: ValueType) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE_NUMBER);
    (sequence << 8) | value_type.as_u8() as u64
}

/// A borrowed view of an encoded internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    /// The user portion of the key.
    pub user_key: &'a [u8],
    /// Sequence number.
    pub sequence: u64,
    /// Entry type.
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    /// Parses an encoded internal key.
    pub fn parse(internal_key: &'a [u8]) -> Result<Self> {
        if internal_key.len() < INTERNAL_KEY_TRAILER_LEN {
            return Err(Error::corruption(format!(
                "internal key too short: {} bytes",
                internal_key.len()
            )));
        }
        let split = internal_key.len() - INTERNAL_KEY_TRAILER_LEN;
        let packed = decode_fixed64(&internal_key[split..]);
        let value_type = ValueType::from_u8((packed & 0xff) as u8).ok_or_else(|| {
            Error::corruption(format!("unknown value type {:#x}", packed & 0xff))
        })?;
        Ok(Self {
            user_key: &internal_key[..split],
            sequence: packed >> 8,
            value_type,
        })
    }
}

/// Returns the user key portion of an encoded internal key.
///
/// Keys shorter than the trailer are returned unchanged.
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    internal_key
        .len()
        .checked_sub(INTERNAL_KEY_TRAILER_LEN)
        .map_or(internal_key, |split| &internal_key[..split])
}

/// An owned, encoded internal key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InternalKey {
    rep: Vec<u8>,
}

impl InternalKey {
    /// Creates a new InternalKey.
    ///
    /// # Example
    ///
    /// ```rust
    /// use aidb_table::key::{InternalKey, ValueType};
    ///
    /// let key = InternalKey::new(b"user_key", 42, ValueType::Value);
    /// assert_eq!(key.user_key(), b"user_key");
    /// ```
    pub fn new(user_key: &[u8], sequence: u64, value_type: ValueType) -> Self {
        let mut rep = Vec::with_capacity(user_key.len() + INTERNAL_KEY_TRAILER_LEN);
        rep.extend_from_slice(user_key);
        put_fixed64(&mut rep, pack_sequence_and_type(sequence, value_type));
        Self { rep }
    }

    /// A key that sorts before every entry for `user_key` visible at `sequence`.
    pub fn for_seek(user_key: &[u8], sequence: u64) -> Self {
        Self::new(user_key, sequence, VALUE_TYPE_FOR_SEEK)
    }

    /// Wraps already-encoded bytes.
    pub fn from_encoded(rep: Vec<u8>) -> Self {
        Self { rep }
    }

    /// Returns the user key.
    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.rep)
    }

    /// Returns the encoded form.
    pub fn encode(&self) -> &[u8] {
        &self.rep
    }

    /// Consumes the key, returning the encoded form.
    pub fn into_encoded(self) -> Vec<u8> {
        self.rep
    }
}
