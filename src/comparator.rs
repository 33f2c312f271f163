//! Key ordering.
//!
//! A [`Comparator`] defines the total order of keys in a table and knows how
//! to produce short keys that still separate two adjacent blocks. The table
//! format stores internal keys, ordered by [`InternalKeyComparator`] on top
//! of a user comparator.

use crate::key::{
    extract_user_key, pack_sequence_and_type, INTERNAL_KEY_TRAILER_LEN, MAX_SEQUENCE_NUMBER,
    VALUE_TYPE_FOR_SEEK,
};
use crate::util::coding::{decode_fixed64, put_fixed64};
use std::cmp::Ordering;
use std::sync::Arc;

/// A total order over byte keys.
pub trait Comparator: Send + Sync {
    /// Three-way comparison.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Name persisted in table properties; readers refuse nothing based on it
    /// but tools use it to detect mismatched orderings.
    fn name(&self) -> &str;

    /// Shortens `start` in place to a key in `[start, limit)`.
    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]);

    /// Shortens `key` in place to a key `>= key`.
    fn find_short_successor(&self, key: &mut Vec<u8>);
}

/// Lexicographic byte order.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &str {
        "leveldb.BytewiseComparator"
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let min_len = start.len().min(limit.len());
        let diff_index = start
            .iter()
            .zip(limit.iter())
            .take_while(|(a, b)| a == b)
            .count();

        if diff_index >= min_len {
            // One key is a prefix of the other.
            return;
        }

        let diff_byte = start[diff_index];
        if diff_byte < 0xff && diff_byte + 1 < limit[diff_index] {
            start[diff_index] += 1;
            start.truncate(diff_index + 1);
            debug_assert_eq!(self.compare(start, limit), Ordering::Less);
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        if let Some(pos) = key.iter().position(|&b| b != 0xff) {
            key[pos] += 1;
            key.truncate(pos + 1);
        }
        // All 0xff: leave it alone.
    }
}

/// Orders internal keys: user key ascending via the user comparator, then
/// the packed sequence/type trailer descending.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn Comparator>,
}

impl std::fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalKeyComparator")
            .field("user", &self.user.name())
            .finish()
    }
}

impl Default for InternalKeyComparator {
    fn default() -> Self {
        Self::new(Arc::new(BytewiseComparator))
    }
}

impl InternalKeyComparator {
    /// Wraps a user comparator.
    pub fn new(user: Arc<dyn Comparator>) -> Self {
        Self { user }
    }

    /// The wrapped user comparator.
    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user
    }

    fn trailer(key: &[u8]) -> u64 {
        if key.len() < INTERNAL_KEY_TRAILER_LEN {
            return 0;
        }
        decode_fixed64(&key[key.len() - INTERNAL_KEY_TRAILER_LEN..])
    }
}

impl Comparator for InternalKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user
            .compare(extract_user_key(a), extract_user_key(b))
            .then_with(|| Self::trailer(b).cmp(&Self::trailer(a)))
    }

    fn name(&self) -> &str {
        self.user.name()
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let user_start = extract_user_key(start);
        let user_limit = extract_user_key(limit);
        let mut tmp = user_start.to_vec();
        self.user.find_shortest_separator(&mut tmp, user_limit);
        if tmp.len() < user_start.len()
            && self.user.compare(user_start, &tmp) == Ordering::Less
        {
            // The user key got shorter but physically larger; the earliest
            // trailer keeps it ahead of every real entry for that user key.
            put_fixed64(
                &mut tmp,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(start, &tmp), Ordering::Less);
            debug_assert_eq!(self.compare(&tmp, limit), Ordering::Less);
            *start = tmp;
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let user_key = extract_user_key(key);
        let mut tmp = user_key.to_vec();
        self.user.find_short_successor(&mut tmp);
        if tmp.len() < user_key.len() && self.user.compare(user_key, &tmp) == Ordering::Less {
            put_fixed64(
                &mut tmp,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(key, &tmp), Ordering::Less);
            *key = tmp;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{InternalKey, ValueType};

    #[test]
    fn test_bytewise_separator() {
        let cmp = BytewiseComparator;

        let mut start = b"abcdefg".to_vec();
        cmp.find_shortest_separator(&mut start, b"abzz");
        assert_eq!(start, b"abd");

        // Adjacent bytes cannot be shortened.
        let mut start = b"abc1".to_vec();
        cmp.find_shortest_separator(&mut start, b"abc2");
        assert_eq!(start, b"abc1");

        // Prefix relationship leaves the key alone.
        let mut start = b"abc".to_vec();
        cmp.find_shortest_separator(&mut start, b"abcdef");
        assert_eq!(start, b"abc");
    }

    #[test]
    fn test_bytewise_successor() {
        let cmp = BytewiseComparator;
        let mut key = b"\xff\xffabc".to_vec();
        cmp.find_short_successor(&mut key);
        assert_eq!(key, b"\xff\xffb");

        let mut key = b"\xff\xff".to_vec();
        cmp.find_short_successor(&mut key);
        assert_eq!(key, b"\xff\xff");
    }

    #[test]
    fn test_internal_key_ordering() {
        let icmp = InternalKeyComparator::default();
        let a = InternalKey::new(b"a", 100, ValueType::Value);
        let b = InternalKey::new(b"b", 1, ValueType::Value);
        let a_old = InternalKey::new(b"a", 50, ValueType::Value);
        let a_del = InternalKey::new(b"a", 100, ValueType::Deletion);

        assert_eq!(icmp.compare(a.encode(), b.encode()), Ordering::Less);
        assert_eq!(icmp.compare(a.encode(), a_old.encode()), Ordering::Less);
        assert_eq!(icmp.compare(a.encode(), a_del.encode()), Ordering::Less);
        assert_eq!(icmp.compare(a.encode(), a.encode()), Ordering::Equal);
    }

    #[test]
    fn test_internal_separator_stays_between_keys() {
        let icmp = InternalKeyComparator::default();
        let start = InternalKey::new(b"foobar", 100, ValueType::Value);
        let limit = InternalKey::new(b"hello", 200, ValueType::Value);

        let mut sep = start.encode().to_vec();
        icmp.find_shortest_separator(&mut sep, limit.encode());
        assert_eq!(extract_user_key(&sep), b"g");
        assert_eq!(icmp.compare(start.encode(), &sep), Ordering::Less);
        assert_eq!(icmp.compare(&sep, limit.encode()), Ordering::Less);

        // Same user key: no change.
        let limit = InternalKey::new(b"foobar", 99, ValueType::Value);
        let mut sep = start.encode().to_vec();
        icmp.find_shortest_separator(&mut sep, limit.encode());
        assert_eq!(sep, start.encode());
    }
}
