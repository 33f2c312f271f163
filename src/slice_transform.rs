//! Prefix extractors used by prefix filters.

/// Maps a user key to the prefix stored in a prefix filter.
pub trait SliceTransform: Send + Sync {
    /// Name persisted in table properties.
    fn name(&self) -> &str;

    /// Extracts the prefix. Only called when `in_domain` is true.
    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8];

    /// Whether `key` has a prefix under this transform.
    fn in_domain(&self, key: &[u8]) -> bool;
}

/// Takes the first `len` bytes of every key that is at least that long.
#[derive(Debug, Clone)]
pub struct FixedPrefixTransform {
    len: usize,
    name: String,
}

impl FixedPrefixTransform {
    /// Creates a fixed-length prefix extractor.
    pub fn new(len: usize) -> Self {
        Self {
            len,
            name: format!("aidb.FixedPrefix.{}", len),
        }
    }
}

impl SliceTransform for FixedPrefixTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        &key[..self.len]
    }

    fn in_domain(&self, key: &[u8]) -> bool {
        key.len() >= self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_prefix() {
        let t = FixedPrefixTransform::new(3);
        assert_eq!(t.name(), "aidb.FixedPrefix.3");
        assert!(t.in_domain(b"abcd"));
        assert!(!t.in_domain(b"ab"));
        assert_eq!(t.transform(b"abcd"), b"abc");
    }
}
