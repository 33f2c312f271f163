//! Bloom Filter implementation.
//!
//! A space-efficient probabilistic data structure used to test whether an element
//! is a member of a set. False positive matches are possible, but false negatives are not.

use crate::error::{Error, Result};
use crate::filter::{Filter, FilterBitsBuilder, FilterBitsReader, FilterPolicy};
use crate::util::coding::decode_fixed32;

/// Default bits per key for bloom filter
pub const DEFAULT_BITS_PER_KEY: usize = 10;

/// Seed of the key hash.
const BLOOM_HASH_SEED: u32 = 0xbc9f1d34;

/// Encoded header: num_hashes u32 + num_bits u64.
const HEADER_LEN: usize = 12;

/// Murmur-style 32-bit hash over a byte string.
pub fn hash32(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0xc6a4a793;
    const R: u32 = 24;
    let mut h = seed ^ (data.len() as u32).wrapping_mul(M);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        h = h.wrapping_add(decode_fixed32(chunk));
        h = h.wrapping_mul(M);
        h ^= h >> 16;
    }

    let rest = chunks.remainder();
    if rest.len() == 3 {
        h = h.wrapping_add((rest[2] as u32) << 16);
    }
    if rest.len() >= 2 {
        h = h.wrapping_add((rest[1] as u32) << 8);
    }
    if !rest.is_empty() {
        h = h.wrapping_add(rest[0] as u32);
        h = h.wrapping_mul(M);
        h ^= h >> R;
    }
    h
}

/// Probe positions via double hashing: each probe adds a rotated copy of
/// the hash.
fn probe_positions(key: &[u8], num_hashes: u32, num_bits: usize) -> impl Iterator<Item = usize> {
    let mut h = hash32(key, BLOOM_HASH_SEED);
    let delta = h.rotate_right(17);
    (0..num_hashes).map(move |_| {
        let pos = (h as usize) % num_bits;
        h = h.wrapping_add(delta);
        pos
    })
}

/// Reads `(num_hashes, num_bits)` and checks them against the data length.
fn decode_header(data: &[u8]) -> Result<(u32, usize)> {
    if data.len() < HEADER_LEN {
        return Err(Error::corruption("Bloom filter data too short"));
    }
    let num_hashes = decode_fixed32(data);
    let mut num_bits_raw = [0u8; 8];
    num_bits_raw.copy_from_slice(&data[4..HEADER_LEN]);
    let num_bits = u64::from_le_bytes(num_bits_raw);

    if num_bits == 0 || num_hashes == 0 || num_hashes > 30 {
        return Err(Error::corruption("Bloom filter header invalid"));
    }
    let expected_len = num_bits.div_ceil(8).checked_add(HEADER_LEN as u64);
    if expected_len != Some(data.len() as u64) {
        return Err(Error::corruption("Bloom filter size mismatch"));
    }
    Ok((num_hashes, num_bits as usize))
}

/// BloomFilter provides probabilistic set membership testing.
///
/// # Example
/// ```
/// use aidb_table::filter::{BloomFilter, Filter};
///
/// let mut filter = BloomFilter::new(1000, 0.01); // 1000 keys, 1% false positive rate
/// filter.add(b"key1");
/// filter.add(b"key2");
///
/// assert!(filter.may_contain(b"key1"));
/// assert!(filter.may_contain(b"key2"));
/// ```
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_hashes: u32,
    num_bits: usize,
}

impl BloomFilter {
    /// Create a BloomFilter sized for `expected_keys` at the given false positive rate.
    pub fn new(expected_keys: usize, false_positive_rate: f64) -> Self {
        if expected_keys == 0 {
            return Self::with_bits_and_hashes(64, 1);
        }

        // m = -n * ln(p) / (ln(2)^2)
        let n = expected_keys as f64;
        let p = false_positive_rate.clamp(0.0001, 0.9999);
        let num_bits = ((-n * p.ln() / 2.0_f64.ln().powi(2)).ceil() as usize).max(64);

        // k = (m/n) * ln(2)
        let k = ((num_bits as f64 / n) * 2.0_f64.ln()).ceil() as u32;
        Self::with_bits_and_hashes(num_bits, k.clamp(1, 30))
    }

    /// Create a BloomFilter with a specific number of bits per key.
    pub fn with_bits_per_key(num_keys: usize, bits_per_key: usize) -> Self {
        let num_bits = (num_keys * bits_per_key).max(64);
        // 0.69 ~= ln(2)
        let num_hashes = ((bits_per_key as f64) * 0.69) as u32;
        Self::with_bits_and_hashes(num_bits, num_hashes.clamp(1, 30))
    }

    fn with_bits_and_hashes(num_bits: usize, num_hashes: u32) -> Self {
        Self {
            bits: vec![0u8; num_bits.div_ceil(8)],
            num_hashes,
            num_bits,
        }
    }

    fn probes(&self, key: &[u8]) -> impl Iterator<Item = usize> {
        probe_positions(key, self.num_hashes, self.num_bits)
    }

    /// Tests `key` against an encoded filter in place, without copying its
    /// bit array.
    pub fn encoded_may_contain(data: &[u8], key: &[u8]) -> Result<bool> {
        let (num_hashes, num_bits) = decode_header(data)?;
        let bits = &data[HEADER_LEN..];
        Ok(probe_positions(key, num_hashes, num_bits).all(|pos| bits[pos / 8] & (1 << (pos % 8)) != 0))
    }

    /// Get the size of the filter in bytes.
    pub fn size(&self) -> usize {
        self.bits.len()
    }

    /// Get the number of hash functions used.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Get the number of bits in the filter.
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Theoretical false positive rate `(1 - e^(-kn/m))^k` after `num_keys` inserts.
    pub fn estimated_false_positive_rate(&self, num_keys: usize) -> f64 {
        if num_keys == 0 {
            return 0.0;
        }
        let k = self.num_hashes as f64;
        let exp = (-k * num_keys as f64 / self.num_bits as f64).exp();
        (1.0 - exp).powf(k)
    }
}

impl Filter for BloomFilter {
    fn may_contain(&self, key: &[u8]) -> bool {
        self.probes(key)
            .all(|pos| self.bits[pos / 8] & (1 << (pos % 8)) != 0)
    }

    fn add(&mut self, key: &[u8]) {
        let positions: Vec<usize> = self.probes(key).collect();
        for pos in positions {
            self.bits[pos / 8] |= 1 << (pos % 8);
        }
    }

    /// Format: `[num_hashes: u32][num_bits: u64][bits]`
    fn encode(&self) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(HEADER_LEN + self.bits.len());
        encoded.extend_from_slice(&self.num_hashes.to_le_bytes());
        encoded.extend_from_slice(&(self.num_bits as u64).to_le_bytes());
        encoded.extend_from_slice(&self.bits);
        encoded
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let (num_hashes, num_bits) = decode_header(data)?;
        Ok(Self {
            bits: data[HEADER_LEN..].to_vec(),
            num_hashes,
            num_bits,
        })
    }
}

/// Bloom filter policy with a fixed bits-per-key budget.
#[derive(Debug, Clone)]
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    use_block_based_builder: bool,
}

impl BloomFilterPolicy {
    /// Creates a policy. With `use_block_based_builder` tables get one
    /// filter per data block instead of a full filter.
    pub fn new(bits_per_key: usize, use_block_based_builder: bool) -> Self {
        Self {
            bits_per_key: bits_per_key.max(1),
            use_block_based_builder,
        }
    }

    /// Bits allocated per key.
    pub fn bits_per_key(&self) -> usize {
        self.bits_per_key
    }
}

impl Default for BloomFilterPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BITS_PER_KEY, false)
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &str {
        "aidb.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[Vec<u8>]) -> Vec<u8> {
        let mut filter = BloomFilter::with_bits_per_key(keys.len(), self.bits_per_key);
        for key in keys {
            filter.add(key);
        }
        filter.encode()
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        match BloomFilter::encoded_may_contain(filter, key) {
            Ok(matched) => matched,
            // Unreadable filters must not hide keys.
            Err(_) => true,
        }
    }

    fn bits_builder(&self) -> Option<Box<dyn FilterBitsBuilder>> {
        if self.use_block_based_builder {
            None
        } else {
            Some(Box::new(BloomBitsBuilder {
                bits_per_key: self.bits_per_key,
                keys: Vec::new(),
            }))
        }
    }

    fn bits_reader(&self, contents: &[u8]) -> Box<dyn FilterBitsReader> {
        match BloomFilter::decode(contents) {
            Ok(filter) => Box::new(BloomBitsReader { filter }),
            Err(e) => {
                log::warn!("ignoring unreadable full filter: {}", e);
                Box::new(AlwaysMatch)
            }
        }
    }
}

struct BloomBitsBuilder {
    bits_per_key: usize,
    keys: Vec<Vec<u8>>,
}

impl FilterBitsBuilder for BloomBitsBuilder {
    fn add_key(&mut self, key: &[u8]) {
        if self.keys.last().map(|k| k.as_slice()) != Some(key) {
            self.keys.push(key.to_vec());
        }
    }

    fn num_added(&self) -> usize {
        self.keys.len()
    }

    fn finish(&mut self) -> Vec<u8> {
        let mut filter = BloomFilter::with_bits_per_key(self.keys.len(), self.bits_per_key);
        for key in self.keys.drain(..) {
            filter.add(&key);
        }
        filter.encode()
    }
}

struct BloomBitsReader {
    filter: BloomFilter,
}

impl FilterBitsReader for BloomBitsReader {
    fn may_match(&self, key: &[u8]) -> bool {
        self.filter.may_contain(key)
    }
}

struct AlwaysMatch;

impl FilterBitsReader for AlwaysMatch {
    fn may_match(&self, _key: &[u8]) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bloom_filter_no_false_negatives() {
        let mut filter = BloomFilter::with_bits_per_key(1000, 10);
        let keys: Vec<Vec<u8>> = (0..1000).map(|i| format!("key{}", i).into_bytes()).collect();
        for key in &keys {
            filter.add(key);
        }
        for key in &keys {
            assert!(
                filter.may_contain(key),
                "False negative detected for key: {:?}",
                String::from_utf8_lossy(key)
            );
        }
    }

    #[test]
    fn test_bloom_filter_false_positive_rate() {
        let num_keys = 10000;
        let mut filter = BloomFilter::with_bits_per_key(num_keys, 10);
        for i in 0..num_keys {
            filter.add(format!("key{}", i).as_bytes());
        }

        let test_keys = 10000;
        let false_positives = (num_keys..num_keys + test_keys)
            .filter(|i| filter.may_contain(format!("key{}", i).as_bytes()))
            .count();
        let actual_fp_rate = false_positives as f64 / test_keys as f64;

        assert!(
            actual_fp_rate < 0.02,
            "False positive rate too high: {:.4}",
            actual_fp_rate
        );
    }

    #[test]
    fn test_bloom_filter_encode_decode() {
        let mut filter = BloomFilter::new(100, 0.01);
        filter.add(b"key1");
        filter.add(b"key2");

        let decoded = BloomFilter::decode(&filter.encode()).unwrap();
        assert!(decoded.may_contain(b"key1"));
        assert!(decoded.may_contain(b"key2"));
        assert_eq!(filter.num_hashes(), decoded.num_hashes());
        assert_eq!(filter.num_bits(), decoded.num_bits());
    }

    #[test]
    fn test_bloom_filter_decode_rejects_garbage() {
        assert!(BloomFilter::decode(&[1, 2, 3]).is_err());

        let mut encoded = BloomFilter::new(10, 0.01).encode();
        encoded.pop();
        assert!(BloomFilter::decode(&encoded).unwrap_err().is_corruption());
    }

    #[test]
    fn test_encoded_may_contain_matches_decoded() {
        let mut filter = BloomFilter::with_bits_per_key(200, 10);
        for i in 0..200 {
            filter.add(format!("key{}", i).as_bytes());
        }
        let encoded = filter.encode();
        for i in 0..400 {
            let key = format!("key{}", i);
            assert_eq!(
                BloomFilter::encoded_may_contain(&encoded, key.as_bytes()).unwrap(),
                filter.may_contain(key.as_bytes())
            );
        }
        assert!(BloomFilter::encoded_may_contain(&encoded[..encoded.len() - 1], b"key1").is_err());
    }

    #[test]
    fn test_policy_block_based_and_full() {
        let policy = BloomFilterPolicy::new(10, true);
        assert!(policy.bits_builder().is_none());
        let keys = vec![b"a".to_vec(), b"b".to_vec()];
        let filter = policy.create_filter(&keys);
        assert!(policy.key_may_match(b"a", &filter));
        assert!(policy.key_may_match(b"b", &filter));

        let policy = BloomFilterPolicy::default();
        let mut builder = policy.bits_builder().unwrap();
        builder.add_key(b"x");
        builder.add_key(b"x");
        builder.add_key(b"y");
        assert_eq!(builder.num_added(), 2);
        let reader = policy.bits_reader(&builder.finish());
        assert!(reader.may_match(b"x"));
        assert!(reader.may_match(b"y"));
        assert_eq!(builder.num_added(), 0);

        // Corrupt contents never produce a false negative.
        assert!(policy.bits_reader(b"junk").may_match(b"anything"));
    }

    #[test]
    fn test_hash32_known_shape() {
        assert_eq!(hash32(b"", 0xbc9f1d34), 0xbc9f1d34);
        assert_ne!(hash32(b"a", 0), hash32(b"b", 0));
    }
}
