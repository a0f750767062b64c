//! Probabilistic set membership summary (component A).
//!
//! Fixed-size bit array with `k` hash functions derived from a single keyed
//! hash by double-hashing, sized so a serialized filter fits in a single
//! UDP-safe datagram.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Serialized filters must fit in this many bytes (payload budget minus
/// room for the rest of a SUMMARY packet's framing).
pub const UDP_BUDGET_BYTES: usize = 500;

/// Header is `[m:u32][k:u16]`, 6 bytes, little-endian.
const HEADER_BYTES: usize = 6;

/// A Bloom filter over 16-byte event ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomFilter {
    m: u32,
    k: u16,
    bits: Vec<u8>,
    added_count: u64,
}

impl BloomFilter {
    /// Build a filter with an explicit bit-length and hash count.
    pub fn new(m: u32, k: u16) -> Self {
        let byte_len = ((m as usize) + 7) / 8;
        Self {
            m,
            k,
            bits: vec![0u8; byte_len],
            added_count: 0,
        }
    }

    /// A filter whose serialized form fits in [`UDP_BUDGET_BYTES`], sized
    /// for roughly `expected_items` with a reasonable false-positive rate.
    pub fn udp_optimal(expected_items: usize) -> Self {
        let max_bits = ((UDP_BUDGET_BYTES - HEADER_BYTES) * 8) as u32;
        let expected_items = expected_items.max(1) as f64;
        // m = -n*ln(p) / (ln(2)^2), aim for p ~ 0.01, then clamp to budget.
        let ideal_m = (-(expected_items) * 0.01_f64.ln() / (2f64.ln().powi(2))).ceil();
        let m = (ideal_m as u32).clamp(64, max_bits);
        let k = ((m as f64 / expected_items) * 2f64.ln()).round().clamp(1.0, 16.0) as u16;
        Self::new(m, k.max(1))
    }

    pub fn m(&self) -> u32 {
        self.m
    }

    pub fn k(&self) -> u16 {
        self.k
    }

    pub fn added_count(&self) -> u64 {
        self.added_count
    }

    fn bit_indices(&self, id: &[u8; 16]) -> Vec<u32> {
        let h1 = blake3_u64(id, 0);
        let h2 = blake3_u64(id, 1);
        (0..self.k as u64)
            .map(|i| (h1.wrapping_add(i.wrapping_mul(h2)) % self.m as u64) as u32)
            .collect()
    }

    fn set_bit(&mut self, idx: u32) {
        let byte = (idx / 8) as usize;
        let bit = idx % 8;
        self.bits[byte] |= 1 << bit;
    }

    fn get_bit(&self, idx: u32) -> bool {
        let byte = (idx / 8) as usize;
        let bit = idx % 8;
        (self.bits[byte] >> bit) & 1 == 1
    }

    /// Insert an id. No-op if already present.
    pub fn add(&mut self, id: &[u8; 16]) {
        for idx in self.bit_indices(id) {
            self.set_bit(idx);
        }
        self.added_count += 1;
    }

    /// Test set membership. May return false positives, never false negatives.
    pub fn test(&self, id: &[u8; 16]) -> bool {
        self.bit_indices(id).into_iter().all(|idx| self.get_bit(idx))
    }

    /// Bitwise OR with another filter. Requires identical `(m, k)`.
    pub fn merge(&self, other: &BloomFilter) -> Result<BloomFilter> {
        if self.m != other.m || self.k != other.k {
            return Err(Error::ShapeMismatch(format!(
                "self=({}, {}) other=({}, {})",
                self.m, self.k, other.m, other.k
            )));
        }
        let bits = self
            .bits
            .iter()
            .zip(other.bits.iter())
            .map(|(a, b)| a | b)
            .collect();
        Ok(BloomFilter {
            m: self.m,
            k: self.k,
            bits,
            added_count: self.added_count.max(other.added_count),
        })
    }

    /// Union `other` into `self` in place. Requires identical `(m, k)`.
    pub fn union_in_place(&mut self, other: &BloomFilter) -> Result<()> {
        let merged = self.merge(other)?;
        *self = merged;
        Ok(())
    }

    /// `[m:u32][k:u16][bits...]`, little-endian header.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_BYTES + self.bits.len());
        out.extend_from_slice(&self.m.to_le_bytes());
        out.extend_from_slice(&self.k.to_le_bytes());
        out.extend_from_slice(&self.bits);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_BYTES {
            return Err(Error::MalformedBloom("too short for header".into()));
        }
        let m = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let k = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        if m == 0 || k == 0 {
            return Err(Error::MalformedBloom("m and k must be nonzero".into()));
        }
        let expected_byte_len = ((m as usize) + 7) / 8;
        let bits = &bytes[HEADER_BYTES..];
        if bits.len() != expected_byte_len {
            return Err(Error::MalformedBloom(format!(
                "expected {} bit bytes, got {}",
                expected_byte_len,
                bits.len()
            )));
        }
        Ok(Self {
            m,
            k,
            bits: bits.to_vec(),
            added_count: 0,
        })
    }

    /// A copy truncated/resized to fit the UDP budget, used when the local
    /// cumulative filter has grown past what a single datagram carries.
    pub fn transmission_view(&self) -> BloomFilter {
        let max_bits = ((UDP_BUDGET_BYTES - HEADER_BYTES) * 8) as u32;
        if self.m <= max_bits {
            return self.clone();
        }
        // Fold the larger filter down by OR-ing halves together until it fits.
        // This is a lossy downsizing (more false positives) but preserves the
        // no-false-negatives property for membership tests against the folded form.
        let mut folded = self.clone();
        while folded.m > max_bits {
            folded = fold_half(&folded);
        }
        folded
    }

    /// Reporting bucket for the false-positive rate, per the stepped scale
    /// `{0.01, 0.05, 0.20, 0.5, >=0.9}`.
    pub fn estimated_fpr_bucket(&self) -> f64 {
        let fpr = self.estimated_fpr();
        const BUCKETS: [f64; 5] = [0.01, 0.05, 0.20, 0.5, 0.9];
        for b in BUCKETS {
            if fpr <= b {
                return b;
            }
        }
        1.0
    }

    /// `(1 - e^{-k*n/m})^k`.
    pub fn estimated_fpr(&self) -> f64 {
        let k = self.k as f64;
        let n = self.added_count as f64;
        let m = self.m as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }
}

/// A [`BloomFilter`] that is only ever grown: the device's "everything I've
/// ever stored" summary. Never reset or shrunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CumulativeBloom {
    inner: BloomFilter,
}

impl CumulativeBloom {
    pub fn new(m: u32, k: u16) -> Self {
        Self {
            inner: BloomFilter::new(m, k),
        }
    }

    pub fn udp_optimal(expected_items: usize) -> Self {
        Self {
            inner: BloomFilter::udp_optimal(expected_items),
        }
    }

    pub fn add(&mut self, id: &[u8; 16]) {
        self.inner.add(id);
    }

    pub fn test(&self, id: &[u8; 16]) -> bool {
        self.inner.test(id)
    }

    /// Union another filter in; cumulative filters never forget a bit once set.
    pub fn union_in_place(&mut self, other: &BloomFilter) -> Result<()> {
        self.inner.union_in_place(other)
    }

    /// The same filter, possibly folded down to fit the UDP budget.
    pub fn transmission_view(&self) -> BloomFilter {
        self.inner.transmission_view()
    }

    pub fn inner(&self) -> &BloomFilter {
        &self.inner
    }
}

fn fold_half(filter: &BloomFilter) -> BloomFilter {
    let half_m = filter.m / 2;
    let half_bytes = ((half_m as usize) + 7) / 8;
    let mut bits = vec![0u8; half_bytes];
    for i in 0..filter.m {
        let folded_idx = i % half_m;
        let byte = (i / 8) as usize;
        let bit = i % 8;
        if (filter.bits[byte] >> bit) & 1 == 1 {
            let fb = (folded_idx / 8) as usize;
            let fbit = folded_idx % 8;
            bits[fb] |= 1 << fbit;
        }
    }
    BloomFilter {
        m: half_m,
        k: filter.k,
        bits,
        added_count: filter.added_count,
    }
}

fn blake3_u64(id: &[u8; 16], salt: u8) -> u64 {
    let mut input = [0u8; 17];
    input[..16].copy_from_slice(id);
    input[16] = salt;
    let hash = blake3::hash(&input);
    u64::from_le_bytes(hash.as_bytes()[0..8].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> [u8; 16] {
        [byte; 16]
    }

    #[test]
    fn add_then_test_has_no_false_negatives() {
        let mut bf = BloomFilter::udp_optimal(100);
        for i in 0..50u8 {
            bf.add(&id(i));
        }
        for i in 0..50u8 {
            assert!(bf.test(&id(i)));
        }
    }

    #[test]
    fn absent_item_usually_tests_false() {
        let mut bf = BloomFilter::new(4096, 4);
        bf.add(&id(1));
        assert!(!bf.test(&id(200)));
    }

    #[test]
    fn serialize_roundtrip() {
        let mut bf = BloomFilter::new(2048, 3);
        bf.add(&id(7));
        bf.add(&id(42));
        let bytes = bf.serialize();
        assert!(bytes.len() <= UDP_BUDGET_BYTES);
        let back = BloomFilter::deserialize(&bytes).unwrap();
        assert_eq!(back.m(), bf.m());
        assert_eq!(back.k(), bf.k());
        assert!(back.test(&id(7)));
        assert!(back.test(&id(42)));
    }

    #[test]
    fn deserialize_rejects_short_header() {
        let err = BloomFilter::deserialize(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, Error::MalformedBloom(_)));
    }

    #[test]
    fn deserialize_rejects_wrong_bit_length() {
        let mut bytes = 64u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.push(0); // should be 8 bytes for m=64, only gave 1
        let err = BloomFilter::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, Error::MalformedBloom(_)));
    }

    #[test]
    fn merge_requires_identical_shape() {
        let a = BloomFilter::new(1024, 3);
        let b = BloomFilter::new(2048, 3);
        let err = a.merge(&b).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }

    #[test]
    fn merge_is_union() {
        let mut a = BloomFilter::new(1024, 3);
        let mut b = BloomFilter::new(1024, 3);
        a.add(&id(1));
        b.add(&id(2));
        let merged = a.merge(&b).unwrap();
        assert!(merged.test(&id(1)));
        assert!(merged.test(&id(2)));
    }

    #[test]
    fn cumulative_union_never_forgets() {
        let mut a = BloomFilter::new(1024, 3);
        a.add(&id(1));
        let empty = BloomFilter::new(1024, 3);
        a.union_in_place(&empty).unwrap();
        assert!(a.test(&id(1)));
    }

    #[test]
    fn cumulative_bloom_never_un_sets_a_member() {
        let mut cb = CumulativeBloom::new(1024, 3);
        cb.add(&id(9));
        assert!(cb.test(&id(9)));
        let other = BloomFilter::new(1024, 3);
        cb.union_in_place(&other).unwrap();
        assert!(cb.test(&id(9)));
    }

    #[test]
    fn fpr_matches_standard_formula() {
        let mut bf = BloomFilter::new(1000, 4);
        for i in 0..10u8 {
            bf.add(&id(i));
        }
        let k = 4.0_f64;
        let n = 10.0_f64;
        let m = 1000.0_f64;
        let expected = (1.0 - (-k * n / m).exp()).powf(k);
        assert!((bf.estimated_fpr() - expected).abs() < 1e-12);
    }
}
