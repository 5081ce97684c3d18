//! Approximate Message Deduplication
//!
//! Gossip dissemination is idempotent but not free: re-processing a seen
//! message means another full fan-out to the view. The dedup filter is an
//! approximate set over message uuids sized for about a million entries at a
//! small false-positive budget. A false positive silently drops a message,
//! which the protocol tolerates because dissemination is eventually
//! consistent; a false negative merely causes one redundant (idempotent)
//! forward.
//!
//! The set is kept behind the `ApproximateSet` trait so the bloom filter can
//! be swapped for another backing structure without touching the service.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Append-only approximate membership test.
///
/// Implementations must be safe to call from concurrent request handlers.
pub trait ApproximateSet: Send + Sync {
    fn insert(&self, key: &str);
    fn contains(&self, key: &str) -> bool;
}

/// Standard bloom filter over an atomic bit array.
///
/// Bit count and hash count are derived from the requested capacity and
/// false-positive rate. Inserts use `fetch_or`, so no lock is taken on
/// either path.
pub struct BloomSet {
    bits: Vec<AtomicU64>,
    bit_count: u64,
    hash_count: u32,
}

impl BloomSet {
    /// Creates a filter sized for `capacity` entries at false-positive rate
    /// `error_rate` (e.g. 0.0001 for 0.01%).
    pub fn new(capacity: usize, error_rate: f64) -> Self {
        let capacity = capacity.max(1) as f64;
        let error_rate = error_rate.clamp(1e-12, 0.5);

        let ln2 = std::f64::consts::LN_2;
        let bit_count = (-(capacity * error_rate.ln()) / (ln2 * ln2)).ceil() as u64;
        let bit_count = bit_count.max(64);
        let hash_count = ((bit_count as f64 / capacity) * ln2).round().max(1.0) as u32;

        let words = bit_count.div_ceil(64) as usize;
        let mut bits = Vec::with_capacity(words);
        bits.resize_with(words, || AtomicU64::new(0));

        Self {
            bits,
            bit_count,
            hash_count,
        }
    }

    /// Two independent hashes combined via double hashing: bit_i = h1 + i*h2.
    fn hash_pair(key: &str) -> (u64, u64) {
        let mut h1 = DefaultHasher::new();
        key.hash(&mut h1);
        let first = h1.finish();

        let mut h2 = DefaultHasher::new();
        first.hash(&mut h2);
        key.hash(&mut h2);
        let second = h2.finish() | 1;

        (first, second)
    }

    fn bit_index(&self, h1: u64, h2: u64, round: u32) -> (usize, u64) {
        let bit = h1.wrapping_add((round as u64).wrapping_mul(h2)) % self.bit_count;
        ((bit / 64) as usize, 1u64 << (bit % 64))
    }
}

impl ApproximateSet for BloomSet {
    fn insert(&self, key: &str) {
        let (h1, h2) = Self::hash_pair(key);
        for round in 0..self.hash_count {
            let (word, mask) = self.bit_index(h1, h2, round);
            self.bits[word].fetch_or(mask, Ordering::Relaxed);
        }
    }

    fn contains(&self, key: &str) -> bool {
        let (h1, h2) = Self::hash_pair(key);
        for round in 0..self.hash_count {
            let (word, mask) = self.bit_index(h1, h2, round);
            if self.bits[word].load(Ordering::Relaxed) & mask == 0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserted_keys_are_found() {
        let set = BloomSet::new(1000, 0.0001);

        for i in 0..500 {
            set.insert(&format!("msg-{}", i));
        }

        for i in 0..500 {
            assert!(set.contains(&format!("msg-{}", i)));
        }
    }

    #[test]
    fn test_unseen_keys_are_mostly_absent() {
        let set = BloomSet::new(10_000, 0.0001);

        for i in 0..5_000 {
            set.insert(&format!("seen-{}", i));
        }

        let false_positives = (0..5_000)
            .filter(|i| set.contains(&format!("unseen-{}", i)))
            .count();

        // Budget is 0.01%; allow generous slack to keep the test stable.
        assert!(
            false_positives < 50,
            "too many false positives: {}",
            false_positives
        );
    }

    #[test]
    fn test_empty_set_contains_nothing() {
        let set = BloomSet::new(100, 0.01);
        assert!(!set.contains("anything"));
    }
}
