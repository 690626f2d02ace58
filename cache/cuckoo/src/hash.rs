//! Candidate slot derivation.
//!
//! Four hash functions derived from one strong hash with distinct
//! per-function seeds. A key's candidate set is the four slot indices they
//! produce; duplicates are possible and harmless.

use ahash::RandomState;

/// Number of candidate slots per key.
pub const NUM_HASHES: usize = 4;

#[derive(Debug)]
pub(crate) struct KeyHasher {
    states: [RandomState; NUM_HASHES],
}

impl KeyHasher {
    pub fn new(base_seed: u64) -> Self {
        let states = std::array::from_fn(|i| {
            let j = i as u64 + 1;
            RandomState::with_seeds(
                base_seed ^ j.wrapping_mul(0x9e37_79b9_7f4a_7c15),
                base_seed.rotate_left((7 * j) as u32),
                base_seed ^ j.wrapping_mul(0xc2b2_ae3d_27d4_eb4f),
                base_seed.wrapping_mul(j | 1),
            )
        });
        Self { states }
    }

    /// Candidate slot indices for `key` in a table of `nitem` slots.
    #[inline]
    pub fn candidates(&self, key: &[u8], nitem: usize) -> [usize; NUM_HASHES] {
        std::array::from_fn(|j| (self.states[j].hash_one(key) % nitem as u64) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_are_deterministic() {
        let a = KeyHasher::new(1);
        let b = KeyHasher::new(1);
        assert_eq!(a.candidates(b"foo", 1024), b.candidates(b"foo", 1024));
    }

    #[test]
    fn test_candidates_within_bounds() {
        let hasher = KeyHasher::new(7);
        for key in [&b"a"[..], b"foo", b"some-much-longer-key-material"] {
            for idx in hasher.candidates(key, 13) {
                assert!(idx < 13);
            }
        }
    }

    #[test]
    fn test_functions_are_independent() {
        // With a large table, the four functions should not all agree for a
        // typical key; that would defeat displacement.
        let hasher = KeyHasher::new(3);
        let cands = hasher.candidates(b"independence", 1 << 20);
        let all_same = cands.iter().all(|&c| c == cands[0]);
        assert!(!all_same);
    }

    #[test]
    fn test_seed_changes_mapping() {
        let a = KeyHasher::new(1);
        let b = KeyHasher::new(2);
        // Not a guarantee for any single key, but overwhelmingly likely
        // across several.
        let differs = [&b"k1"[..], b"k2", b"k3", b"k4"]
            .iter()
            .any(|k| a.candidates(k, 1 << 20) != b.candidates(k, 1 << 20));
        assert!(differs);
    }
}
