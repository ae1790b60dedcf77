//! Deterministic seed hierarchy.
//!
//! A master seed expands into one sub-seed per `(purpose, instrument)` pair via
//! BLAKE3. Derivation is hash-based, so sub-seeds do not depend on the order
//! instruments are processed in or on how many threads process them.

use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedHierarchy {
    master_seed: u64,
}

impl SeedHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Sub-seed for one instrument within a named purpose (e.g. `"synthetic"`).
    pub fn sub_seed(&self, purpose: &str, instrument: &str) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(purpose.as_bytes());
        hasher.update(&[0]);
        hasher.update(instrument.as_bytes());
        let hash = hasher.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(word)
    }

    pub fn rng_for(&self, purpose: &str, instrument: &str) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(purpose, instrument))
    }
}
