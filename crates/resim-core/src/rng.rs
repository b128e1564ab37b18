//! Deterministic RNG wrapper and seed-derivation helpers.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_distr::StandardNormal;
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

/// Deterministic RNG handle threaded through every selector and operator.
///
/// The handle is a thin wrapper around `StdRng`. A master `seed: u64` must be
/// provided by the caller; there is no process-wide generator. Substreams are
/// derived by hashing `(master_seed, substream_id)` with SipHash-1-3 configured
/// with fixed zero keys, so schedules replay identically across platforms.
#[derive(Debug, Clone)]
pub struct RngHandle {
    rng: StdRng,
}

impl RngHandle {
    /// Creates a new RNG handle from a master seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draws a uniform variate from `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Draws a uniform index from `0..len`. `len` must be positive.
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    /// Draws a standard normal variate.
    pub fn standard_normal(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }

    /// Samples an index with probability proportional to `exp(log_weights[i])`.
    ///
    /// Weights are shifted by their maximum before exponentiation. Returns
    /// `None` when no entry has finite positive mass.
    pub fn log_categorical(&mut self, log_weights: &[f64]) -> Option<usize> {
        let max = log_weights
            .iter()
            .copied()
            .filter(|w| !w.is_nan())
            .fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return None;
        }
        let masses: Vec<f64> = log_weights
            .iter()
            .map(|w| if w.is_nan() { 0.0 } else { (w - max).exp() })
            .collect();
        let total: f64 = masses.iter().sum();
        let mut target = self.uniform() * total;
        for (idx, mass) in masses.iter().enumerate() {
            if target < *mass {
                return Some(idx);
            }
            target -= mass;
        }
        masses.iter().rposition(|mass| *mass > 0.0)
    }
}

impl RngCore for RngHandle {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.rng.try_fill_bytes(dest)
    }
}

/// Derives the deterministic seed for a specific substream.
pub fn derive_substream_seed(master_seed: u64, substream: u64) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write_u64(master_seed);
    hasher.write_u64(substream);
    hasher.finish()
}
