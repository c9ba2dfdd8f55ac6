//! Seeded random stream for initialization
//!
//! Every draw of a run comes from one sequential ChaCha8 stream, so the draw
//! order is part of the output contract for a given seed.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub struct InitRng {
    inner: ChaCha8Rng,
}

impl InitRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl RngCore for InitRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.try_fill_bytes(dest)
    }
}

/// Helper functions for common random operations
pub trait RngExt {
    /// Uniform value in `[0, 1)`.
    fn probability(&mut self) -> f64;
    /// Uniform value in `[from, to)`; returns `from` for an empty range.
    fn uniform(&mut self, from: f64, to: f64) -> f64;
    /// Uniform integer in `[0, upper)`; `upper` must be positive.
    fn below(&mut self, upper: u64) -> u64;
}

impl<R: Rng + ?Sized> RngExt for R {
    fn probability(&mut self) -> f64 {
        self.gen::<f64>()
    }

    fn uniform(&mut self, from: f64, to: f64) -> f64 {
        from + (to - from) * self.gen::<f64>()
    }

    fn below(&mut self, upper: u64) -> u64 {
        self.gen_range(0..upper)
    }
}
