//! Randomized quiesce duration model.
//!
//! Durations are drawn from a Gaussian centered between the bounds with a
//! deliberately wide spread, then clamped. The clamping piles samples up on the
//! bounds as well as around the center, so the system under test sees very
//! short, very long and typical pauses alike.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Draw one quiesce duration in seconds from `rng`.
///
/// Mean `(min + max) / 2`, standard deviation `3 * sqrt(max - min)`, clamped
/// to `[min, max]`. Callers must ensure `min <= max`.
pub fn next_duration<R: Rng>(rng: &mut R, min: f64, max: f64) -> f64 {
    let mean = (min + max) / 2.0;
    let std_dev = 3.0 * (max - min).sqrt();
    match Normal::new(mean, std_dev) {
        Ok(normal) => normal.sample(rng).clamp(min, max),
        // inverted or non-finite bounds
        Err(_) => mean,
    }
}

/// Per-actor duration source bound to configured bounds.
#[derive(Debug, Clone)]
pub struct DurationModel {
    min: f64,
    max: f64,
    rng: StdRng,
}

impl DurationModel {
    /// Create a model; a seed makes the sequence reproducible, otherwise the
    /// model is seeded from the process-wide RNG.
    pub fn new(min_secs: u64, max_secs: u64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self {
            min: min_secs as f64,
            max: max_secs as f64,
            rng,
        }
    }

    /// Next quiesce duration in seconds.
    pub fn next_duration(&mut self) -> f64 {
        next_duration(&mut self.rng, self.min, self.max)
    }
}
