//! Injectable randomness
//!
//! Everything that jitters, draws a profile, or rolls for a break goes through
//! [`RandomSource`], so tests can pin the sequence and assert exact delays.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A shareable source of uniform random numbers
pub trait RandomSource: Send + Sync {
    /// Returns a value in `[0, 1)`
    fn next_f64(&self) -> f64;

    /// Returns an arbitrary 64-bit value
    fn next_u64(&self) -> u64;

    /// Returns a value in `[low, high)`, or `low` when the range is empty
    fn uniform(&self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        low + (high - low) * self.next_f64()
    }

    /// Returns true with probability `p`
    fn chance(&self, p: f64) -> bool {
        p > 0.0 && self.next_f64() < p
    }

    /// Picks an index with probability proportional to its weight
    ///
    /// Returns `None` when no weight is positive.
    fn weighted_index(&self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
        if total <= 0.0 {
            return None;
        }

        let mut target = self.next_f64() * total;
        let mut last_positive = None;
        for (index, weight) in weights.iter().enumerate() {
            if *weight <= 0.0 {
                continue;
            }
            if target < *weight {
                return Some(index);
            }
            target -= weight;
            last_positive = Some(index);
        }

        // Rounding can leave a sliver past the last bucket
        last_positive
    }

    /// Picks an index in `0..len` uniformly, or `None` when `len` is zero
    fn pick_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(((self.next_f64() * len as f64) as usize).min(len - 1))
    }
}

/// Process-level randomness backed by the thread-local generator
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }

    fn next_u64(&self) -> u64 {
        rand::thread_rng().gen::<u64>()
    }
}

/// Reproducible randomness from a fixed seed
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_f64(&self) -> f64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen::<f64>(),
            Err(poisoned) => poisoned.into_inner().gen::<f64>(),
        }
    }

    fn next_u64(&self) -> u64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen::<u64>(),
            Err(poisoned) => poisoned.into_inner().gen::<u64>(),
        }
    }
}

/// Replays a fixed, cycling sequence of values
///
/// Values are clamped into `[0, 1)`. An empty sequence always yields 0.
#[derive(Debug)]
pub struct SequenceRandom {
    values: Vec<f64>,
    position: AtomicUsize,
}

impl SequenceRandom {
    pub fn new(values: Vec<f64>) -> Self {
        let values = values
            .into_iter()
            .map(|v| v.clamp(0.0, 1.0 - f64::EPSILON))
            .collect();
        Self {
            values,
            position: AtomicUsize::new(0),
        }
    }

    /// A source that always returns the same value
    pub fn constant(value: f64) -> Self {
        Self::new(vec![value])
    }
}

impl RandomSource for SequenceRandom {
    fn next_f64(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let index = self.position.fetch_add(1, Ordering::Relaxed) % self.values.len();
        self.values[index]
    }

    fn next_u64(&self) -> u64 {
        (self.next_f64() * u64::MAX as f64) as u64
    }
}
