use std::cmp::Ordering;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const MAX_SAMPLES: usize = 1000;

/// FastHistogram estimates quantiles over a stream of values using a fixed size reservoir.
///
/// Exact quantiles are returned while fewer than MAX_SAMPLES values were seen.
// https://github.com/valyala/histogram/tree/master
pub struct FastHistogram {
    max: f64,
    min: f64,
    count: u64,
    a: Vec<f64>,
    tmp: Vec<f64>,
    rng: SmallRng,
}

impl Default for FastHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl FastHistogram {
    pub fn new() -> Self {
        FastHistogram {
            max: f64::NEG_INFINITY,
            min: f64::INFINITY,
            count: 0,
            a: Vec::new(),
            tmp: Vec::new(),
            rng: SmallRng::seed_from_u64(1),
        }
    }

    pub fn reset(&mut self) {
        self.max = f64::NEG_INFINITY;
        self.min = f64::INFINITY;
        self.count = 0;
        self.a.clear();
        self.tmp.clear();
        self.rng = SmallRng::seed_from_u64(1);
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn update(&mut self, v: f64) {
        if v > self.max {
            self.max = v;
        }
        if v < self.min {
            self.min = v;
        }

        self.count += 1;
        if self.a.len() < MAX_SAMPLES {
            self.a.push(v);
            return;
        }
        let n = self.rng.gen_range(0..self.count) as usize;
        if n < self.a.len() {
            self.a[n] = v;
        }
    }

    pub fn quantile(&mut self, phi: f64) -> f64 {
        self.sort_samples();
        self.quantile_internal(phi)
    }

    pub fn quantiles(&mut self, phis: &[f64]) -> Vec<f64> {
        self.sort_samples();
        phis.iter().map(|&phi| self.quantile_internal(phi)).collect()
    }

    fn sort_samples(&mut self) {
        self.tmp.clear();
        self.tmp.extend_from_slice(&self.a);
        self.tmp
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    }

    fn quantile_internal(&self, phi: f64) -> f64 {
        if self.tmp.is_empty() || phi.is_nan() {
            return f64::NAN;
        }
        if phi <= 0.0 {
            return self.min;
        }
        if phi >= 1.0 {
            return self.max;
        }
        let idx = (phi * (self.tmp.len() - 1) as f64 + 0.5).floor() as usize;
        if idx >= self.tmp.len() {
            self.tmp[self.tmp.len() - 1]
        } else {
            self.tmp[idx]
        }
    }
}
