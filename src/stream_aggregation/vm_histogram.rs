use std::sync::OnceLock;

const E10_MIN: i32 = -9;
const E10_MAX: i32 = 18;
const BUCKETS_PER_DECIMAL: usize = 18;
const DECIMAL_BUCKETS_COUNT: usize = (E10_MAX - E10_MIN) as usize;
const BUCKETS_COUNT: usize = DECIMAL_BUCKETS_COUNT * BUCKETS_PER_DECIMAL;

type DecimalBucket = [u64; BUCKETS_PER_DECIMAL];

static BUCKET_RANGES: OnceLock<BucketRanges> = OnceLock::new();

struct BucketRanges {
    lower: String,
    upper: String,
    ranges: Vec<String>,
}

fn bucket_ranges() -> &'static BucketRanges {
    BUCKET_RANGES.get_or_init(|| {
        let multiplier = 10_f64.powf(1.0 / BUCKETS_PER_DECIMAL as f64);
        let mut v = 10_f64.powi(E10_MIN);
        let mut start = format_exp(v);
        let mut ranges = Vec::with_capacity(BUCKETS_COUNT);
        for _ in 0..BUCKETS_COUNT {
            v *= multiplier;
            let end = format_exp(v);
            ranges.push(format!("{start}...{end}"));
            start = end;
        }
        BucketRanges {
            lower: format!("0...{}", format_exp(10_f64.powi(E10_MIN))),
            upper: format!("{}...+Inf", format_exp(10_f64.powi(E10_MAX))),
            ranges,
        }
    })
}

/// Formats v with 3 fractional mantissa digits and a signed two-digit exponent, e.g. `1.136e+01`.
pub(super) fn format_exp(v: f64) -> String {
    let s = format!("{v:.3e}");
    let Some((mantissa, exp)) = s.split_once('e') else {
        return s;
    };
    let exp: i32 = exp.parse().unwrap_or_default();
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.abs())
}

/// Log-linear histogram with `vmrange` buckets.
///
/// Each decade between 1e-9 and 1e18 is split into 18 buckets. Values outside that range land in
/// the lower and upper buckets. Negative values and NaN are ignored.
#[derive(Clone)]
pub struct VmHistogram {
    decimal_buckets: Vec<Option<Box<DecimalBucket>>>,
    lower: u64,
    upper: u64,
    sum: f64,
}

impl Default for VmHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl VmHistogram {
    pub fn new() -> Self {
        VmHistogram {
            decimal_buckets: vec![None; DECIMAL_BUCKETS_COUNT],
            lower: 0,
            upper: 0,
            sum: 0.0,
        }
    }

    pub fn reset(&mut self) {
        for db in self.decimal_buckets.iter_mut().flatten() {
            db.fill(0);
        }
        self.lower = 0;
        self.upper = 0;
        self.sum = 0.0;
    }

    pub fn is_empty(&self) -> bool {
        self.lower == 0
            && self.upper == 0
            && self
                .decimal_buckets
                .iter()
                .flatten()
                .all(|db| db.iter().all(|&count| count == 0))
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn update(&mut self, v: f64) {
        if v.is_nan() || v < 0.0 {
            return;
        }
        let bucket_idx = (v.log10() - E10_MIN as f64) * BUCKETS_PER_DECIMAL as f64;
        self.sum += v;
        if bucket_idx < 0.0 {
            self.lower += 1;
        } else if bucket_idx >= BUCKETS_COUNT as f64 {
            self.upper += 1;
        } else {
            let mut idx = bucket_idx as usize;
            // 10^n values belong to the lower bucket, like `le`-based histograms
            if bucket_idx == idx as f64 && idx > 0 {
                idx -= 1;
            }
            let db = self.decimal_buckets[idx / BUCKETS_PER_DECIMAL]
                .get_or_insert_with(|| Box::new([0; BUCKETS_PER_DECIMAL]));
            db[idx % BUCKETS_PER_DECIMAL] += 1;
        }
    }

    /// Adds the bucket counts of src to self.
    pub fn merge(&mut self, src: &VmHistogram) {
        self.lower += src.lower;
        self.upper += src.upper;
        self.sum += src.sum;
        for (dst, src) in self.decimal_buckets.iter_mut().zip(src.decimal_buckets.iter()) {
            let Some(src) = src else {
                continue;
            };
            let dst = dst.get_or_insert_with(|| Box::new([0; BUCKETS_PER_DECIMAL]));
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d += *s;
            }
        }
    }

    /// Calls f for every bucket with a non-zero count, in ascending bucket order.
    pub fn visit_non_zero_buckets<F: FnMut(&str, u64)>(&self, mut f: F) {
        let ranges = bucket_ranges();
        if self.lower > 0 {
            f(&ranges.lower, self.lower);
        }
        for (decimal_idx, db) in self.decimal_buckets.iter().enumerate() {
            let Some(db) = db else {
                continue;
            };
            for (offset, &count) in db.iter().enumerate() {
                if count > 0 {
                    f(&ranges.ranges[decimal_idx * BUCKETS_PER_DECIMAL + offset], count);
                }
            }
        }
        if self.upper > 0 {
            f(&ranges.upper, self.upper);
        }
    }
}
