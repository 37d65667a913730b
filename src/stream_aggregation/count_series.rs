use std::collections::HashSet;

use xxhash_rust::xxh3::xxh3_64;

use super::aggr_outputs::{AggrValue, PushSampleCtx};
use super::bloom::BloomFilter;
use super::flush_ctx::FlushCtx;
use super::PushSample;
use crate::common::types::Label;

const BLOOM_CAPACITY: usize = 10_000;
const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Counts distinct input series per group.
#[derive(Default)]
pub(crate) struct CountSeriesAggrValue {
    // Hashes of input keys are stored instead of the keys for memory efficiency.
    // Collisions are possible but rare.
    samples: HashSet<u64, ahash::RandomState>,
}

impl AggrValue for CountSeriesAggrValue {
    fn push_sample(&mut self, _ctx: &PushSampleCtx, input_key: &[u8], _sample: &PushSample) {
        self.samples.insert(xxh3_64(input_key));
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        if !self.samples.is_empty() {
            ctx.append_series(labels, "count_series", self.samples.len() as f64);
            self.samples.clear();
        }
    }
}

/// Estimates the number of distinct input series per group with a bloom filter.
///
/// Memory per group stays fixed regardless of cardinality. Series reported as
/// already present by a false positive are not counted.
#[derive(Default)]
pub(crate) struct CountSeriesBloomAggrValue {
    filter: Option<BloomFilter>,
    count: u64,
    seen: bool,
}

impl AggrValue for CountSeriesBloomAggrValue {
    fn push_sample(&mut self, _ctx: &PushSampleCtx, input_key: &[u8], _sample: &PushSample) {
        let filter = self
            .filter
            .get_or_insert_with(|| BloomFilter::new(BLOOM_CAPACITY, BLOOM_FALSE_POSITIVE_RATE));
        if filter.add(xxh3_64(input_key)) {
            self.count += 1;
        }
        self.seen = true;
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        if !self.seen {
            return;
        }
        ctx.append_series(labels, "count_series_bloom", self.count as f64);
        self.count = 0;
        self.seen = false;
        if let Some(filter) = self.filter.as_mut() {
            filter.reset();
        }
    }
}
