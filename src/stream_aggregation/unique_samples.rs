use std::collections::HashSet;

use super::aggr_outputs::{AggrValue, PushSampleCtx};
use super::flush_ctx::FlushCtx;
use super::PushSample;
use crate::common::types::Label;

/// Counts distinct sample values. Values are compared by their bit patterns.
#[derive(Default)]
pub(crate) struct UniqueSamplesAggrValue {
    samples: HashSet<u64, ahash::RandomState>,
}

impl AggrValue for UniqueSamplesAggrValue {
    fn push_sample(&mut self, _ctx: &PushSampleCtx, _input_key: &[u8], sample: &PushSample) {
        self.samples.insert(sample.value.to_bits());
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        if !self.samples.is_empty() {
            ctx.append_series(labels, "unique_samples", self.samples.len() as f64);
            self.samples.clear();
        }
    }
}
