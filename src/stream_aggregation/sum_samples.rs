use super::aggr_outputs::{AggrValue, PushSampleCtx};
use super::flush_ctx::FlushCtx;
use super::PushSample;
use crate::common::types::Label;

#[derive(Default)]
pub(crate) struct SumSamplesAggrValue {
    sum: f64,
    seen: bool,
}

impl AggrValue for SumSamplesAggrValue {
    fn push_sample(&mut self, _ctx: &PushSampleCtx, _input_key: &[u8], sample: &PushSample) {
        self.sum += sample.value;
        self.seen = true;
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        if self.seen {
            ctx.append_series(labels, "sum_samples", self.sum);
        }
        self.sum = 0.0;
        self.seen = false;
    }
}
