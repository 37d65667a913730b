use super::aggr_outputs::{AggrValue, PushSampleCtx};
use super::flush_ctx::FlushCtx;
use super::PushSample;
use crate::common::types::Label;

#[derive(Default)]
pub(crate) struct AvgAggrValue {
    sum: f64,
    count: u64,
}

impl AggrValue for AvgAggrValue {
    fn push_sample(&mut self, _ctx: &PushSampleCtx, _input_key: &[u8], sample: &PushSample) {
        self.sum += sample.value;
        self.count += 1;
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        if self.count > 0 {
            let avg = self.sum / self.count as f64;
            ctx.append_series(labels, "avg", avg);
        }
        self.sum = 0.0;
        self.count = 0;
    }
}
