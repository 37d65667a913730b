use super::aggr_outputs::{AggrValue, PushSampleCtx};
use super::flush_ctx::FlushCtx;
use super::PushSample;
use crate::common::types::Label;

#[derive(Default)]
pub(crate) struct CountSamplesAggrValue {
    count: u64,
}

impl AggrValue for CountSamplesAggrValue {
    fn push_sample(&mut self, _ctx: &PushSampleCtx, _input_key: &[u8], _sample: &PushSample) {
        self.count += 1;
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        if self.count > 0 {
            ctx.append_series(labels, "count_samples", self.count as f64);
        }
        self.count = 0;
    }
}
