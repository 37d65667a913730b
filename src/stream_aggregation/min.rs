use super::aggr_outputs::{AggrValue, PushSampleCtx};
use super::flush_ctx::FlushCtx;
use super::PushSample;
use crate::common::types::Label;

#[derive(Default)]
pub(crate) struct MinAggrValue {
    min: Option<f64>,
}

impl AggrValue for MinAggrValue {
    fn push_sample(&mut self, _ctx: &PushSampleCtx, _input_key: &[u8], sample: &PushSample) {
        match self.min {
            Some(min) if sample.value >= min => {}
            _ => self.min = Some(sample.value),
        }
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        if let Some(min) = self.min.take() {
            ctx.append_series(labels, "min", min);
        }
    }
}
