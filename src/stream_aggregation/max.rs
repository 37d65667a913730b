use super::aggr_outputs::{AggrValue, PushSampleCtx};
use super::flush_ctx::FlushCtx;
use super::PushSample;
use crate::common::types::Label;

#[derive(Default)]
pub(crate) struct MaxAggrValue {
    max: Option<f64>,
}

impl AggrValue for MaxAggrValue {
    fn push_sample(&mut self, _ctx: &PushSampleCtx, _input_key: &[u8], sample: &PushSample) {
        match self.max {
            Some(max) if sample.value <= max => {}
            _ => self.max = Some(sample.value),
        }
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        if let Some(max) = self.max.take() {
            ctx.append_series(labels, "max", max);
        }
    }
}
