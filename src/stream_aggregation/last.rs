use super::aggr_outputs::{AggrValue, PushSampleCtx};
use super::flush_ctx::FlushCtx;
use super::PushSample;
use crate::common::types::Label;

/// Keeps the sample with the greatest timestamp. Ties go to the later arrival.
#[derive(Default)]
pub(crate) struct LastAggrValue {
    last: Option<(i64, f64)>,
}

impl AggrValue for LastAggrValue {
    fn push_sample(&mut self, _ctx: &PushSampleCtx, _input_key: &[u8], sample: &PushSample) {
        match self.last {
            Some((timestamp, _)) if sample.timestamp < timestamp => {}
            _ => self.last = Some((sample.timestamp, sample.value)),
        }
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        if let Some((_, value)) = self.last.take() {
            ctx.append_series(labels, "last", value);
        }
    }
}
