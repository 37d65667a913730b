use super::aggr_outputs::{AggrValue, PushSampleCtx};
use super::fast_histogram::FastHistogram;
use super::flush_ctx::FlushCtx;
use super::PushSample;
use crate::common::types::Label;

pub(crate) struct QuantilesAggrValue {
    h: Option<FastHistogram>,
    phis: Vec<f64>,
}

impl QuantilesAggrValue {
    pub(crate) fn new(phis: Vec<f64>) -> Self {
        QuantilesAggrValue { h: None, phis }
    }
}

impl AggrValue for QuantilesAggrValue {
    fn push_sample(&mut self, _ctx: &PushSampleCtx, _input_key: &[u8], sample: &PushSample) {
        self.h.get_or_insert_with(FastHistogram::new).update(sample.value);
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        let Some(h) = self.h.as_mut() else {
            return;
        };
        if h.is_empty() {
            return;
        }
        let quantiles = h.quantiles(&self.phis);
        h.reset();
        for (phi, quantile) in self.phis.iter().zip(quantiles) {
            let phi_str = format!("{phi}");
            ctx.append_series_with_extra_label(labels, "quantiles", quantile, "quantile", &phi_str);
        }
    }
}
