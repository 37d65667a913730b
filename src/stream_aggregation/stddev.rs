use super::aggr_outputs::{AggrValue, PushSampleCtx};
use super::flush_ctx::FlushCtx;
use super::PushSample;
use crate::common::types::Label;

/// Computes stddev or stdvar with Welford's online algorithm.
///
/// See https://en.wikipedia.org/wiki/Algorithms_for_calculating_variance#Welford's_online_algorithm
pub(crate) struct StddevAggrValue {
    count: f64,
    avg: f64,
    q: f64,
    is_stddev: bool,
}

impl StddevAggrValue {
    pub(crate) fn new(is_stddev: bool) -> Self {
        StddevAggrValue {
            count: 0.0,
            avg: 0.0,
            q: 0.0,
            is_stddev,
        }
    }
}

impl AggrValue for StddevAggrValue {
    fn push_sample(&mut self, _ctx: &PushSampleCtx, _input_key: &[u8], sample: &PushSample) {
        self.count += 1.0;
        let avg = self.avg + (sample.value - self.avg) / self.count;
        self.q += (sample.value - self.avg) * (sample.value - avg);
        self.avg = avg;
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        if self.count > 0.0 {
            let variance = self.q / self.count;
            if self.is_stddev {
                ctx.append_series(labels, "stddev", variance.sqrt());
            } else {
                ctx.append_series(labels, "stdvar", variance);
            }
        }
        self.count = 0.0;
        self.avg = 0.0;
        self.q = 0.0;
    }
}
