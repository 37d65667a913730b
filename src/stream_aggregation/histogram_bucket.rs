use std::sync::Arc;

use parking_lot::Mutex;

use super::aggr_outputs::{AggrValue, PushSampleCtx, SharedState};
use super::flush_ctx::FlushCtx;
use super::vm_histogram::VmHistogram;
use super::PushSample;
use crate::common::types::Label;

/// Emits cumulative `vmrange` bucket counts for the sample values of a group.
pub(crate) struct HistogramBucketAggrValue {
    h: VmHistogram,
    seen: bool,
    total: Arc<Mutex<VmHistogram>>,
}

impl HistogramBucketAggrValue {
    pub(crate) fn new(shared: Option<SharedState>) -> Self {
        let total = match shared {
            Some(SharedState::HistogramBucket(total)) => total,
            _ => Arc::default(),
        };
        HistogramBucketAggrValue {
            h: VmHistogram::new(),
            seen: false,
            total,
        }
    }
}

impl AggrValue for HistogramBucketAggrValue {
    fn push_sample(&mut self, _ctx: &PushSampleCtx, _input_key: &[u8], sample: &PushSample) {
        self.h.update(sample.value);
        self.seen = true;
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        let mut total = self.total.lock();
        total.merge(&self.h);
        self.h.reset();
        if !self.seen {
            return;
        }
        self.seen = false;
        total.visit_non_zero_buckets(|vmrange, count| {
            ctx.append_series_with_extra_label(labels, "histogram_bucket", count as f64, "vmrange", vmrange);
        });
    }

    fn state(&self) -> Option<SharedState> {
        Some(SharedState::HistogramBucket(self.total.clone()))
    }
}
