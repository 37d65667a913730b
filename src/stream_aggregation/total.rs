use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::aggr_outputs::{AggrValue, PushSampleCtx, SharedState};
use super::flush_ctx::FlushCtx;
use super::PushSample;
use crate::common::types::Label;

/// Float64 loses integer precision above 2^53.
const MAX_EXACT_TOTAL: f64 = (1u64 << 53) as f64;

/// Running total and the last value seen per input series, shared by the slots of a group.
#[derive(Default)]
pub(crate) struct TotalSharedState {
    total: f64,
    last_values: HashMap<Vec<u8>, TotalLastValue, ahash::RandomState>,
}

struct TotalLastValue {
    value: f64,
    timestamp: i64,
    delete_deadline: i64,
}

/// Implements total, total_prometheus, increase and increase_prometheus.
///
/// Counter resets are detected per input series: a value lower than the previous one
/// contributes the value itself.
pub(crate) struct TotalAggrValue {
    shared: Arc<Mutex<TotalSharedState>>,
    delta: f64,
    seen: bool,
    reset_total_on_flush: bool,
    keep_first_sample: bool,
}

impl TotalAggrValue {
    pub(crate) fn new(shared: Option<SharedState>, reset_total_on_flush: bool, keep_first_sample: bool) -> Self {
        let shared = match shared {
            Some(SharedState::Total(shared)) => shared,
            _ => Arc::default(),
        };
        TotalAggrValue {
            shared,
            delta: 0.0,
            seen: false,
            reset_total_on_flush,
            keep_first_sample,
        }
    }

    fn suffix(&self) -> &'static str {
        match (self.reset_total_on_flush, self.keep_first_sample) {
            (true, true) => "increase",
            (true, false) => "increase_prometheus",
            (false, true) => "total",
            (false, false) => "total_prometheus",
        }
    }
}

impl AggrValue for TotalAggrValue {
    fn push_sample(&mut self, ctx: &PushSampleCtx, input_key: &[u8], sample: &PushSample) {
        let mut shared = self.shared.lock();
        match shared.last_values.get_mut(input_key) {
            Some(lv) => {
                if sample.timestamp < lv.timestamp {
                    // skip out of order sample
                    return;
                }
                if sample.value >= lv.value {
                    self.delta += sample.value - lv.value;
                } else {
                    // counter reset
                    self.delta += sample.value;
                }
                lv.value = sample.value;
                lv.timestamp = sample.timestamp;
                lv.delete_deadline = ctx.delete_deadline;
            }
            None => {
                if self.keep_first_sample && ctx.now >= ctx.ignore_first_sample_deadline {
                    self.delta += sample.value;
                }
                shared.last_values.insert(
                    input_key.to_vec(),
                    TotalLastValue {
                        value: sample.value,
                        timestamp: sample.timestamp,
                        delete_deadline: ctx.delete_deadline,
                    },
                );
            }
        }
        self.seen = true;
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        let total = {
            let mut shared = self.shared.lock();
            shared
                .last_values
                .retain(|_, lv| lv.delete_deadline >= ctx.flush_timestamp);
            let total = shared.total + self.delta;
            if !self.reset_total_on_flush {
                shared.total = if total.abs() >= MAX_EXACT_TOTAL { 0.0 } else { total };
            }
            total
        };
        self.delta = 0.0;
        if self.seen {
            ctx.append_series(labels, self.suffix(), total);
            self.seen = false;
        }
    }

    fn state(&self) -> Option<SharedState> {
        Some(SharedState::Total(self.shared.clone()))
    }
}
