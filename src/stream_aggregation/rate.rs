use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::aggr_outputs::{AggrValue, PushSampleCtx, SharedState};
use super::flush_ctx::FlushCtx;
use super::PushSample;
use crate::common::types::Label;

/// The last sample of each input series as of the previous flush.
#[derive(Default)]
pub(crate) struct RateSharedState {
    prev: HashMap<Vec<u8>, RatePrevValue, ahash::RandomState>,
}

struct RatePrevValue {
    timestamp: i64,
    value: f64,
    delete_deadline: i64,
}

struct RateWindowValue {
    first_timestamp: i64,
    first_value: f64,
    timestamp: i64,
    value: f64,
    increase: f64,
    delete_deadline: i64,
}

/// Implements rate_sum and rate_avg.
///
/// The per-series rate covers the time between the last sample of the previous window
/// (or the first sample of this one) and the last sample of this window.
pub(crate) struct RateAggrValue {
    shared: Arc<Mutex<RateSharedState>>,
    windows: HashMap<Vec<u8>, RateWindowValue, ahash::RandomState>,
    is_avg: bool,
}

impl RateAggrValue {
    pub(crate) fn new(shared: Option<SharedState>, is_avg: bool) -> Self {
        let shared = match shared {
            Some(SharedState::Rate(shared)) => shared,
            _ => Arc::default(),
        };
        RateAggrValue {
            shared,
            windows: HashMap::default(),
            is_avg,
        }
    }

    fn suffix(&self) -> &'static str {
        if self.is_avg {
            "rate_avg"
        } else {
            "rate_sum"
        }
    }
}

fn counter_increase(prev: f64, value: f64) -> f64 {
    if value >= prev {
        value - prev
    } else {
        value
    }
}

impl AggrValue for RateAggrValue {
    fn push_sample(&mut self, ctx: &PushSampleCtx, input_key: &[u8], sample: &PushSample) {
        match self.windows.get_mut(input_key) {
            Some(w) => {
                if sample.timestamp < w.timestamp {
                    // skip out of order sample
                    return;
                }
                w.increase += counter_increase(w.value, sample.value);
                w.value = sample.value;
                w.timestamp = sample.timestamp;
                w.delete_deadline = ctx.delete_deadline;
            }
            None => {
                self.windows.insert(
                    input_key.to_vec(),
                    RateWindowValue {
                        first_timestamp: sample.timestamp,
                        first_value: sample.value,
                        timestamp: sample.timestamp,
                        value: sample.value,
                        increase: 0.0,
                        delete_deadline: ctx.delete_deadline,
                    },
                );
            }
        }
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        let mut shared = self.shared.lock();
        let mut rate = 0.0;
        let mut count_series = 0;
        for (key, w) in self.windows.drain() {
            let mut increase = w.increase;
            let start = match shared.prev.get(&key) {
                Some(prev) if w.first_timestamp > prev.timestamp => {
                    increase += counter_increase(prev.value, w.first_value);
                    prev.timestamp
                }
                _ => w.first_timestamp,
            };
            if w.timestamp > start {
                rate += increase * 1000.0 / (w.timestamp - start) as f64;
                count_series += 1;
            }
            shared.prev.insert(
                key,
                RatePrevValue {
                    timestamp: w.timestamp,
                    value: w.value,
                    delete_deadline: w.delete_deadline,
                },
            );
        }
        shared
            .prev
            .retain(|_, prev| prev.delete_deadline >= ctx.flush_timestamp);
        drop(shared);

        if count_series > 0 {
            if self.is_avg {
                rate /= count_series as f64;
            }
            ctx.append_series(labels, self.suffix(), rate);
        }
    }

    fn state(&self) -> Option<SharedState> {
        Some(SharedState::Rate(self.shared.clone()))
    }
}
