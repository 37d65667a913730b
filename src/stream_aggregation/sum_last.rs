use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use xxhash_rust::xxh3::xxh3_64;

use super::aggr_outputs::{AggrValue, PushSampleCtx, SharedState};
use super::flush_ctx::FlushCtx;
use super::PushSample;
use crate::common::types::Label;

#[derive(Default)]
pub(crate) struct SumLastSharedState {
    // input keys are hashed to save memory; collisions are possible but rare
    last_values: HashMap<u64, SumLastValue, ahash::RandomState>,
}

struct SumLastValue {
    value: f64,
    delete_deadline: i64,
}

/// Sums the last value of every live input series in a group.
pub(crate) struct SumLastAggrValue {
    shared: Arc<Mutex<SumLastSharedState>>,
    seen: bool,
    suffix: &'static str,
}

impl SumLastAggrValue {
    pub(crate) fn new(shared: Option<SharedState>, suffix: &'static str) -> Self {
        let shared = match shared {
            Some(SharedState::SumLast(shared)) => shared,
            _ => Arc::default(),
        };
        SumLastAggrValue {
            shared,
            seen: false,
            suffix,
        }
    }
}

impl AggrValue for SumLastAggrValue {
    fn push_sample(&mut self, ctx: &PushSampleCtx, input_key: &[u8], sample: &PushSample) {
        self.shared.lock().last_values.insert(
            xxh3_64(input_key),
            SumLastValue {
                value: sample.value,
                delete_deadline: ctx.delete_deadline,
            },
        );
        self.seen = true;
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        let sum: f64 = {
            let mut shared = self.shared.lock();
            shared
                .last_values
                .retain(|_, v| v.delete_deadline >= ctx.flush_timestamp);
            shared.last_values.values().map(|v| v.value).sum()
        };
        if self.seen {
            ctx.append_series(labels, self.suffix, sum);
            self.seen = false;
        }
    }

    fn state(&self) -> Option<SharedState> {
        Some(SharedState::SumLast(self.shared.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_aggregation::aggr_outputs::test_utils::{flush, push, push_ctx};

    #[test]
    fn test_sum_of_last_values() {
        let mut v = SumLastAggrValue::new(None, "sum_last");
        let ctx = push_ctx(0, 100_000);
        push(&mut v, &ctx, b"a", 1000, 1.0);
        push(&mut v, &ctx, b"a", 2000, 3.0);
        push(&mut v, &ctx, b"b", 1000, 5.0);
        assert_eq!(flush(&mut v, 5000), vec!["foo:1m_sum_last 8"]);
        assert!(flush(&mut v, 10_000).is_empty());

        // the last value of a live series is still part of the sum
        push(&mut v, &ctx, b"b", 11_000, 2.0);
        assert_eq!(flush(&mut v, 15_000), vec!["foo:1m_sum_last 5"]);
    }

    #[test]
    fn test_stale_input_series_are_dropped() {
        let mut v = SumLastAggrValue::new(None, "sum_series");
        push(&mut v, &push_ctx(0, 1500), b"a", 1000, 1.0);
        push(&mut v, &push_ctx(0, 100_000), b"b", 1000, 5.0);
        assert_eq!(flush(&mut v, 1000), vec!["foo:1m_sum_series 6"]);

        push(&mut v, &push_ctx(2000, 100_000), b"b", 2000, 4.0);
        assert_eq!(flush(&mut v, 3000), vec!["foo:1m_sum_series 4"]);
        assert_eq!(v.shared.lock().last_values.len(), 1);
    }
}
