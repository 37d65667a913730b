use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use super::aggr_outputs::{AggrValue, PushSampleCtx, SharedState};
use super::flush_ctx::FlushCtx;
use super::utils::decompress_labels;
use super::PushSample;
use crate::common::types::Label;

const BUCKET_LABELS: [&str; 2] = ["vmrange", "le"];

#[derive(Default)]
pub(crate) struct HistogramMergeSharedState {
    inputs: HashMap<Vec<u8>, HistogramMergeInput, ahash::RandomState>,
    totals: BTreeMap<Option<Label>, f64>,
}

struct HistogramMergeInput {
    bucket: Option<Label>,
    value: f64,
    timestamp: i64,
    delete_deadline: i64,
}

/// Merges pre-aggregated histogram bucket counters across the input series of a group.
///
/// Every input series is one bucket counter, identified by its `vmrange` or `le` label.
pub(crate) struct HistogramMergeAggrValue {
    shared: Arc<Mutex<HistogramMergeSharedState>>,
    increases: HashMap<Option<Label>, f64>,
    seen: bool,
}

impl HistogramMergeAggrValue {
    pub(crate) fn new(shared: Option<SharedState>) -> Self {
        let shared = match shared {
            Some(SharedState::HistogramMerge(shared)) => shared,
            _ => Arc::default(),
        };
        HistogramMergeAggrValue {
            shared,
            increases: HashMap::new(),
            seen: false,
        }
    }
}

fn bucket_label(input_key: &[u8]) -> Option<Label> {
    let mut labels = Vec::new();
    decompress_labels(&mut labels, input_key);
    BUCKET_LABELS
        .iter()
        .find_map(|name| labels.iter().find(|label| label.name == *name).cloned())
}

impl AggrValue for HistogramMergeAggrValue {
    fn push_sample(&mut self, ctx: &PushSampleCtx, input_key: &[u8], sample: &PushSample) {
        let mut shared = self.shared.lock();
        let (bucket, increase) = match shared.inputs.get_mut(input_key) {
            Some(input) => {
                if sample.timestamp < input.timestamp {
                    return;
                }
                let increase = if sample.value >= input.value {
                    sample.value - input.value
                } else {
                    sample.value
                };
                input.value = sample.value;
                input.timestamp = sample.timestamp;
                input.delete_deadline = ctx.delete_deadline;
                (input.bucket.clone(), increase)
            }
            None => {
                let bucket = bucket_label(input_key);
                let increase = if ctx.now >= ctx.ignore_first_sample_deadline {
                    sample.value
                } else {
                    0.0
                };
                shared.inputs.insert(
                    input_key.to_vec(),
                    HistogramMergeInput {
                        bucket: bucket.clone(),
                        value: sample.value,
                        timestamp: sample.timestamp,
                        delete_deadline: ctx.delete_deadline,
                    },
                );
                (bucket, increase)
            }
        };
        *self.increases.entry(bucket).or_default() += increase;
        self.seen = true;
    }

    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]) {
        let mut shared = self.shared.lock();
        let HistogramMergeSharedState { inputs, totals } = &mut *shared;
        for (bucket, increase) in self.increases.drain() {
            *totals.entry(bucket).or_default() += increase;
        }

        // compact stale input series and the buckets nobody reports anymore
        inputs.retain(|_, input| input.delete_deadline >= ctx.flush_timestamp);
        let live_buckets: HashSet<&Option<Label>> = inputs.values().map(|input| &input.bucket).collect();
        totals.retain(|bucket, _| live_buckets.contains(bucket));

        if !self.seen {
            return;
        }
        self.seen = false;
        for (bucket, total) in totals.iter() {
            match bucket {
                Some(label) => ctx.append_series_with_extra_label(labels, "histogram_merge", *total, &label.name, &label.value),
                None => ctx.append_series(labels, "histogram_merge", *total),
            }
        }
    }

    fn state(&self) -> Option<SharedState> {
        Some(SharedState::HistogramMerge(self.shared.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::label_compressor::labels_compressor;
    use crate::stream_aggregation::aggr_outputs::test_utils::{flush, push, push_ctx};

    fn input_key(instance: &str, le: &str) -> Vec<u8> {
        let mut key = vec![];
        labels_compressor().compress(&mut key, &[Label::new("instance", instance), Label::new("le", le)]);
        key
    }

    #[test]
    fn test_buckets_are_merged_across_series() {
        let mut v = HistogramMergeAggrValue::new(None);
        let ctx = push_ctx(0, 100_000);
        push(&mut v, &ctx, &input_key("a", "1"), 1000, 3.0);
        push(&mut v, &ctx, &input_key("b", "1"), 1000, 4.0);
        push(&mut v, &ctx, &input_key("a", "+Inf"), 1000, 10.0);
        assert_eq!(
            flush(&mut v, 5000),
            vec![
                r#"foo:1m_histogram_merge{le="+Inf"} 10"#,
                r#"foo:1m_histogram_merge{le="1"} 7"#,
            ]
        );

        // the bucket counter of instance a was reset
        push(&mut v, &ctx, &input_key("a", "1"), 6000, 1.0);
        push(&mut v, &ctx, &input_key("a", "+Inf"), 6000, 12.0);
        assert_eq!(
            flush(&mut v, 10_000),
            vec![
                r#"foo:1m_histogram_merge{le="+Inf"} 12"#,
                r#"foo:1m_histogram_merge{le="1"} 8"#,
            ]
        );
    }

    #[test]
    fn test_stale_buckets_are_compacted() {
        let mut v = HistogramMergeAggrValue::new(None);
        push(&mut v, &push_ctx(0, 1500), &input_key("a", "1"), 1000, 3.0);
        push(&mut v, &push_ctx(0, 100_000), &input_key("a", "+Inf"), 1000, 10.0);
        assert_eq!(
            flush(&mut v, 1000),
            vec![
                r#"foo:1m_histogram_merge{le="+Inf"} 10"#,
                r#"foo:1m_histogram_merge{le="1"} 3"#,
            ]
        );

        push(&mut v, &push_ctx(2000, 100_000), &input_key("a", "+Inf"), 2000, 12.0);
        assert_eq!(flush(&mut v, 3000), vec![r#"foo:1m_histogram_merge{le="+Inf"} 12"#]);
        assert_eq!(v.shared.lock().inputs.len(), 1);
    }
}
