use std::sync::Arc;

use parking_lot::Mutex;

use super::flush_ctx::FlushCtx;
use super::histogram_merge::HistogramMergeSharedState;
use super::rate::RateSharedState;
use super::sum_last::SumLastSharedState;
use super::total::TotalSharedState;
use super::utils::{create_concurrent_hashmap, decompress_labels, get_input_output_key, ConcurrentHashMap};
use super::vm_histogram::VmHistogram;
use super::{AggregationOutput, PushSample};
use crate::common::types::Label;

/// PushSampleCtx carries the per-batch parameters of a push.
pub(crate) struct PushSampleCtx {
    pub delete_deadline: i64,
    pub now: i64,
    pub ignore_first_sample_deadline: i64,
}

/// State shared by the blue and green slots of an entry, so it survives slot rotation.
#[derive(Clone)]
pub(crate) enum SharedState {
    Total(Arc<Mutex<TotalSharedState>>),
    Rate(Arc<Mutex<RateSharedState>>),
    HistogramBucket(Arc<Mutex<VmHistogram>>),
    HistogramMerge(Arc<Mutex<HistogramMergeSharedState>>),
    SumLast(Arc<Mutex<SumLastSharedState>>),
}

/// AggrValue is the per-group state of a single aggregate function.
pub(crate) trait AggrValue: Send {
    fn push_sample(&mut self, ctx: &PushSampleCtx, input_key: &[u8], sample: &PushSample);

    /// Emits the aggregated series for the group identified by labels and resets the window state.
    fn flush(&mut self, ctx: &mut FlushCtx, labels: &[Label]);

    fn state(&self) -> Option<SharedState> {
        None
    }
}

struct AggrOutputsValue {
    blue: Vec<Box<dyn AggrValue>>,
    green: Option<Vec<Box<dyn AggrValue>>>,
    deleted: bool,
    delete_deadline: i64,
}

/// AggrOutputs maps output keys to the aggregate function states of their groups.
pub(crate) struct AggrOutputs {
    m: ConcurrentHashMap<Vec<u8>, Arc<Mutex<AggrOutputsValue>>>,
    outputs: Vec<AggregationOutput>,
    ignore_first_sample_deadline: i64,
}

impl AggrOutputs {
    pub(crate) fn new(outputs: Vec<AggregationOutput>, ignore_first_sample_deadline: i64) -> Self {
        AggrOutputs {
            m: create_concurrent_hashmap(),
            outputs,
            ignore_first_sample_deadline,
        }
    }

    pub(crate) fn outputs(&self) -> &[AggregationOutput] {
        &self.outputs
    }

    /// Returns the number of live groups.
    pub(crate) fn len(&self) -> usize {
        self.m.len()
    }

    fn new_values(&self, blue: Option<&[Box<dyn AggrValue>]>) -> Vec<Box<dyn AggrValue>> {
        match blue {
            Some(blue) => self
                .outputs
                .iter()
                .zip(blue.iter())
                .map(|(output, value)| output.new_value(value.state()))
                .collect(),
            None => self.outputs.iter().map(|output| output.new_value(None)).collect(),
        }
    }

    pub(crate) fn push_samples(&self, samples: &[PushSample], delete_deadline: i64, now: i64, is_green: bool) {
        let ctx = PushSampleCtx {
            delete_deadline,
            now,
            ignore_first_sample_deadline: self.ignore_first_sample_deadline,
        };
        let map = self.m.pin();
        for sample in samples {
            let (input_key, output_key) = get_input_output_key(&sample.key);
            loop {
                let entry = match map.get(output_key) {
                    Some(entry) => entry.clone(),
                    None => {
                        let value = AggrOutputsValue {
                            blue: self.new_values(None),
                            green: None,
                            deleted: false,
                            delete_deadline,
                        };
                        // a concurrent writer may have won; adopt its entry
                        map.get_or_insert(output_key.to_vec(), Arc::new(Mutex::new(value)))
                            .clone()
                    }
                };
                let mut av = entry.lock();
                if av.deleted {
                    // The entry was removed by a concurrent flush_state.
                    // Retry against a fresh entry.
                    continue;
                }
                if is_green {
                    if av.green.is_none() {
                        let green = self.new_values(Some(&av.blue));
                        av.green = Some(green);
                    }
                    if let Some(green) = av.green.as_mut() {
                        for value in green.iter_mut() {
                            value.push_sample(&ctx, input_key, sample);
                        }
                    }
                } else {
                    for value in av.blue.iter_mut() {
                        value.push_sample(&ctx, input_key, sample);
                    }
                }
                av.delete_deadline = delete_deadline;
                break;
            }
        }
    }

    pub(crate) fn flush_state(&self, ctx: &mut FlushCtx) {
        let map = self.m.pin();
        let mut labels = Vec::new();
        for (key, entry) in map.iter() {
            let mut av = entry.lock();

            // Check for stale entries
            if ctx.flush_timestamp > av.delete_deadline {
                av.deleted = true;
                map.remove(key);
                continue;
            }

            labels.clear();
            decompress_labels(&mut labels, key);
            let values = if ctx.is_green {
                av.green.as_mut()
            } else {
                Some(&mut av.blue)
            };
            if let Some(values) = values {
                for value in values.iter_mut() {
                    value.flush(ctx, &labels);
                }
            }
            if ctx.is_last {
                av.deleted = true;
                map.remove(key);
            }
            drop(av);
            ctx.maybe_flush_series();
        }
    }
}

/// Helpers for driving a single aggregate function state in unit tests.
#[cfg(test)]
pub(crate) mod test_utils {
    use std::sync::atomic::AtomicU64;

    use super::*;
    use crate::common::labels::labels_to_string;
    use crate::stream_aggregation::PushFunc;
    use crate::TimeSeries;

    pub(crate) fn push_ctx(now: i64, delete_deadline: i64) -> PushSampleCtx {
        PushSampleCtx {
            delete_deadline,
            now,
            ignore_first_sample_deadline: 0,
        }
    }

    pub(crate) fn push(value: &mut dyn AggrValue, ctx: &PushSampleCtx, input_key: &[u8], timestamp: i64, v: f64) {
        let sample = PushSample {
            key: vec![],
            value: v,
            timestamp,
        };
        value.push_sample(ctx, input_key, &sample);
    }

    /// Flushes value for the `foo` group and returns the sorted output in text form.
    pub(crate) fn flush(value: &mut dyn AggrValue, flush_timestamp: i64) -> Vec<String> {
        let result = Arc::new(std::sync::Mutex::new(vec![]));
        let result_clone = result.clone();
        let push_func: PushFunc = Arc::new(move |tss: Vec<TimeSeries>| {
            let mut result = result_clone.lock().unwrap();
            for ts in tss {
                result.push(format!("{} {}", labels_to_string(&ts.labels), ts.samples[0].value));
            }
        });
        let output_samples = AtomicU64::new(0);
        {
            let mut ctx = FlushCtx::new(
                ":1m_",
                false,
                None,
                Some(&push_func),
                &output_samples,
                flush_timestamp,
                false,
                false,
            );
            value.flush(&mut ctx, &[Label::new("__name__", "foo")]);
        }
        let mut result = result.lock().unwrap().clone();
        result.sort();
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::thread;

    use super::*;
    use crate::common::labels::labels_to_string;
    use crate::stream_aggregation::utils::compress_labels;
    use crate::stream_aggregation::PushFunc;
    use crate::TimeSeries;

    fn sample(output: &[(&str, &str)], input: &[(&str, &str)], value: f64) -> PushSample {
        let to_labels = |pairs: &[(&str, &str)]| -> Vec<Label> {
            pairs.iter().map(|(n, v)| Label::new(*n, *v)).collect()
        };
        let mut key = vec![];
        compress_labels(&mut key, &to_labels(input), &to_labels(output));
        PushSample {
            key,
            value,
            timestamp: 0,
        }
    }

    fn flush(outputs: &AggrOutputs, flush_timestamp: i64, is_green: bool, is_last: bool) -> Vec<String> {
        let result = Arc::new(std::sync::Mutex::new(vec![]));
        let result_clone = result.clone();
        let push_func: PushFunc = Arc::new(move |tss: Vec<TimeSeries>| {
            let mut result = result_clone.lock().unwrap();
            for ts in tss {
                result.push(format!("{} {}", labels_to_string(&ts.labels), ts.samples[0].value));
            }
        });
        let output_samples = AtomicU64::new(0);
        {
            let mut ctx = FlushCtx::new(
                ":1m_",
                false,
                None,
                Some(&push_func),
                &output_samples,
                flush_timestamp,
                is_green,
                is_last,
            );
            outputs.flush_state(&mut ctx);
        }
        let mut result = result.lock().unwrap().clone();
        result.sort();
        result
    }

    #[test]
    fn test_push_and_flush() {
        let outputs = AggrOutputs::new(vec![AggregationOutput::CountSamples, AggregationOutput::SumSamples], 0);
        let samples = vec![
            sample(&[("__name__", "foo"), ("a", "1")], &[], 4.0),
            sample(&[("__name__", "foo"), ("a", "1")], &[], 8.5),
            sample(&[("__name__", "bar")], &[], 5.0),
        ];
        outputs.push_samples(&samples, 10_000, 0, false);
        assert_eq!(outputs.len(), 2);
        assert_eq!(
            flush(&outputs, 1000, false, false),
            vec![
                "bar:1m_count_samples 1",
                "bar:1m_sum_samples 5",
                r#"foo:1m_count_samples{a="1"} 2"#,
                r#"foo:1m_sum_samples{a="1"} 12.5"#,
            ]
        );
        // nothing was pushed since the previous flush
        assert!(flush(&outputs, 2000, false, false).is_empty());
    }

    #[test]
    fn test_stale_entries_are_removed_without_flush() {
        let outputs = AggrOutputs::new(vec![AggregationOutput::SumSamples], 0);
        outputs.push_samples(&[sample(&[("__name__", "foo")], &[], 1.0)], 1000, 0, false);
        assert!(flush(&outputs, 1001, false, false).is_empty());
        assert_eq!(outputs.len(), 0);

        // a new push recreates the entry
        outputs.push_samples(&[sample(&[("__name__", "foo")], &[], 2.0)], 5000, 0, false);
        assert_eq!(flush(&outputs, 2000, false, false), vec!["foo:1m_sum_samples 2"]);
    }

    #[test]
    fn test_last_flush_removes_entries() {
        let outputs = AggrOutputs::new(vec![AggregationOutput::Max], 0);
        outputs.push_samples(&[sample(&[("__name__", "foo")], &[], 1.0)], 10_000, 0, false);
        assert_eq!(flush(&outputs, 1000, false, true), vec!["foo:1m_max 1"]);
        assert_eq!(outputs.len(), 0);
    }

    #[test]
    fn test_green_slot_is_flushed_separately() {
        let outputs = AggrOutputs::new(vec![AggregationOutput::SumSamples], 0);
        outputs.push_samples(&[sample(&[("__name__", "foo")], &[], 1.0)], 10_000, 0, false);
        outputs.push_samples(&[sample(&[("__name__", "foo")], &[], 2.0)], 10_000, 0, true);
        assert_eq!(flush(&outputs, 1000, true, false), vec!["foo:1m_sum_samples 2"]);
        assert_eq!(flush(&outputs, 1000, false, false), vec!["foo:1m_sum_samples 1"]);
    }

    #[test]
    fn test_concurrent_pushes() {
        const WORKERS: usize = 8;
        const SAMPLES_PER_WORKER: usize = 1000;
        let outputs = AggrOutputs::new(vec![AggregationOutput::CountSamples], 0);
        thread::scope(|s| {
            for _ in 0..WORKERS {
                s.spawn(|| {
                    let samples: Vec<_> = (0..SAMPLES_PER_WORKER)
                        .map(|i| sample(&[("__name__", "foo")], &[], i as f64))
                        .collect();
                    for chunk in samples.chunks(10) {
                        outputs.push_samples(chunk, 10_000, 0, false);
                    }
                });
            }
        });
        assert_eq!(
            flush(&outputs, 1000, false, false),
            vec![format!("foo:1m_count_samples {}", WORKERS * SAMPLES_PER_WORKER)]
        );
    }
}
