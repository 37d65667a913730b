use std::sync::atomic::{AtomicU64, Ordering};

use super::utils::add_metric_suffix;
use super::PushFunc;
use crate::common::types::{Label, Sample, TimeSeries};
use crate::relabel::ParsedConfigs;

/// Output series are handed to the push callback in batches of at most this size.
const FLUSH_BATCH_SIZE: usize = 10_000;

/// FlushCtx collects the series produced by a single flush of an aggregator.
pub(crate) struct FlushCtx<'a> {
    suffix: &'a str,
    keep_metric_names: bool,
    output_relabeling: Option<&'a ParsedConfigs>,
    push_func: Option<&'a PushFunc>,
    output_samples: &'a AtomicU64,
    pub(crate) flush_timestamp: i64,
    pub(crate) is_green: bool,
    pub(crate) is_last: bool,
    tss: Vec<TimeSeries>,
}

impl<'a> FlushCtx<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        suffix: &'a str,
        keep_metric_names: bool,
        output_relabeling: Option<&'a ParsedConfigs>,
        push_func: Option<&'a PushFunc>,
        output_samples: &'a AtomicU64,
        flush_timestamp: i64,
        is_green: bool,
        is_last: bool,
    ) -> Self {
        FlushCtx {
            suffix,
            keep_metric_names,
            output_relabeling,
            push_func,
            output_samples,
            flush_timestamp,
            is_green,
            is_last,
            tss: Vec::new(),
        }
    }

    pub(crate) fn append_series(&mut self, labels: &[Label], suffix: &str, value: f64) {
        let labels = self.output_labels(labels, suffix, labels.len());
        self.push_series(labels, value);
    }

    pub(crate) fn append_series_with_extra_label(
        &mut self,
        labels: &[Label],
        suffix: &str,
        value: f64,
        extra_name: &str,
        extra_value: &str,
    ) {
        let mut labels = self.output_labels(labels, suffix, labels.len() + 1);
        labels.push(Label::new(extra_name, extra_value));
        self.push_series(labels, value);
    }

    fn output_labels(&self, labels: &[Label], suffix: &str, capacity: usize) -> Vec<Label> {
        let mut dst = Vec::with_capacity(capacity + 1);
        dst.extend_from_slice(labels);
        if !self.keep_metric_names {
            add_metric_suffix(&mut dst, 0, self.suffix, suffix);
        }
        dst
    }

    fn push_series(&mut self, labels: Vec<Label>, value: f64) {
        self.tss.push(TimeSeries {
            labels,
            samples: vec![Sample::new(self.flush_timestamp, value)],
        });
    }

    /// Pushes the buffered series once enough of them have been collected.
    pub(crate) fn maybe_flush_series(&mut self) {
        if self.tss.len() >= FLUSH_BATCH_SIZE {
            self.flush_series();
        }
    }

    /// Applies output relabeling to the buffered series and hands them to the push callback.
    pub(crate) fn flush_series(&mut self) {
        let mut tss = std::mem::take(&mut self.tss);
        if tss.is_empty() {
            return;
        }
        let Some(push_func) = self.push_func else {
            // the flush only resets the state
            return;
        };

        if let Some(output_relabeling) = self.output_relabeling {
            tss.retain_mut(|ts| {
                output_relabeling.apply(&mut ts.labels, 0);
                !ts.labels.is_empty()
            });
            if tss.is_empty() {
                return;
            }
        }

        self.output_samples
            .fetch_add(tss.len() as u64, Ordering::Relaxed);
        push_func(tss);
    }
}

impl Drop for FlushCtx<'_> {
    fn drop(&mut self) {
        self.flush_series();
    }
}
