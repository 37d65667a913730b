use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::dedup::DedupAggr;
use super::utils::decompress_labels;
use super::{PushFunc, PushSample};
use crate::common::label_compressor::labels_compressor;
use crate::common::labels::{drop_series_labels, sort_labels};
use crate::common::time::current_time_millis;
use crate::common::types::{Label, Sample, TimeSeries};
use crate::error::{StreamAggrError, StreamAggrResult};

struct DeduplicatorInner {
    da: DedupAggr,
    drop_labels: Vec<String>,
    dedup_interval: Duration,
    push_func: PushFunc,
    alias: String,
    dedup_flush_timeouts: AtomicU64,
}

/// Deduplicator leaves only the last sample per series every dedup interval.
///
/// The surviving samples are stamped with the flush time and passed to the push callback.
pub struct Deduplicator {
    inner: Arc<DeduplicatorInner>,
    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Deduplicator {
    pub fn new(
        push_func: PushFunc,
        dedup_interval: Duration,
        drop_labels: Vec<String>,
        alias: &str,
    ) -> StreamAggrResult<Self> {
        if dedup_interval.is_zero() {
            return Err(StreamAggrError::InvalidConfiguration(
                "dedup_interval must be positive".to_string(),
            ));
        }
        let inner = Arc::new(DeduplicatorInner {
            da: DedupAggr::new(),
            drop_labels,
            dedup_interval,
            push_func,
            alias: alias.to_string(),
            dedup_flush_timeouts: AtomicU64::new(0),
        });

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let flusher = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(format!("dedup-flush-{alias}"))
            .spawn(move || flusher.run_flusher(stop_rx))?;

        info!(alias = %alias, dedup_interval = ?dedup_interval, "started deduplicator");
        Ok(Deduplicator {
            inner,
            stop_tx: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Pushes tss for deduplication.
    pub fn push(&self, tss: &[TimeSeries]) {
        self.inner.push(tss)
    }

    /// Returns the number of flushes that took longer than the dedup interval.
    pub fn dedup_flush_timeouts(&self) -> u64 {
        self.inner.dedup_flush_timeouts.load(Ordering::Relaxed)
    }

    /// Stops the deduplicator. Samples pushed since the last flush are dropped.
    pub fn must_stop(&self) {
        let Some(stop_tx) = self.stop_tx.lock().take() else {
            return;
        };
        drop(stop_tx);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!(alias = %self.inner.alias, "deduplicator flusher panicked");
            }
        }
        info!(alias = %self.inner.alias, "stopped deduplicator");
    }

    #[cfg(test)]
    pub(crate) fn flush_at(&self, flush_time: i64) {
        self.inner.flush(flush_time)
    }
}

impl Drop for Deduplicator {
    fn drop(&mut self) {
        self.must_stop();
    }
}

impl DeduplicatorInner {
    fn run_flusher(&self, stop_rx: Receiver<()>) {
        let ticker = tick(self.dedup_interval);
        loop {
            select! {
                recv(stop_rx) -> _ => return,
                recv(ticker) -> _ => {}
            }
            self.flush(current_time_millis());
        }
    }

    fn push(&self, tss: &[TimeSeries]) {
        let lc = labels_compressor();
        let mut labels: Vec<Label> = Vec::new();
        let mut pss: Vec<PushSample> = Vec::new();
        for ts in tss {
            labels.clear();
            if self.drop_labels.is_empty() {
                labels.extend_from_slice(&ts.labels);
            } else {
                drop_series_labels(&mut labels, &ts.labels, &self.drop_labels);
            }
            if labels.is_empty() {
                continue;
            }
            sort_labels(&mut labels);

            let mut key = Vec::new();
            lc.compress(&mut key, &labels);
            for sample in &ts.samples {
                pss.push(PushSample {
                    key: key.clone(),
                    value: sample.value,
                    timestamp: sample.timestamp,
                });
            }
        }
        self.da.push_samples(&pss);
    }

    fn flush(&self, flush_time: i64) {
        let start = Instant::now();
        self.da.flush(
            |samples| {
                let tss: Vec<TimeSeries> = samples
                    .iter()
                    .map(|ps| {
                        let mut labels = Vec::new();
                        decompress_labels(&mut labels, &ps.key);
                        TimeSeries {
                            labels,
                            samples: vec![Sample::new(flush_time, ps.value)],
                        }
                    })
                    .collect();
                (self.push_func)(tss);
            },
            flush_time,
            true,
        );

        let elapsed = start.elapsed();
        if elapsed > self.dedup_interval {
            self.dedup_flush_timeouts.fetch_add(1, Ordering::Relaxed);
            warn!(
                alias = %self.alias,
                elapsed_secs = elapsed.as_secs_f64(),
                dedup_interval = ?self.dedup_interval,
                "deduplication flush took longer than dedup_interval; consider increasing dedup_interval"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::tests::utils::{must_parse_prom_metrics, sorted_series_strings};

    #[test]
    fn test_deduplicator() {
        let result: Arc<StdMutex<Vec<TimeSeries>>> = Arc::new(StdMutex::new(vec![]));
        let result_clone = result.clone();
        let push_func: PushFunc = Arc::new(move |tss: Vec<TimeSeries>| {
            result_clone.lock().unwrap().extend(tss);
        });

        // a long interval keeps the background flusher idle during the test
        let d = Deduplicator::new(push_func, Duration::from_secs(3600), vec!["node".to_string()], "test")
            .unwrap();
        let tss = must_parse_prom_metrics(
            r#"
foo{instance="x",node="a"} 123
bar{baz="qwe"} 1.32
foo{instance="x",node="b"} 8
bar{baz="qwe"} 4.34
bar{baz="qwe"} 2
foo{instance="y"} 2
"#,
            0,
        );
        d.push(&tss);
        d.flush_at(1000);

        let result = result.lock().unwrap();
        assert!(result.iter().all(|ts| ts.samples == vec![Sample::new(1000, ts.samples[0].value)]));
        assert_eq!(
            sorted_series_strings(&result),
            vec![
                r#"bar{baz="qwe"} 2"#,
                r#"foo{instance="x"} 8"#,
                r#"foo{instance="y"} 2"#,
            ]
        );
        drop(result);
        d.must_stop();
    }

    #[test]
    fn test_flush_resets_state() {
        let count = Arc::new(AtomicU64::new(0));
        let count_clone = count.clone();
        let push_func: PushFunc = Arc::new(move |tss: Vec<TimeSeries>| {
            count_clone.fetch_add(tss.len() as u64, Ordering::Relaxed);
        });
        let d = Deduplicator::new(push_func, Duration::from_secs(3600), vec![], "test").unwrap();
        d.push(&must_parse_prom_metrics("foo 1\nbar 2\n", 0));
        d.flush_at(1000);
        d.flush_at(2000);
        assert_eq!(count.load(Ordering::Relaxed), 2);
        assert_eq!(d.dedup_flush_timeouts(), 0);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let push_func: PushFunc = Arc::new(|_tss: Vec<TimeSeries>| {});
        assert!(Deduplicator::new(push_func, Duration::ZERO, vec![], "test").is_err());
    }
}
