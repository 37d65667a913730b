use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use super::aggr_outputs::AggrOutputs;
use super::config::{parse_config_data, AggregatorSettings};
use super::dedup::DedupAggr;
use super::fast_histogram::FastHistogram;
use super::flush_ctx::FlushCtx;
use super::utils::{compress_labels, get_input_output_labels};
use super::{Config, Options, PushFunc, PushSample};
use crate::common::labels::{drop_series_labels, sort_labels};
use crate::common::time::current_time_millis;
use crate::common::types::{Label, TimeSeries};
use crate::error::{StreamAggrError, StreamAggrResult};
use crate::relabel::{IfExpression, ParsedConfigs};

/// The flusher waits for this quantile of the observed sample lag before flushing windows.
const FLUSH_LAG_QUANTILE: f64 = 0.95;

/// Bounds the number of flushes running at once across all the aggregators in the process.
fn flush_tokens() -> &'static (Sender<()>, Receiver<()>) {
    static FLUSH_TOKENS: OnceLock<(Sender<()>, Receiver<()>)> = OnceLock::new();
    FLUSH_TOKENS.get_or_init(|| {
        let n = thread::available_parallelism().map_or(1, |n| n.get());
        bounded(n)
    })
}

/// Blocks until a flush token is available. The token is returned when the guard is dropped.
fn acquire_flush_token() -> scopeguard::ScopeGuard<(), impl FnOnce(())> {
    let (tx, rx) = flush_tokens();
    // both channel ends live in a static, so neither send nor recv can fail
    let _ = tx.send(());
    scopeguard::guard((), move |_| {
        let _ = rx.recv();
    })
}

/// Counters describing the work done by a single aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub matched_samples: u64,
    /// Samples with NaN or infinite values.
    pub ignored_nan_samples: u64,
    pub ignored_old_samples: u64,
    pub output_samples: u64,
    pub flush_timeouts: u64,
    pub dedup_flush_timeouts: u64,
}

#[derive(Default)]
struct AggregatorMetrics {
    matched_samples: AtomicU64,
    ignored_nan_samples: AtomicU64,
    ignored_old_samples: AtomicU64,
    output_samples: AtomicU64,
    flush_timeouts: AtomicU64,
    dedup_flush_timeouts: AtomicU64,
}

/// The window currently accepting samples.
struct CurrentState {
    max_deadline: i64,
    is_green: bool,
}

/// Aggregator aggregates the samples matching a single `Config`.
pub struct Aggregator {
    name: String,
    alias: String,
    match_expr: Option<IfExpression>,
    drop_input_labels: Vec<String>,
    input_relabeling: Option<ParsedConfigs>,
    output_relabeling: Option<ParsedConfigs>,
    keep_metric_names: bool,
    ignore_old_samples: bool,
    enable_windows: bool,
    align_flush_to_interval: bool,
    flush_on_shutdown: bool,

    by: Vec<String>,
    without: Vec<String>,
    aggregate_only_by_time: bool,

    interval_ms: i64,
    dedup_interval_ms: i64,
    staleness_interval_ms: i64,

    // suffix is appended to the output metric names, e.g. `:1m_by_job_`
    suffix: String,

    da: Option<DedupAggr>,
    aggr_outputs: AggrOutputs,
    push_func: PushFunc,

    cs: RwLock<CurrentState>,
    // samples older than min_deadline are dropped if ignore_old_samples or windows are enabled
    min_deadline: AtomicI64,
    // the timestamp of the next aggregation flush
    flush_time: AtomicI64,
    ignore_first_intervals: AtomicUsize,
    flush_after: Mutex<FastHistogram>,

    metrics: AggregatorMetrics,

    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Aggregator {
    /// Creates an aggregator for cfg and starts its background flushers.
    ///
    /// The aggregated series are passed to push_func once per interval.
    /// The aggregator must be stopped with `must_stop` when no longer needed.
    pub fn new(cfg: &Config, push_func: PushFunc, opts: &Options, alias: &str) -> StreamAggrResult<Arc<Self>> {
        let aggr = Arc::new(Self::build(cfg, push_func, opts, alias, current_time_millis())?);
        aggr.start()?;
        Ok(aggr)
    }

    /// Creates an aggregator as if it was started at `now`, without background flushers.
    pub(crate) fn build(
        cfg: &Config,
        push_func: PushFunc,
        opts: &Options,
        alias: &str,
        now: i64,
    ) -> StreamAggrResult<Self> {
        let AggregatorSettings {
            name,
            match_expr,
            interval_ms,
            dedup_interval_ms,
            staleness_interval_ms,
            ignore_first_sample_interval_ms,
            outputs,
            keep_metric_names,
            ignore_old_samples,
            ignore_first_intervals,
            enable_windows,
            align_flush_to_interval,
            flush_on_shutdown,
            by,
            without,
            aggregate_only_by_time,
            drop_input_labels,
            input_relabeling,
            output_relabeling,
            suffix,
        } = cfg.validate(opts)?;

        let mut min_time = now;
        if align_flush_to_interval {
            min_time = now - now.rem_euclid(interval_ms);
            if min_time != now {
                min_time += interval_ms;
            }
        }
        let max_deadline = if dedup_interval_ms > 0 {
            min_time + dedup_interval_ms
        } else {
            min_time + interval_ms
        };

        Ok(Aggregator {
            name,
            alias: alias.to_string(),
            match_expr,
            drop_input_labels,
            input_relabeling,
            output_relabeling,
            keep_metric_names,
            ignore_old_samples,
            enable_windows,
            align_flush_to_interval,
            flush_on_shutdown,
            by,
            without,
            aggregate_only_by_time,
            interval_ms,
            dedup_interval_ms,
            staleness_interval_ms,
            suffix,
            da: (dedup_interval_ms > 0).then(DedupAggr::new),
            aggr_outputs: AggrOutputs::new(outputs, now + ignore_first_sample_interval_ms),
            push_func,
            cs: RwLock::new(CurrentState {
                max_deadline,
                is_green: false,
            }),
            min_deadline: AtomicI64::new(min_time),
            flush_time: AtomicI64::new(min_time + interval_ms),
            ignore_first_intervals: AtomicUsize::new(ignore_first_intervals),
            flush_after: Mutex::new(FastHistogram::new()),
            metrics: AggregatorMetrics::default(),
            stop_tx: Mutex::new(None),
            handle: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(test)]
    pub(crate) fn next_flush_time(&self) -> i64 {
        self.flush_time.load(Ordering::Relaxed)
    }

    fn start(self: &Arc<Self>) -> StreamAggrResult<()> {
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let aggr = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("streamaggr-flush-{}", self.name))
            .spawn(move || aggr.run_flusher(stop_rx))?;
        *self.handle.lock() = Some(handle);

        *self.stop_tx.lock() = Some(stop_tx);
        info!(
            aggregator = %self.name,
            alias = %self.alias,
            interval_ms = self.interval_ms,
            dedup_interval_ms = self.dedup_interval_ms,
            "started stream aggregator"
        );
        Ok(())
    }

    /// Sleeps until the first aligned deadline. Returns false if the aggregator was stopped meanwhile.
    fn aligned_sleep(&self, stop_rx: &Receiver<()>) -> bool {
        let d = self.min_deadline.load(Ordering::Relaxed) - current_time_millis();
        if d <= 0 {
            return true;
        }
        !matches!(
            stop_rx.recv_timeout(Duration::from_millis(d as u64)),
            Err(RecvTimeoutError::Disconnected) | Ok(())
        )
    }

    /// The flusher wakes up every dedup_interval if dedup is enabled, otherwise every interval.
    pub(crate) fn tick_interval_ms(&self) -> i64 {
        if self.da.is_some() {
            self.dedup_interval_ms
        } else {
            self.interval_ms
        }
    }

    fn run_flusher(&self, stop_rx: Receiver<()>) {
        if !self.aligned_sleep(&stop_rx) {
            return;
        }
        let ticker = tick(Duration::from_millis(self.tick_interval_ms() as u64));
        loop {
            select! {
                recv(stop_rx) -> _ => return,
                recv(ticker) -> _ => {}
            }
            if self.enable_windows {
                let delay = {
                    let mut fa = self.flush_after.lock();
                    let delay = if fa.is_empty() { 0.0 } else { fa.quantile(FLUSH_LAG_QUANTILE) };
                    fa.reset();
                    delay
                };
                if delay > 0.0 {
                    let delay = Duration::from_millis(delay.min(self.interval_ms as f64) as u64);
                    if let Err(RecvTimeoutError::Disconnected) | Ok(()) = stop_rx.recv_timeout(delay) {
                        return;
                    }
                }
            }
            self.tick(current_time_millis());
            if self.align_flush_to_interval {
                // a tick which piled up during a slow flush would break the alignment
                let _ = ticker.try_recv();
            }
        }
    }

    /// Runs a single step of the flusher.
    ///
    /// The dedup window ending at the current deadline is moved into the aggregation state first,
    /// so its samples are counted in the interval being flushed.
    pub(crate) fn tick(&self, now: i64) {
        if self.da.is_some() {
            let dedup_time = self.dedup_tick(now);
            if self.flush_time.load(Ordering::Relaxed) > dedup_time {
                return;
            }
        }
        self.flush_tick(now);
    }

    /// Flushes the aggregated state for the scheduled flush time and moves to the next window.
    pub(crate) fn flush_tick(&self, now: i64) {
        let flush_time = self.flush_time.load(Ordering::Relaxed);
        let push = match self.ignore_first_intervals.load(Ordering::Relaxed) {
            0 => true,
            n => {
                self.ignore_first_intervals.store(n - 1, Ordering::Relaxed);
                debug!(aggregator = %self.name, remaining = n - 1, "ignoring the output of the first intervals");
                false
            }
        };
        self.flush_at(push, flush_time, false);

        let mut next_flush_time = flush_time + self.interval_ms;
        while now >= next_flush_time {
            next_flush_time += self.interval_ms;
        }
        self.flush_time.store(next_flush_time, Ordering::Relaxed);

        let mut cs = self.cs.write();
        if self.da.is_none() {
            cs.max_deadline = next_flush_time;
        }
        if self.enable_windows {
            cs.is_green = !cs.is_green;
        }
    }

    /// Moves the deduplicated samples into the aggregation state and advances the dedup deadline.
    /// Returns the deadline of the flushed dedup window.
    fn dedup_tick(&self, now: i64) -> i64 {
        let dedup_time = self.cs.read().max_deadline;
        self.dedup_flush_at(dedup_time);

        let mut next_dedup_time = dedup_time + self.dedup_interval_ms;
        while now >= next_dedup_time {
            next_dedup_time += self.dedup_interval_ms;
        }
        self.cs.write().max_deadline = next_dedup_time;
        dedup_time
    }

    pub(crate) fn dedup_flush_at(&self, dedup_time: i64) {
        let Some(da) = &self.da else {
            return;
        };
        let start = Instant::now();

        self.min_deadline
            .store(self.cs.read().max_deadline, Ordering::Relaxed);

        let delete_deadline = dedup_time + self.staleness_interval_ms;
        da.flush(
            |samples| {
                self.aggr_outputs
                    .push_samples(samples, delete_deadline, dedup_time, false)
            },
            dedup_time,
            true,
        );

        let elapsed = start.elapsed();
        if elapsed.as_millis() as i64 > self.dedup_interval_ms {
            self.metrics
                .dedup_flush_timeouts
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                aggregator = %self.name,
                elapsed_secs = elapsed.as_secs_f64(),
                dedup_interval_ms = self.dedup_interval_ms,
                "deduplication flush took longer than dedup_interval; consider increasing dedup_interval \
                 or reducing the number of series"
            );
        }
    }

    /// Flushes the aggregated state stamped with flush_time.
    ///
    /// The output is passed to the push callback only if push is set. The state is reset either way.
    pub(crate) fn flush_at(&self, push: bool, flush_time: i64, is_last: bool) {
        let _token = acquire_flush_token();
        let start = Instant::now();

        let is_green = if self.da.is_none() {
            let cs = self.cs.read();
            self.min_deadline.store(cs.max_deadline, Ordering::Relaxed);
            cs.is_green
        } else {
            false
        };

        {
            let mut ctx = FlushCtx::new(
                &self.suffix,
                self.keep_metric_names,
                self.output_relabeling.as_ref(),
                push.then_some(&self.push_func),
                &self.metrics.output_samples,
                flush_time,
                is_green,
                is_last,
            );
            self.aggr_outputs.flush_state(&mut ctx);
            ctx.flush_series();
        }

        let elapsed = start.elapsed();
        if elapsed.as_millis() as i64 > self.interval_ms {
            self.metrics.flush_timeouts.fetch_add(1, Ordering::Relaxed);
            warn!(
                aggregator = %self.name,
                elapsed_secs = elapsed.as_secs_f64(),
                interval_ms = self.interval_ms,
                "aggregation flush took longer than interval; consider increasing interval \
                 or reducing the number of series"
            );
        }
    }

    /// Runs the terminal dedup and aggregation flushes once the flushers are stopped.
    pub(crate) fn flush_on_stop(&self, now: i64) {
        let (flush_time, dedup_time) = if self.align_flush_to_interval {
            (
                self.flush_time.load(Ordering::Relaxed),
                self.cs.read().max_deadline,
            )
        } else {
            (now, now)
        };

        self.dedup_flush_at(dedup_time);

        let push = self.flush_on_shutdown && self.ignore_first_intervals.load(Ordering::Relaxed) == 0;
        debug!(aggregator = %self.name, push, flush_time, "flushing the aggregation state on shutdown");
        self.flush_at(push, flush_time, true);
    }

    /// Stops the background flushers and flushes the remaining state.
    ///
    /// Calling it more than once is a no-op.
    pub fn must_stop(&self) {
        let Some(stop_tx) = self.stop_tx.lock().take() else {
            return;
        };
        drop(stop_tx);

        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!(aggregator = %self.name, "stream aggregation flusher panicked");
            }
        }

        self.flush_on_stop(current_time_millis());
        info!(aggregator = %self.name, alias = %self.alias, "stopped stream aggregator");
    }

    /// Pushes tss to the aggregator and sets `match_idxs[i] = 1` for every series
    /// matched by the aggregator.
    ///
    /// match_idxs is grown to `tss.len()` if it is shorter. Existing flags are left untouched.
    pub fn push(&self, tss: &[TimeSeries], match_idxs: &mut Vec<u8>) {
        self.push_at(tss, match_idxs, current_time_millis())
    }

    pub(crate) fn push_at(&self, tss: &[TimeSeries], match_idxs: &mut Vec<u8>, now: i64) {
        if match_idxs.len() < tss.len() {
            match_idxs.resize(tss.len(), 0);
        }
        let delete_deadline = now + self.staleness_interval_ms;
        let min_deadline = self.min_deadline.load(Ordering::Relaxed);
        let (max_deadline, is_green) = {
            let cs = self.cs.read();
            (cs.max_deadline, cs.is_green)
        };
        let drop_old = self.ignore_old_samples || self.enable_windows;

        let mut labels: Vec<Label> = Vec::new();
        let mut input_labels: Vec<Label> = Vec::new();
        let mut output_labels: Vec<Label> = Vec::new();
        let mut blue: Vec<PushSample> = Vec::new();
        let mut green: Vec<PushSample> = Vec::new();
        let mut max_lag: i64 = 0;
        let mut ignored_nan: u64 = 0;
        let mut ignored_old: u64 = 0;

        for (idx, ts) in tss.iter().enumerate() {
            if let Some(match_expr) = &self.match_expr {
                if !match_expr.is_match(&ts.labels) {
                    continue;
                }
            }
            match_idxs[idx] = 1;

            labels.clear();
            if self.drop_input_labels.is_empty() {
                labels.extend_from_slice(&ts.labels);
            } else {
                drop_series_labels(&mut labels, &ts.labels, &self.drop_input_labels);
            }
            if let Some(relabeling) = &self.input_relabeling {
                relabeling.apply(&mut labels, 0);
            }
            if labels.is_empty() {
                // the series was dropped by relabeling
                continue;
            }
            sort_labels(&mut labels);

            input_labels.clear();
            output_labels.clear();
            if self.aggregate_only_by_time {
                output_labels.extend_from_slice(&labels);
            } else {
                get_input_output_labels(&mut input_labels, &mut output_labels, &labels, &self.by, &self.without);
            }
            let mut key = Vec::new();
            compress_labels(&mut key, &input_labels, &output_labels);

            for sample in &ts.samples {
                if !sample.value.is_finite() {
                    ignored_nan += 1;
                    continue;
                }
                if drop_old && sample.timestamp < min_deadline {
                    ignored_old += 1;
                    continue;
                }
                max_lag = max_lag.max(now - sample.timestamp);
                let ps = PushSample {
                    key: key.clone(),
                    value: sample.value,
                    timestamp: sample.timestamp,
                };
                if self.enable_windows && ((sample.timestamp <= max_deadline) == is_green) {
                    green.push(ps);
                } else {
                    blue.push(ps);
                }
            }
        }

        if self.enable_windows && max_lag > 0 {
            self.flush_after.lock().update(max_lag as f64);
        }

        let metrics = &self.metrics;
        if ignored_nan > 0 {
            metrics.ignored_nan_samples.fetch_add(ignored_nan, Ordering::Relaxed);
        }
        if ignored_old > 0 {
            metrics.ignored_old_samples.fetch_add(ignored_old, Ordering::Relaxed);
        }
        metrics
            .matched_samples
            .fetch_add((blue.len() + green.len()) as u64, Ordering::Relaxed);

        match &self.da {
            Some(da) => {
                da.push_samples(&blue);
                da.push_samples(&green);
            }
            None => {
                if !blue.is_empty() {
                    self.aggr_outputs.push_samples(&blue, delete_deadline, now, false);
                }
                if !green.is_empty() {
                    self.aggr_outputs.push_samples(&green, delete_deadline, now, true);
                }
            }
        }
    }

    pub fn stats(&self) -> AggregatorStats {
        let m = &self.metrics;
        AggregatorStats {
            matched_samples: m.matched_samples.load(Ordering::Relaxed),
            ignored_nan_samples: m.ignored_nan_samples.load(Ordering::Relaxed),
            ignored_old_samples: m.ignored_old_samples.load(Ordering::Relaxed),
            output_samples: m.output_samples.load(Ordering::Relaxed),
            flush_timeouts: m.flush_timeouts.load(Ordering::Relaxed),
            dedup_flush_timeouts: m.dedup_flush_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Aggregators is a set of aggregators built from a single config file.
pub struct Aggregators {
    aggregators: Vec<Arc<Aggregator>>,
    // JSON representation of the configs, used for equality checks on reload
    config_data: Vec<u8>,
    file_path: String,
}

impl Aggregators {
    /// Loads aggregators from the YAML file at path.
    pub fn load_from_file(path: &str, push_func: PushFunc, opts: &Options, alias: &str) -> StreamAggrResult<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| StreamAggrError::Io(format!("cannot load aggregators from {path:?}: {e}")))?;
        let mut aggregators = Self::load_from_data(&data, push_func, opts, alias)?;
        aggregators.file_path = path.to_string();
        Ok(aggregators)
    }

    /// Builds and starts the aggregators described by the YAML data.
    pub fn load_from_data(data: &str, push_func: PushFunc, opts: &Options, alias: &str) -> StreamAggrResult<Self> {
        Self::load_from_data_with(data, |cfg| {
            Aggregator::new(cfg, push_func.clone(), opts, alias)
        })
    }

    pub(crate) fn load_from_data_with<F>(data: &str, new_aggregator: F) -> StreamAggrResult<Self>
    where
        F: Fn(&Config) -> StreamAggrResult<Arc<Aggregator>>,
    {
        let cfgs = parse_config_data(data)?;
        let mut aggregators = Vec::with_capacity(cfgs.len());
        for (i, cfg) in cfgs.iter().enumerate() {
            match new_aggregator(cfg) {
                Ok(aggr) => aggregators.push(aggr),
                Err(err) => {
                    error!(index = i, error = %err, "cannot initialize stream aggregator");
                    for aggr in aggregators {
                        aggr.must_stop();
                    }
                    return Err(err);
                }
            }
        }
        let config_data = serde_json::to_vec(&cfgs)
            .map_err(|e| StreamAggrError::General(format!("cannot serialize stream aggregation configs: {e}")))?;
        Ok(Aggregators {
            aggregators,
            config_data,
            file_path: String::new(),
        })
    }

    /// The path of the file the aggregators were loaded from, if any.
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn is_enabled(&self) -> bool {
        !self.aggregators.is_empty()
    }

    pub fn aggregators(&self) -> &[Arc<Aggregator>] {
        &self.aggregators
    }

    /// Returns true if both sets were built from the same configs.
    pub fn equal(&self, other: &Aggregators) -> bool {
        self.config_data == other.config_data
    }

    /// Pushes tss to all the aggregators.
    ///
    /// Returns match_idxs resized to `tss.len()`, with `match_idxs[i] = 1` if `tss[i]` was matched
    /// by at least one aggregator.
    pub fn push(&self, tss: &[TimeSeries], match_idxs: Vec<u8>) -> Vec<u8> {
        self.push_with(tss, match_idxs, |aggr, tss, idxs| aggr.push(tss, idxs))
    }

    pub(crate) fn push_with<F>(&self, tss: &[TimeSeries], mut match_idxs: Vec<u8>, push: F) -> Vec<u8>
    where
        F: Fn(&Aggregator, &[TimeSeries], &mut Vec<u8>) + Sync,
    {
        match_idxs.clear();
        match_idxs.resize(tss.len(), 0);
        if self.aggregators.is_empty() || tss.is_empty() {
            return match_idxs;
        }
        let matched: Vec<Vec<u8>> = self
            .aggregators
            .par_iter()
            .map(|aggr| {
                let mut idxs = vec![0u8; tss.len()];
                push(&**aggr, tss, &mut idxs);
                idxs
            })
            .collect();
        for idxs in matched {
            for (dst, src) in match_idxs.iter_mut().zip(idxs) {
                *dst |= src;
            }
        }
        match_idxs
    }

    /// Stops all the aggregators.
    pub fn must_stop(&mut self) {
        for aggr in self.aggregators.drain(..) {
            aggr.must_stop();
        }
    }
}

impl Drop for Aggregators {
    fn drop(&mut self) {
        self.must_stop();
    }
}
