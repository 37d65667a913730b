use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::utils::{add_missing_underscore_name, remove_underscore_name, sort_and_remove_duplicates};
use super::{parse_outputs, AggregationOutput};
use crate::common::time::parse_duration;
use crate::error::{StreamAggrError, StreamAggrResult};
use crate::relabel::{parse_relabel_configs, IfExpression, ParsedConfigs, RelabelConfig};

/// Options contains the defaults shared by all the aggregators built from a single config file.
///
/// Most of them can be overridden by the corresponding `Config` field.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Deduplicates samples before aggregation. `None` or zero disables deduplication.
    pub dedup_interval: Option<Duration>,

    /// Labels to drop from input samples before relabeling and grouping.
    pub drop_input_labels: Vec<String>,

    /// Disables aligning flushes to multiples of the aggregation interval.
    pub no_align_flush_to_interval: bool,

    /// Pushes the incomplete state on shutdown.
    pub flush_on_shutdown: bool,

    /// Leaves the input metric names unchanged in the output.
    pub keep_metric_names: bool,

    /// Drops samples older than the current aggregation interval.
    pub ignore_old_samples: bool,

    /// The number of initial flushes whose output is dropped.
    pub ignore_first_intervals: usize,

    /// Set when the caller keeps the input series alongside the aggregated ones.
    /// It conflicts with `keep_metric_names`.
    pub keep_input: bool,

    /// Aggregates samples into windows by their timestamps instead of the arrival time.
    pub enable_windows: bool,
}

/// Config is the configuration of a single aggregator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Selects the series for aggregation. All the series are aggregated if it is missing.
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_expr: Option<IfExpression>,

    /// The aggregation interval, e.g. `1m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_align_flush_to_interval: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_on_shutdown: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_interval: Option<String>,

    /// Evicts groups and input series that received no samples for this long.
    /// Defaults to twice the interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staleness_interval: Option<String>,

    /// The first sample of a new series is not counted by `total` and `increase` until this
    /// much time passed since the start. Defaults to the staleness interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_first_sample_interval: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_metric_names: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_old_samples: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_first_intervals: Option<usize>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub without: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_input_labels: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_relabel_configs: Vec<RelabelConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_relabel_configs: Vec<RelabelConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_windows: Option<bool>,
}

/// Parses a YAML list of aggregator configs.
pub fn parse_config_data(data: &str) -> StreamAggrResult<Vec<Config>> {
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str(data).map_err(|e| {
        StreamAggrError::InvalidConfiguration(format!("cannot parse stream aggregation config: {e}"))
    })
}

/// The validated settings of a single aggregator, with `Options` defaults applied.
pub(crate) struct AggregatorSettings {
    pub name: String,
    pub match_expr: Option<IfExpression>,
    pub interval_ms: i64,
    pub dedup_interval_ms: i64,
    pub staleness_interval_ms: i64,
    pub ignore_first_sample_interval_ms: i64,
    pub outputs: Vec<AggregationOutput>,
    pub keep_metric_names: bool,
    pub ignore_old_samples: bool,
    pub ignore_first_intervals: usize,
    pub enable_windows: bool,
    pub align_flush_to_interval: bool,
    pub flush_on_shutdown: bool,
    pub by: Vec<String>,
    pub without: Vec<String>,
    pub aggregate_only_by_time: bool,
    pub drop_input_labels: Vec<String>,
    pub input_relabeling: Option<ParsedConfigs>,
    pub output_relabeling: Option<ParsedConfigs>,
    pub suffix: String,
}

fn parse_duration_ms(option: &str, value: &str) -> StreamAggrResult<i64> {
    let d = parse_duration(value).map_err(|e| {
        StreamAggrError::InvalidConfiguration(format!("cannot parse `{option}: {value:?}`: {e}"))
    })?;
    Ok(d.as_millis() as i64)
}

fn parse_relabeling(option: &str, rcs: &[RelabelConfig]) -> StreamAggrResult<Option<ParsedConfigs>> {
    if rcs.is_empty() {
        return Ok(None);
    }
    let pcs = parse_relabel_configs(rcs).map_err(|e| {
        StreamAggrError::InvalidRelabelConfig(format!("cannot parse {option}: {e}"))
    })?;
    Ok(Some(pcs))
}

impl Config {
    pub(crate) fn validate(&self, opts: &Options) -> StreamAggrResult<AggregatorSettings> {
        let interval_str = match self.interval.as_deref() {
            Some(s) if !s.trim().is_empty() => s.trim(),
            _ => {
                return Err(StreamAggrError::InvalidConfiguration(
                    "missing `interval` option".to_string(),
                ))
            }
        };
        let interval_ms = parse_duration_ms("interval", interval_str)?;
        if interval_ms < 1000 {
            return Err(StreamAggrError::InvalidConfiguration(format!(
                "aggregation interval cannot be smaller than 1s; got {interval_str}"
            )));
        }

        let dedup_interval_ms = match self.dedup_interval.as_deref() {
            Some(s) => parse_duration_ms("dedup_interval", s)?,
            None => opts.dedup_interval.map_or(0, |d| d.as_millis() as i64),
        };
        if dedup_interval_ms >= interval_ms {
            return Err(StreamAggrError::InvalidConfiguration(format!(
                "dedup_interval={dedup_interval_ms}ms must be smaller than interval={interval_str}"
            )));
        }
        if dedup_interval_ms > 0 && interval_ms % dedup_interval_ms != 0 {
            return Err(StreamAggrError::InvalidConfiguration(format!(
                "interval={interval_str} must be a multiple of dedup_interval={dedup_interval_ms}ms"
            )));
        }

        let staleness_interval_ms = match self.staleness_interval.as_deref() {
            Some(s) => {
                let staleness_ms = parse_duration_ms("staleness_interval", s)?;
                if staleness_ms < interval_ms {
                    return Err(StreamAggrError::InvalidConfiguration(format!(
                        "staleness_interval={s} cannot be smaller than interval={interval_str}"
                    )));
                }
                if staleness_ms % interval_ms != 0 {
                    return Err(StreamAggrError::InvalidConfiguration(format!(
                        "staleness_interval={s} must be a multiple of interval={interval_str}"
                    )));
                }
                staleness_ms
            }
            None => 2 * interval_ms,
        };

        let ignore_first_sample_interval_ms = match self.ignore_first_sample_interval.as_deref() {
            Some(s) => parse_duration_ms("ignore_first_sample_interval", s)?,
            None => staleness_interval_ms,
        };

        let drop_input_labels = self
            .drop_input_labels
            .clone()
            .unwrap_or_else(|| opts.drop_input_labels.clone());

        let input_relabeling = parse_relabeling("input_relabel_configs", &self.input_relabel_configs)?;
        let output_relabeling = parse_relabeling("output_relabel_configs", &self.output_relabel_configs)?;

        let mut by = sort_and_remove_duplicates(&self.by);
        let without = sort_and_remove_duplicates(&self.without);
        if !by.is_empty() && !without.is_empty() {
            return Err(StreamAggrError::InvalidConfiguration(format!(
                "`by: {by:?}` and `without: {without:?}` lists cannot be set simultaneously"
            )));
        }
        let aggregate_only_by_time = by.is_empty() && without.is_empty();
        if !aggregate_only_by_time && without.is_empty() {
            by = add_missing_underscore_name(&by);
        }

        let keep_metric_names = self.keep_metric_names.unwrap_or(opts.keep_metric_names);
        if keep_metric_names {
            if opts.keep_input {
                return Err(StreamAggrError::InvalidConfiguration(
                    "`keep_input` and `keep_metric_names` options cannot be enabled at the same time, \
                     since it may result in time series collision"
                        .to_string(),
                ));
            }
            if self.outputs.len() != 1 {
                return Err(StreamAggrError::InvalidConfiguration(format!(
                    "`outputs` list must contain only a single entry if `keep_metric_names` is set; got {:?}",
                    self.outputs
                )));
            }
            let output = self.outputs[0].trim();
            if output == "histogram_bucket" || (output.starts_with("quantiles(") && output.contains(',')) {
                return Err(StreamAggrError::InvalidConfiguration(format!(
                    "`keep_metric_names` cannot be applied to `outputs: {:?}`, since they can generate multiple time series",
                    self.outputs
                )));
            }
        }

        let outputs = parse_outputs(&self.outputs)?;

        let enable_windows = self.enable_windows.unwrap_or(opts.enable_windows) && dedup_interval_ms == 0;

        let mut suffix = format!(":{interval_str}");
        let by_labels = remove_underscore_name(&by);
        if !by_labels.is_empty() {
            suffix.push_str("_by_");
            suffix.push_str(&by_labels.join("_"));
        }
        let without_labels = remove_underscore_name(&without);
        if !without_labels.is_empty() {
            suffix.push_str("_without_");
            suffix.push_str(&without_labels.join("_"));
        }
        suffix.push('_');

        let name = match self.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => "none".to_string(),
        };

        Ok(AggregatorSettings {
            name,
            match_expr: self.match_expr.clone().filter(|m| !m.is_empty()),
            interval_ms,
            dedup_interval_ms,
            staleness_interval_ms,
            ignore_first_sample_interval_ms,
            outputs,
            keep_metric_names,
            ignore_old_samples: self.ignore_old_samples.unwrap_or(opts.ignore_old_samples),
            ignore_first_intervals: self.ignore_first_intervals.unwrap_or(opts.ignore_first_intervals),
            enable_windows,
            align_flush_to_interval: !self
                .no_align_flush_to_interval
                .unwrap_or(opts.no_align_flush_to_interval),
            flush_on_shutdown: self.flush_on_shutdown.unwrap_or(opts.flush_on_shutdown),
            by,
            without,
            aggregate_only_by_time,
            drop_input_labels,
            input_relabeling,
            output_relabeling,
            suffix,
        })
    }
}
