mod aggr_outputs;
mod avg;
mod bloom;
mod config;
mod count_samples;
mod count_series;
mod dedup;
mod deduplicator;
mod fast_histogram;
mod flush_ctx;
mod histogram_bucket;
mod histogram_merge;
mod last;
mod max;
mod min;
mod quantiles;
mod rate;
mod stddev;
mod stream_aggr;
mod sum_last;
mod sum_samples;
mod total;
mod unique_samples;
mod utils;
mod vm_histogram;

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;

use aggr_outputs::{AggrValue, SharedState};
use avg::AvgAggrValue;
use count_samples::CountSamplesAggrValue;
use count_series::{CountSeriesAggrValue, CountSeriesBloomAggrValue};
use histogram_bucket::HistogramBucketAggrValue;
use histogram_merge::HistogramMergeAggrValue;
use last::LastAggrValue;
use max::MaxAggrValue;
use min::MinAggrValue;
use quantiles::QuantilesAggrValue;
use rate::RateAggrValue;
use stddev::StddevAggrValue;
use sum_last::SumLastAggrValue;
use sum_samples::SumSamplesAggrValue;
use total::TotalAggrValue;
use unique_samples::UniqueSamplesAggrValue;

pub use config::{Config, Options};
pub use deduplicator::Deduplicator;
pub use stream_aggr::{Aggregator, AggregatorStats, Aggregators};

use crate::common::types::TimeSeries;
use crate::error::{StreamAggrError, StreamAggrResult};

/// PushFunc receives the aggregated series. The series are owned by the callee.
pub type PushFunc = Arc<dyn Fn(Vec<TimeSeries>) + Send + Sync>;

/// A sample addressed by its packed input/output key.
#[derive(Debug, Clone)]
pub(crate) struct PushSample {
    pub key: Vec<u8>,
    pub value: f64,
    pub timestamp: i64,
}

/// Supported outputs. `quantiles(phi1, ..., phiN)` carries its phis.
pub const SUPPORTED_OUTPUTS: [&str; 22] = [
    "avg",
    "count_samples",
    "count_series",
    "count_series_bloom",
    "histogram_bucket",
    "histogram_merge",
    "increase",
    "increase_prometheus",
    "last",
    "max",
    "min",
    "quantiles(phi1, ..., phiN)",
    "rate_avg",
    "rate_sum",
    "stddev",
    "stdvar",
    "sum_last",
    "sum_samples",
    "sum_series",
    "total",
    "total_prometheus",
    "unique_samples",
];

#[derive(Debug, Clone, PartialEq)]
pub enum AggregationOutput {
    Avg,
    CountSamples,
    CountSeries,
    CountSeriesBloom,
    HistogramBucket,
    HistogramMerge,
    Increase,
    IncreasePrometheus,
    Last,
    Max,
    Min,
    Quantiles(Vec<f64>),
    RateAvg,
    RateSum,
    Stddev,
    Stdvar,
    SumLast,
    SumSamples,
    SumSeries,
    Total,
    TotalPrometheus,
    UniqueSamples,
}

impl AggregationOutput {
    /// Returns the function part of the output metric name.
    pub fn suffix(&self) -> &'static str {
        use AggregationOutput::*;
        match self {
            Avg => "avg",
            CountSamples => "count_samples",
            CountSeries => "count_series",
            CountSeriesBloom => "count_series_bloom",
            HistogramBucket => "histogram_bucket",
            HistogramMerge => "histogram_merge",
            Increase => "increase",
            IncreasePrometheus => "increase_prometheus",
            Last => "last",
            Max => "max",
            Min => "min",
            Quantiles(_) => "quantiles",
            RateAvg => "rate_avg",
            RateSum => "rate_sum",
            Stddev => "stddev",
            Stdvar => "stdvar",
            SumLast => "sum_last",
            SumSamples => "sum_samples",
            SumSeries => "sum_series",
            Total => "total",
            TotalPrometheus => "total_prometheus",
            UniqueSamples => "unique_samples",
        }
    }

    /// Parses a single entry of the `outputs` list.
    pub fn parse(output: &str) -> StreamAggrResult<Self> {
        use AggregationOutput::*;
        let output = output.trim();
        if let Some(args) = output.strip_prefix("quantiles(") {
            let Some(args) = args.strip_suffix(')') else {
                return Err(StreamAggrError::InvalidConfiguration(
                    "missing closing brace for `quantiles()` output".to_string(),
                ));
            };
            return parse_phis(args).map(Quantiles);
        }
        let res = match output {
            "avg" => Avg,
            "count_samples" => CountSamples,
            "count_series" => CountSeries,
            "count_series_bloom" => CountSeriesBloom,
            "histogram_bucket" => HistogramBucket,
            "histogram_merge" => HistogramMerge,
            "increase" => Increase,
            "increase_prometheus" => IncreasePrometheus,
            "last" => Last,
            "max" => Max,
            "min" => Min,
            "rate_avg" => RateAvg,
            "rate_sum" => RateSum,
            "stddev" => Stddev,
            "stdvar" => Stdvar,
            "sum_last" => SumLast,
            "sum_samples" => SumSamples,
            "sum_series" => SumSeries,
            "total" => Total,
            "total_prometheus" => TotalPrometheus,
            "unique_samples" => UniqueSamples,
            _ => {
                return Err(StreamAggrError::UnknownOutput(format!(
                    "unsupported output={output:?}; supported values: {SUPPORTED_OUTPUTS:?}"
                )))
            }
        };
        Ok(res)
    }

    pub(crate) fn new_value(&self, shared: Option<SharedState>) -> Box<dyn AggrValue> {
        use AggregationOutput::*;
        match self {
            Avg => Box::<AvgAggrValue>::default(),
            CountSamples => Box::<CountSamplesAggrValue>::default(),
            CountSeries => Box::<CountSeriesAggrValue>::default(),
            CountSeriesBloom => Box::<CountSeriesBloomAggrValue>::default(),
            HistogramBucket => Box::new(HistogramBucketAggrValue::new(shared)),
            HistogramMerge => Box::new(HistogramMergeAggrValue::new(shared)),
            Increase => Box::new(TotalAggrValue::new(shared, true, true)),
            IncreasePrometheus => Box::new(TotalAggrValue::new(shared, true, false)),
            Last => Box::<LastAggrValue>::default(),
            Max => Box::<MaxAggrValue>::default(),
            Min => Box::<MinAggrValue>::default(),
            Quantiles(phis) => Box::new(QuantilesAggrValue::new(phis.clone())),
            RateAvg => Box::new(RateAggrValue::new(shared, true)),
            RateSum => Box::new(RateAggrValue::new(shared, false)),
            Stddev => Box::new(StddevAggrValue::new(true)),
            Stdvar => Box::new(StddevAggrValue::new(false)),
            SumLast => Box::new(SumLastAggrValue::new(shared, "sum_last")),
            SumSamples => Box::<SumSamplesAggrValue>::default(),
            SumSeries => Box::new(SumLastAggrValue::new(shared, "sum_series")),
            Total => Box::new(TotalAggrValue::new(shared, false, true)),
            TotalPrometheus => Box::new(TotalAggrValue::new(shared, false, false)),
            UniqueSamples => Box::<UniqueSamplesAggrValue>::default(),
        }
    }
}

fn parse_phis(args: &str) -> StreamAggrResult<Vec<f64>> {
    if args.trim().is_empty() {
        return Err(StreamAggrError::InvalidConfiguration(
            "`quantiles()` must contain at least one phi".to_string(),
        ));
    }
    let mut phis = Vec::new();
    for arg in args.split(',') {
        let arg = arg.trim();
        let phi: f64 = arg.parse().map_err(|e| {
            StreamAggrError::InvalidConfiguration(format!(
                "cannot parse phi={arg:?} for quantiles({args}): {e}"
            ))
        })?;
        if !(0.0..=1.0).contains(&phi) {
            return Err(StreamAggrError::InvalidConfiguration(format!(
                "phi inside quantiles({args}) must be in the range [0..1]; got {phi}"
            )));
        }
        phis.push(phi);
    }
    Ok(phis)
}

/// Parses the `outputs` list, rejecting duplicates.
pub(crate) fn parse_outputs(outputs: &[String]) -> StreamAggrResult<Vec<AggregationOutput>> {
    if outputs.is_empty() {
        return Err(StreamAggrError::InvalidConfiguration(format!(
            "`outputs` list must contain at least a single entry from the list {SUPPORTED_OUTPUTS:?}"
        )));
    }
    let mut seen = HashSet::new();
    let mut result = Vec::with_capacity(outputs.len());
    for output in outputs {
        let parsed = AggregationOutput::parse(output)?;
        if !seen.insert(parsed.suffix()) {
            if matches!(parsed, AggregationOutput::Quantiles(_)) {
                return Err(StreamAggrError::InvalidConfiguration(
                    "`outputs` list contains duplicated `quantiles()` function; combine multiple phis like `quantiles(0.5, 0.9)`".to_string(),
                ));
            }
            return Err(StreamAggrError::InvalidConfiguration(format!(
                "`outputs` list contains duplicated aggregation function: {output}"
            )));
        }
        result.push(parsed);
    }
    Ok(result)
}

impl Display for AggregationOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationOutput::Quantiles(phis) => {
                write!(f, "quantiles(")?;
                for (i, phi) in phis.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{phi}")?;
                }
                write!(f, ")")
            }
            other => write!(f, "{}", other.suffix()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("avg", AggregationOutput::Avg)]
    #[test_case(" total ", AggregationOutput::Total)]
    #[test_case("sum_series", AggregationOutput::SumSeries)]
    #[test_case("quantiles(0.5, 0.9)", AggregationOutput::Quantiles(vec![0.5, 0.9]))]
    #[test_case("quantiles(0,1)", AggregationOutput::Quantiles(vec![0.0, 1.0]))]
    fn test_parse_output(s: &str, expected: AggregationOutput) {
        assert_eq!(AggregationOutput::parse(s).unwrap(), expected);
    }

    #[test_case("quantiles("; "missing closing brace")]
    #[test_case("quantiles()"; "empty phis")]
    #[test_case("quantiles(foo)"; "invalid phi")]
    #[test_case("quantiles(-0.5)"; "negative phi")]
    #[test_case("quantiles(1.5)"; "phi above one")]
    fn test_parse_quantiles_failure(s: &str) {
        let err = AggregationOutput::parse(s).unwrap_err();
        assert!(matches!(err, StreamAggrError::InvalidConfiguration(_)), "unexpected error {err:?}");
    }

    #[test]
    fn test_parse_unknown_output() {
        let err = AggregationOutput::parse("foobar").unwrap_err();
        assert!(matches!(err, StreamAggrError::UnknownOutput(_)), "unexpected error {err:?}");
    }

    #[test]
    fn test_parse_outputs_duplicates() {
        let to_strings = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(parse_outputs(&[]).is_err());
        assert!(parse_outputs(&to_strings(&["total", "total"])).is_err());
        assert!(parse_outputs(&to_strings(&["quantiles(0.5)", "quantiles(0.9)"])).is_err());
        let outputs = parse_outputs(&to_strings(&["total", "quantiles(0.5)", "sum_last", "sum_series"])).unwrap();
        assert_eq!(outputs.len(), 4);
    }

    #[test]
    fn test_display_round_trip() {
        for output in SUPPORTED_OUTPUTS.iter().filter(|s| !s.starts_with("quantiles")) {
            let parsed = AggregationOutput::parse(output).unwrap();
            assert_eq!(parsed.to_string(), *output);
        }
        let quantiles = AggregationOutput::Quantiles(vec![0.5, 1.0]);
        assert_eq!(quantiles.to_string(), "quantiles(0.5, 1)");
        assert_eq!(AggregationOutput::parse(&quantiles.to_string()).unwrap(), quantiles);
    }
}
