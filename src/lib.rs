//! Streaming aggregation of labeled time series.
//!
//! Incoming samples are matched, relabeled and grouped by a label projection, then reduced by
//! one or more aggregate functions over a fixed interval. Aggregated series are handed to a
//! caller supplied push callback once per interval.
mod common;
mod error;
pub mod relabel;
pub mod stream_aggregation;

#[cfg(test)]
mod tests;

pub use common::labels::labels_to_string;
pub use common::types::{Label, Sample, TimeSeries, METRIC_NAME_LABEL};
pub use common::time::{current_time_millis, parse_duration};
pub use error::{StreamAggrError, StreamAggrResult};
pub use stream_aggregation::{
    Aggregator, AggregatorStats, Aggregators, Config, Deduplicator, Options, PushFunc,
};
