use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const METRIC_NAME_LABEL: &str = "__name__";

pub type Timestamp = i64;

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Label {
            name: name.into(),
            value: value.into(),
        }
    }

    pub(crate) fn size_bytes(&self) -> usize {
        std::mem::size_of::<Label>() + self.name.len() + self.value.len()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, enquote::enquote('"', &self.value))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: Timestamp,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Sample { timestamp, value }
    }
}

impl PartialOrd for Sample {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.timestamp.cmp(&other.timestamp) {
            Ordering::Equal => self.value.partial_cmp(&other.value),
            ord => Some(ord),
        }
    }
}

/// A labeled series together with its samples.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub labels: Vec<Label>,
    pub samples: Vec<Sample>,
}

impl TimeSeries {
    pub fn new(labels: Vec<Label>, samples: Vec<Sample>) -> Self {
        TimeSeries { labels, samples }
    }
}
