use std::fmt;

use crate::common::regex_util::PromRegex;
use crate::common::types::Label;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelFilterOp {
    Equal,
    NotEqual,
    MatchRegexp,
    NotMatchRegexp,
}

impl LabelFilterOp {
    pub fn is_regex(&self) -> bool {
        matches!(self, LabelFilterOp::MatchRegexp | LabelFilterOp::NotMatchRegexp)
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, LabelFilterOp::NotEqual | LabelFilterOp::NotMatchRegexp)
    }
}

impl fmt::Display for LabelFilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelFilterOp::Equal => write!(f, "="),
            LabelFilterOp::NotEqual => write!(f, "!="),
            LabelFilterOp::MatchRegexp => write!(f, "=~"),
            LabelFilterOp::NotMatchRegexp => write!(f, "!~"),
        }
    }
}

impl TryFrom<&str> for LabelFilterOp {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "=" => Ok(LabelFilterOp::Equal),
            "!=" => Ok(LabelFilterOp::NotEqual),
            "=~" => Ok(LabelFilterOp::MatchRegexp),
            "!~" => Ok(LabelFilterOp::NotMatchRegexp),
            _ => Err(format!("unexpected operation for label filter: {s}")),
        }
    }
}

/// LabelFilter contains PromQL filter for `{label op "value"}`
#[derive(Debug, Clone, PartialEq)]
pub struct LabelFilter {
    pub label: String,
    pub op: LabelFilterOp,
    pub value: String,

    // re contains compiled regexp for `=~` and `!~` op.
    re: Option<PromRegex>,
}

impl LabelFilter {
    pub fn new(label: &str, op: LabelFilterOp, value: &str) -> Result<Self, String> {
        let re = if op.is_regex() {
            let re = PromRegex::new(value)
                .map_err(|e| format!("cannot parse regexp for {label}{op}{value:?}: {e}"))?;
            Some(re)
        } else {
            None
        };
        Ok(LabelFilter {
            label: label.to_string(),
            op,
            value: value.to_string(),
            re,
        })
    }

    pub fn matches(&self, labels: &[Label]) -> bool {
        match self.op {
            LabelFilterOp::Equal => self.equal_value(labels),
            LabelFilterOp::NotEqual => !self.equal_value(labels),
            LabelFilterOp::MatchRegexp => self.match_regexp(labels),
            LabelFilterOp::NotMatchRegexp => !self.match_regexp(labels),
        }
    }

    fn equal_value(&self, labels: &[Label]) -> bool {
        let mut label_name_matches = 0;
        for label in labels.iter().filter(|l| l.name == self.label) {
            label_name_matches += 1;
            if label.value == self.value {
                return true;
            }
        }
        // {non_existing_label=""} matches anything except a non-empty non_existing_label
        label_name_matches == 0 && self.value.is_empty()
    }

    fn match_regexp(&self, labels: &[Label]) -> bool {
        let Some(re) = &self.re else {
            return false;
        };
        let mut label_name_matches = 0;
        for label in labels.iter().filter(|l| l.name == self.label) {
            label_name_matches += 1;
            if re.match_string(&label.value) {
                return true;
            }
        }
        // {non_existing_label=~"something|"} matches the empty non_existing_label
        label_name_matches == 0 && re.match_string("")
    }
}

impl fmt::Display for LabelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.label, self.op, enquote::enquote('"', &self.value))
    }
}
