use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::relabel::ParsedRelabelConfig;
use super::utils::remove_empty_labels;
use super::IfExpression;
use crate::common::regex_util::{remove_start_end_anchors, PromRegex};
use crate::common::types::{Label, METRIC_NAME_LABEL};
use crate::error::{StreamAggrError, StreamAggrResult};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RelabelAction {
    #[default]
    Replace,
    ReplaceAll,
    KeepIfContains,
    DropIfContains,
    KeepIfEqual,
    DropIfEqual,
    KeepEqual,
    DropEqual,
    Keep,
    Drop,
    HashMod,
    KeepMetrics,
    DropMetrics,
    Uppercase,
    Lowercase,
    LabelMap,
    LabelMapAll,
    LabelDrop,
    LabelKeep,
}

impl Display for RelabelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use RelabelAction::*;
        let s = match self {
            Replace => "replace",
            ReplaceAll => "replace_all",
            KeepIfContains => "keep_if_contains",
            DropIfContains => "drop_if_contains",
            KeepIfEqual => "keep_if_equal",
            DropIfEqual => "drop_if_equal",
            KeepEqual => "keepequal",
            DropEqual => "dropequal",
            Keep => "keep",
            Drop => "drop",
            HashMod => "hashmod",
            KeepMetrics => "keep_metrics",
            DropMetrics => "drop_metrics",
            Uppercase => "uppercase",
            Lowercase => "lowercase",
            LabelMap => "labelmap",
            LabelMapAll => "labelmap_all",
            LabelDrop => "labeldrop",
            LabelKeep => "labelkeep",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RelabelAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use RelabelAction::*;
        match s.to_lowercase().as_str() {
            "" | "replace" => Ok(Replace),
            "replace_all" => Ok(ReplaceAll),
            "keep_if_contains" => Ok(KeepIfContains),
            "drop_if_contains" => Ok(DropIfContains),
            "keep_if_equal" => Ok(KeepIfEqual),
            "drop_if_equal" => Ok(DropIfEqual),
            "keepequal" => Ok(KeepEqual),
            "dropequal" => Ok(DropEqual),
            "keep" => Ok(Keep),
            "drop" => Ok(Drop),
            "hashmod" => Ok(HashMod),
            "keep_metrics" => Ok(KeepMetrics),
            "drop_metrics" => Ok(DropMetrics),
            "uppercase" => Ok(Uppercase),
            "lowercase" => Ok(Lowercase),
            "labelmap" => Ok(LabelMap),
            "labelmap_all" => Ok(LabelMapAll),
            "labeldrop" => Ok(LabelDrop),
            "labelkeep" => Ok(LabelKeep),
            _ => Err(format!("unknown `action` {s:?}")),
        }
    }
}

/// RelabelConfig represents relabel config.
///
/// See https://prometheus.io/docs/prometheus/latest/configuration/configuration/#relabel_config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelabelConfig {
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_expr: Option<IfExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modulus: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

/// ParsedConfigs is an ordered list of relabeling rules.
#[derive(Debug, Clone, Default)]
pub struct ParsedConfigs(pub Vec<ParsedRelabelConfig>);

impl ParsedConfigs {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Applies the rules to labels[labels_offset..].
    ///
    /// labels are truncated to labels_offset if the series is dropped.
    pub fn apply(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        for prc in self.0.iter() {
            prc.apply(labels, labels_offset);
            if labels.len() == labels_offset {
                // All the labels have been removed.
                return;
            }
        }
        remove_empty_labels(labels, labels_offset);
    }
}

impl Display for ParsedConfigs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for prc in &self.0 {
            write!(f, "{prc}")?;
        }
        Ok(())
    }
}

/// parses relabel configs from the given YAML data.
pub fn parse_relabel_configs_data(data: &str) -> StreamAggrResult<ParsedConfigs> {
    let rcs: Vec<RelabelConfig> = serde_yaml::from_str(data).map_err(|e| {
        StreamAggrError::InvalidRelabelConfig(format!("cannot parse relabel configs from data: {e}"))
    })?;
    parse_relabel_configs(&rcs)
}

pub fn parse_relabel_configs(rcs: &[RelabelConfig]) -> StreamAggrResult<ParsedConfigs> {
    let mut prcs: Vec<ParsedRelabelConfig> = Vec::with_capacity(rcs.len());
    for (i, item) in rcs.iter().enumerate() {
        let prc = parse_relabel_config(item).map_err(|err| {
            StreamAggrError::InvalidRelabelConfig(format!(
                "error when parsing `relabel_config` #{}: {err}",
                i + 1
            ))
        })?;
        prcs.push(prc);
    }
    Ok(ParsedConfigs(prcs))
}

const DEFAULT_REGEX: &str = "(.*)";

fn is_default_regex(expr: &str) -> bool {
    expr == DEFAULT_REGEX || expr == ".*"
}

pub fn parse_relabel_config(rc: &RelabelConfig) -> Result<ParsedRelabelConfig, String> {
    use RelabelAction::*;

    let mut action: RelabelAction = rc.action.as_deref().unwrap_or("replace").parse()?;
    let mut source_labels = rc.source_labels.clone();
    let separator = rc.separator.clone().unwrap_or_else(|| ";".to_string());
    let target_label = rc.target_label.clone().unwrap_or_default();
    let replacement = rc.replacement.clone().unwrap_or_else(|| "$1".to_string());
    let modulus = rc.modulus.unwrap_or_default();
    let has_regex = rc.regex.as_deref().is_some_and(|r| !r.is_empty());

    let regex_str = match rc.regex.as_deref() {
        Some(r) if !r.is_empty() => remove_start_end_anchors(r).to_string(),
        _ => DEFAULT_REGEX.to_string(),
    };

    match action {
        Replace => {
            if target_label.is_empty() {
                return Err("missing `target_label` for `action=replace`".to_string());
            }
        }
        ReplaceAll => {
            if source_labels.is_empty() {
                return Err("missing `source_labels` for `action=replace_all`".to_string());
            }
            if target_label.is_empty() {
                return Err("missing `target_label` for `action=replace_all`".to_string());
            }
        }
        KeepIfContains | DropIfContains => {
            if target_label.is_empty() {
                return Err(format!("`target_label` must be set for `action={action}`"));
            }
            if source_labels.is_empty() {
                return Err(format!("`source_labels` must be set for `action={action}`"));
            }
            if has_regex {
                return Err(format!("`regex` cannot be used for `action={action}`"));
            }
        }
        KeepIfEqual | DropIfEqual => {
            if source_labels.len() < 2 {
                return Err(format!(
                    "`source_labels` must contain at least two entries for `action={action}`; got {source_labels:?}"
                ));
            }
            if !target_label.is_empty() {
                return Err(format!("`target_label` cannot be used for `action={action}`"));
            }
            if has_regex {
                return Err(format!("`regex` cannot be used for `action={action}`"));
            }
        }
        KeepEqual | DropEqual => {
            if target_label.is_empty() {
                return Err(format!("missing `target_label` for `action={action}`"));
            }
            if has_regex {
                return Err(format!("`regex` cannot be used for `action={action}`"));
            }
        }
        Keep | Drop => {
            if source_labels.is_empty() && rc.if_expr.is_none() {
                return Err(format!("missing `source_labels` for `action={action}`"));
            }
        }
        HashMod => {
            if source_labels.is_empty() {
                return Err("missing `source_labels` for `action=hashmod`".to_string());
            }
            if target_label.is_empty() {
                return Err("missing `target_label` for `action=hashmod`".to_string());
            }
            if modulus < 1 {
                return Err(format!(
                    "unexpected `modulus` for `action=hashmod`: {modulus}; must be greater than 0"
                ));
            }
        }
        KeepMetrics | DropMetrics => {
            if !has_regex && rc.if_expr.is_none() {
                return Err(format!("`regex` must be non-empty for `action={action}`"));
            }
            if !source_labels.is_empty() {
                return Err(format!(
                    "`source_labels` must be empty for `action={action}`; got {source_labels:?}"
                ));
            }
            source_labels = vec![METRIC_NAME_LABEL.to_string()];
            action = if action == KeepMetrics { Keep } else { Drop };
        }
        Uppercase | Lowercase => {
            if source_labels.is_empty() {
                return Err(format!("missing `source_labels` for `action={action}`"));
            }
            if target_label.is_empty() {
                return Err(format!("missing `target_label` for `action={action}`"));
            }
        }
        LabelMap | LabelMapAll | LabelDrop | LabelKeep => {
            if !source_labels.is_empty() {
                return Err(format!("`source_labels` cannot be used with `action={action}`"));
            }
            if !target_label.is_empty() && action != LabelMap {
                return Err(format!("`target_label` cannot be used with `action={action}`"));
            }
        }
    }

    let regex_anchored = Regex::new(&format!("^(?:{regex_str})$"))
        .map_err(|e| format!("cannot parse `regex` {regex_str:?}: {e}"))?;
    let regex_original = Regex::new(&regex_str)
        .map_err(|e| format!("cannot parse `regex` {regex_str:?}: {e}"))?;
    let prom_regex = PromRegex::new(&regex_str)
        .map_err(|e| format!("cannot parse `regex` {regex_str:?}: {e}"))?;

    let rule_original = serde_yaml::to_string(rc)
        .map_err(|e| format!("cannot marshal relabel config: {e}"))?;

    Ok(ParsedRelabelConfig {
        rule_original,
        has_capture_group_in_target_label: target_label.contains('$'),
        has_capture_group_in_replacement: replacement.contains('$'),
        has_label_reference_in_replacement: replacement.contains("{{"),
        is_default_regex: is_default_regex(&regex_str),
        source_labels,
        separator,
        target_label,
        regex_anchored,
        regex_original,
        regex: prom_regex,
        modulus,
        replacement,
        action,
        if_expr: rc.if_expr.clone(),
    })
}
