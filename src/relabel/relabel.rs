use std::fmt;
use std::fmt::Display;

use regex::Regex;
use xxhash_rust::xxh3::xxh3_64;

use super::utils::{
    are_equal_label_values, concat_label_values, contains_all_label_values,
    fill_label_references, set_label_value,
};
use super::{IfExpression, RelabelAction};
use crate::common::labels::get_label_value;
use crate::common::regex_util::PromRegex;
use crate::common::types::Label;

/// ParsedRelabelConfig contains parsed `relabel_config`.
///
/// See https://prometheus.io/docs/prometheus/latest/configuration/configuration/#relabel_config
#[derive(Debug, Clone)]
pub struct ParsedRelabelConfig {
    /// rule_original contains the original relabeling rule for the given ParsedRelabelConfig.
    pub rule_original: String,

    pub source_labels: Vec<String>,
    pub separator: String,
    pub target_label: String,
    pub regex_anchored: Regex,
    pub modulus: u64,
    pub replacement: String,
    pub action: RelabelAction,
    pub if_expr: Option<IfExpression>,

    pub regex: PromRegex,
    pub regex_original: Regex,

    pub is_default_regex: bool,
    pub has_capture_group_in_target_label: bool,
    pub has_capture_group_in_replacement: bool,
    pub has_label_reference_in_replacement: bool,
}

impl ParsedRelabelConfig {
    /// apply applies relabeling according to prc to labels[labels_offset..].
    ///
    /// See https://prometheus.io/docs/prometheus/latest/configuration/configuration/#relabel_config
    pub fn apply(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        use RelabelAction::*;
        if let Some(if_expr) = &self.if_expr {
            if !if_expr.is_match(&labels[labels_offset..]) {
                if self.action == Keep {
                    // Drop the target on `if` mismatch for `action: keep`
                    labels.truncate(labels_offset);
                }
                // Do not apply prc actions on `if` mismatch.
                return;
            }
        }
        match self.action {
            Replace => handle_replace(self, labels, labels_offset),
            ReplaceAll => self.replace_all(labels, labels_offset),
            Drop => self.handle_drop(labels, labels_offset),
            DropEqual => self.drop_equal(labels, labels_offset),
            DropIfContains => self.drop_if_contains(labels, labels_offset),
            DropIfEqual => self.drop_if_equal(labels, labels_offset),
            HashMod => self.hashmod(labels, labels_offset),
            Keep => self.keep(labels, labels_offset),
            KeepEqual => self.keep_equal(labels, labels_offset),
            KeepIfContains => self.keep_if_contains(labels, labels_offset),
            KeepIfEqual => self.keep_if_equal(labels, labels_offset),
            Lowercase => self.lowercase(labels, labels_offset),
            Uppercase => self.uppercase(labels, labels_offset),
            LabelMap => self.label_map(labels, labels_offset),
            LabelMapAll => self.label_map_all(labels, labels_offset),
            LabelDrop => self.label_drop(labels, labels_offset),
            LabelKeep => self.label_keep(labels, labels_offset),
            // rewritten into keep/drop at parse time
            KeepMetrics | DropMetrics => {
                panic!("BUG: unexpected action at apply: {}", self.action)
            }
        }
    }

    /// Drop the entry if `source_labels` joined with `separator` matches `regex`
    fn handle_drop(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        if self.is_default_regex {
            // Fast path for the case with `if` and without explicitly set `regex`:
            //
            // - action: drop
            //   if: 'some{label=~"filters"}'
            //
            labels.truncate(labels_offset);
            return;
        }
        let buf = concat_label_values(&labels[labels_offset..], &self.source_labels, &self.separator);
        if self.regex.match_string(&buf) {
            labels.truncate(labels_offset);
        }
    }

    fn keep(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        // Keep the entry if `source_labels` joined with `separator` matches `regex`
        if self.is_default_regex {
            // Fast path for the case with `if` and without explicitly set `regex`:
            //
            // - action: keep
            //   if: 'some{label=~"filters"}'
            //
            return;
        }
        let buf = concat_label_values(&labels[labels_offset..], &self.source_labels, &self.separator);
        if !self.regex.match_string(&buf) {
            labels.truncate(labels_offset);
        }
    }

    /// Drop the entry if `source_labels` joined with `separator` matches `target_label`
    fn drop_equal(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        let src = &labels[labels_offset..];
        let buf = concat_label_values(src, &self.source_labels, &self.separator);
        if buf == get_label_value(src, &self.target_label) {
            labels.truncate(labels_offset);
        }
    }

    /// Keep the entry if `source_labels` joined with `separator` matches `target_label`
    fn keep_equal(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        let src = &labels[labels_offset..];
        let buf = concat_label_values(src, &self.source_labels, &self.separator);
        if buf != get_label_value(src, &self.target_label) {
            labels.truncate(labels_offset);
        }
    }

    /// Drop the entry if target_label contains all the label values listed in source_labels.
    /// For example, the following relabeling rule would drop the entry if __meta_consul_tags
    /// contains values of __meta_required_tag1 and __meta_required_tag2:
    ///
    ///   - action: drop_if_contains
    ///     target_label: __meta_consul_tags
    ///     source_labels: [__meta_required_tag1, __meta_required_tag2]
    ///
    fn drop_if_contains(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        let src = &labels[labels_offset..];
        if contains_all_label_values(src, &self.target_label, &self.source_labels) {
            labels.truncate(labels_offset);
        }
    }

    fn keep_if_contains(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        let src = &labels[labels_offset..];
        if !contains_all_label_values(src, &self.target_label, &self.source_labels) {
            labels.truncate(labels_offset);
        }
    }

    /// Drop the entry if all the label values in source_labels are equal.
    /// For example:
    ///
    ///   - source_labels: [foo, bar]
    ///     action: drop_if_equal
    ///
    /// Would drop the entry if `foo` value equals `bar` value
    fn drop_if_equal(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        if are_equal_label_values(&labels[labels_offset..], &self.source_labels) {
            labels.truncate(labels_offset);
        }
    }

    fn keep_if_equal(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        if !are_equal_label_values(&labels[labels_offset..], &self.source_labels) {
            labels.truncate(labels_offset);
        }
    }

    /// Store the hashmod of `source_labels` joined with `separator` at `target_label`
    fn hashmod(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        let buf = concat_label_values(&labels[labels_offset..], &self.source_labels, &self.separator);
        let hash_mod = xxh3_64(buf.as_bytes()) % self.modulus;
        set_label_value(labels, labels_offset, &self.target_label, hash_mod.to_string())
    }

    fn lowercase(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        let buf = concat_label_values(&labels[labels_offset..], &self.source_labels, &self.separator);
        set_label_value(labels, labels_offset, &self.target_label, buf.to_lowercase())
    }

    fn uppercase(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        let buf = concat_label_values(&labels[labels_offset..], &self.source_labels, &self.separator);
        set_label_value(labels, labels_offset, &self.target_label, buf.to_uppercase())
    }

    /// Replace all the occurrences of `regex` at `source_labels` joined with `separator` with the `replacement`
    /// and store the result at `target_label`
    fn replace_all(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        let buf = concat_label_values(&labels[labels_offset..], &self.source_labels, &self.separator);
        let value_str = self.replace_string_submatches(&buf);
        if value_str != buf {
            set_label_value(labels, labels_offset, &self.target_label, value_str)
        }
    }

    /// Copy labels with names matching `regex` to the names produced by `replacement`
    fn label_map(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        let renamed: Vec<(String, String)> = labels[labels_offset..]
            .iter()
            .filter_map(|label| {
                let name = self.replace_full_string(&label.name);
                (name != label.name).then(|| (name, label.value.clone()))
            })
            .collect();
        for (name, value) in renamed {
            set_label_value(labels, labels_offset, &name, value)
        }
    }

    /// replace all the occurrences of `regex` at label names with `replacement`
    fn label_map_all(&self, labels: &mut [Label], labels_offset: usize) {
        for label in labels[labels_offset..].iter_mut() {
            label.name = self.replace_string_submatches(&label.name)
        }
    }

    /// Drop all the labels matching `regex`
    fn label_drop(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        let mut i = 0;
        labels.retain(|label| {
            let keep = i < labels_offset || !self.regex.match_string(&label.name);
            i += 1;
            keep
        })
    }

    /// Keep all the labels matching `regex`
    fn label_keep(&self, labels: &mut Vec<Label>, labels_offset: usize) {
        let mut i = 0;
        labels.retain(|label| {
            let keep = i < labels_offset || self.regex.match_string(&label.name);
            i += 1;
            keep
        })
    }

    /// replaces s with the replacement if s matches '^regex$'.
    ///
    /// s is returned as is if it doesn't match '^regex$'.
    pub(crate) fn replace_full_string(&self, s: &str) -> String {
        if !self.regex.match_string(s) {
            // Fast path - regex mismatch
            return s.to_string();
        }
        if !self.has_capture_group_in_replacement {
            return self.replacement.clone();
        }
        self.expand_capture_groups(&self.replacement, s)
    }

    /// replaces all the regex matches with the replacement in s.
    pub(crate) fn replace_string_submatches(&self, s: &str) -> String {
        self.regex_original
            .replace_all(s, self.replacement.as_str())
            .into_owned()
    }

    fn expand_capture_groups(&self, template: &str, source: &str) -> String {
        match self.regex_anchored.captures(source) {
            Some(captures) => {
                let mut s = String::with_capacity(template.len() + 16);
                captures.expand(template, &mut s);
                s
            }
            None => source.to_string(),
        }
    }
}

impl Display for ParsedRelabelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rule_original)
    }
}

fn handle_replace(prc: &ParsedRelabelConfig, labels: &mut Vec<Label>, labels_offset: usize) {
    // Store `replacement` at `target_label` if the `regex` matches `source_labels` joined with `separator`
    let replacement = if prc.has_label_reference_in_replacement {
        let mut buf = String::with_capacity(128);
        // Fill {{labelName}} references in the replacement
        fill_label_references(&mut buf, &prc.replacement, &labels[labels_offset..]);
        buf
    } else {
        prc.replacement.clone()
    };

    let buf = concat_label_values(&labels[labels_offset..], &prc.source_labels, &prc.separator);
    if prc.is_default_regex && !prc.has_capture_group_in_target_label {
        if replacement == "$1" {
            // Fast path for the rule that copies source label values to destination:
            // - source_labels: [...]
            //   target_label: foobar
            return set_label_value(labels, labels_offset, &prc.target_label, buf);
        }
        if !replacement.contains('$') {
            // Fast path for the rule that sets label value:
            // - target_label: foobar
            //   replacement: something-here
            return set_label_value(labels, labels_offset, &prc.target_label, replacement);
        }
    }
    let Some(captures) = prc.regex_anchored.captures(&buf) else {
        // Fast path - regexp mismatch.
        return;
    };
    let mut value_str = String::with_capacity(replacement.len() + 16);
    captures.expand(&replacement, &mut value_str);
    let name_str = if prc.has_capture_group_in_target_label {
        // Slow path - target_label contains regex capture groups, so the target_label
        // must be calculated from the regex match.
        let mut name = String::with_capacity(prc.target_label.len() + 16);
        captures.expand(&prc.target_label, &mut name);
        name
    } else {
        prc.target_label.clone()
    };
    set_label_value(labels, labels_offset, &name_str, value_str)
}
