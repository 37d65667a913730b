use crate::common::labels::get_label_value;
use crate::common::types::Label;

pub(super) fn concat_label_values(labels: &[Label], label_names: &[String], separator: &str) -> String {
    if label_names.is_empty() {
        return String::new();
    }
    let mut dst = String::with_capacity(64);
    for (i, label_name) in label_names.iter().enumerate() {
        if i > 0 {
            dst.push_str(separator);
        }
        dst.push_str(get_label_value(labels, label_name));
    }
    dst
}

pub(super) fn set_label_value(labels: &mut Vec<Label>, labels_offset: usize, name: &str, value: String) {
    if let Some(label) = labels[labels_offset..].iter_mut().find(|l| l.name == name) {
        label.value = value;
        return;
    }
    labels.push(Label {
        name: name.to_string(),
        value,
    })
}

pub(super) fn are_equal_label_values(labels: &[Label], label_names: &[String]) -> bool {
    if label_names.len() < 2 {
        return false;
    }
    let label_value = get_label_value(labels, &label_names[0]);
    label_names[1..]
        .iter()
        .all(|name| get_label_value(labels, name) == label_value)
}

pub(super) fn contains_all_label_values(labels: &[Label], target_label: &str, source_labels: &[String]) -> bool {
    let target_label_value = get_label_value(labels, target_label);
    source_labels
        .iter()
        .all(|name| target_label_value.contains(get_label_value(labels, name)))
}

/// Replaces `{{label_name}}` references in replacement with the corresponding label values.
pub(super) fn fill_label_references(dst: &mut String, replacement: &str, labels: &[Label]) {
    let mut s = replacement;
    while !s.is_empty() {
        let Some(n) = s.find("{{") else {
            dst.push_str(s);
            return;
        };
        dst.push_str(&s[..n]);
        s = &s[n + 2..];
        let Some(n) = s.find("}}") else {
            dst.push_str("{{");
            dst.push_str(s);
            return;
        };
        let label_name = &s[..n];
        dst.push_str(get_label_value(labels, label_name));
        s = &s[n + 2..];
    }
}

pub(super) fn remove_empty_labels(labels: &mut Vec<Label>, labels_offset: usize) {
    let mut i = 0;
    labels.retain(|label| {
        let keep = i < labels_offset || (!label.name.is_empty() && !label.value.is_empty());
        i += 1;
        keep
    });
}
