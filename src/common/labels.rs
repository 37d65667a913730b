use enquote::enquote;

use super::types::{Label, METRIC_NAME_LABEL};

/// labels_to_string returns Prometheus string representation for the given labels.
///
/// Labels in the returned string are sorted by name,
/// while the __name__ label is put in front of {} labels.
pub fn labels_to_string(labels: &[Label]) -> String {
    let mut labels_copy: Vec<&Label> = Vec::with_capacity(labels.len());
    let mut mname = "";
    let mut capacity = 2;
    for label in labels.iter() {
        if label.name == METRIC_NAME_LABEL {
            mname = &label.value;
            capacity += label.value.len();
        } else {
            capacity += label.name.len() + label.value.len() + 4;
            labels_copy.push(label);
        }
    }
    if !mname.is_empty() && labels_copy.is_empty() {
        return mname.to_string();
    }
    labels_copy.sort();
    let mut b = String::with_capacity(capacity);
    b.push_str(mname);
    b.push('{');
    for (i, label) in labels_copy.iter().enumerate() {
        b.push_str(&label.name);
        b.push('=');
        b.push_str(&enquote('"', &label.value));
        if i + 1 < labels_copy.len() {
            b.push(',');
        }
    }
    b.push('}');
    b
}

pub fn get_label_value<'a>(labels: &'a [Label], name: &str) -> &'a str {
    labels
        .iter()
        .find(|label| label.name == name)
        .map(|label| label.value.as_str())
        .unwrap_or("")
}

pub fn sort_labels(labels: &mut [Label]) {
    labels.sort_by(|a, b| a.name.cmp(&b.name));
}

/// Removes the labels with the given names, preserving order.
pub fn drop_series_labels(dst: &mut Vec<Label>, src: &[Label], drop_labels: &[String]) {
    dst.extend(
        src.iter()
            .filter(|label| !drop_labels.contains(&label.name))
            .cloned(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_to_string() {
        assert_eq!(labels_to_string(&[]), "{}");
        assert_eq!(labels_to_string(&[Label::new("__name__", "foo")]), "foo");
        let labels = vec![
            Label::new("job", "x"),
            Label::new("__name__", "foo"),
            Label::new("a", "b\"c"),
        ];
        assert_eq!(labels_to_string(&labels), r#"foo{a="b\"c",job="x"}"#);
        assert_eq!(labels_to_string(&[Label::new("a", "1")]), r#"{a="1"}"#);
    }

    #[test]
    fn test_drop_series_labels() {
        let src = vec![Label::new("a", "1"), Label::new("b", "2"), Label::new("c", "3")];
        let mut dst = vec![];
        drop_series_labels(&mut dst, &src, &["b".to_string()]);
        assert_eq!(dst, vec![Label::new("a", "1"), Label::new("c", "3")]);
    }
}
