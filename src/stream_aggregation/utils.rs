use crate::common::label_compressor::{labels_compressor, marshal_var_uint64, unmarshal_var_uint64};
use crate::common::types::{Label, METRIC_NAME_LABEL};

pub type ConcurrentHashMap<K, V> = papaya::HashMap<K, V, ahash::RandomState>;

pub fn create_concurrent_hashmap<K, V>() -> ConcurrentHashMap<K, V> {
    ConcurrentHashMap::default()
}

/// Appends the metric name suffix to the `__name__` label in labels[offset..].
///
/// The suffix alone becomes the name if the series has no `__name__`.
pub(super) fn add_metric_suffix(
    labels: &mut Vec<Label>,
    offset: usize,
    first_suffix: &str,
    last_suffix: &str,
) {
    if let Some(label) = labels[offset..]
        .iter_mut()
        .find(|label| label.name == METRIC_NAME_LABEL)
    {
        label.value.reserve(first_suffix.len() + last_suffix.len());
        label.value.push_str(first_suffix);
        label.value.push_str(last_suffix);
        return;
    }
    // The __name__ isn't found. Add it
    let mut value = String::with_capacity(first_suffix.len() + last_suffix.len());
    value.push_str(first_suffix);
    value.push_str(last_suffix);
    labels.push(Label {
        name: METRIC_NAME_LABEL.to_string(),
        value,
    });
}

pub(super) fn add_missing_underscore_name(labels: &[String]) -> Vec<String> {
    let mut result = Vec::with_capacity(labels.len() + 1);
    result.push(METRIC_NAME_LABEL.to_string());
    result.extend(labels.iter().filter(|s| *s != METRIC_NAME_LABEL).cloned());
    result
}

pub(super) fn remove_underscore_name(labels: &[String]) -> Vec<String> {
    labels
        .iter()
        .filter(|x| *x != METRIC_NAME_LABEL)
        .cloned()
        .collect()
}

pub(super) fn sort_and_remove_duplicates(list: &[String]) -> Vec<String> {
    let mut sorted = list.to_vec();
    sorted.sort();
    sorted.dedup();
    sorted
}

/// Splits labels into the labels identifying the series inside its group (input) and the
/// labels identifying the group itself (output).
pub(super) fn get_input_output_labels(
    dst_input: &mut Vec<Label>,
    dst_output: &mut Vec<Label>,
    labels: &[Label],
    by: &[String],
    without: &[String],
) {
    if !without.is_empty() {
        for label in labels {
            if without.contains(&label.name) {
                dst_input.push(label.clone());
            } else {
                dst_output.push(label.clone());
            }
        }
    } else {
        for label in labels {
            if by.contains(&label.name) {
                dst_output.push(label.clone());
            } else {
                dst_input.push(label.clone());
            }
        }
    }
}

/// Appends the packed sample key `varint(len(output)) ++ output ++ input` to dst.
pub(super) fn compress_labels(dst: &mut Vec<u8>, input_labels: &[Label], output_labels: &[Label]) {
    let lc = labels_compressor();
    let mut buf = Vec::with_capacity(16);
    lc.compress(&mut buf, output_labels);
    marshal_var_uint64(dst, buf.len() as u64);
    dst.extend_from_slice(&buf);
    lc.compress(dst, input_labels);
}

pub(super) fn decompress_labels(dst: &mut Vec<Label>, key: &[u8]) {
    labels_compressor().decompress(dst, key)
}

/// Returns `(input_key, output_key)` for the packed sample key.
pub(super) fn get_input_output_key(key: &[u8]) -> (&[u8], &[u8]) {
    let Some((n, offset)) = unmarshal_var_uint64(key) else {
        panic!("BUG: cannot unmarshal output key length from packed key");
    };
    let end = offset + n as usize;
    if end > key.len() {
        panic!(
            "BUG: output key length {n} exceeds the packed key size {}",
            key.len() - offset
        );
    }
    (&key[end..], &key[offset..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::labels::labels_to_string;

    fn labels(pairs: &[(&str, &str)]) -> Vec<Label> {
        pairs.iter().map(|(n, v)| Label::new(*n, *v)).collect()
    }

    #[test]
    fn test_add_metric_suffix() {
        let mut dst = labels(&[("x", "y"), ("__name__", "foo"), ("a", "b")]);
        add_metric_suffix(&mut dst, 1, ":1m_", "sum_samples");
        assert_eq!(labels_to_string(&dst[1..]), r#"foo:1m_sum_samples{a="b"}"#);

        let mut dst = labels(&[("a", "b")]);
        add_metric_suffix(&mut dst, 0, ":1m_", "count_samples");
        assert_eq!(labels_to_string(&dst), r#":1m_count_samples{a="b"}"#);
    }

    #[test]
    fn test_grouping_label_lists() {
        let by = vec!["job".to_string(), "__name__".to_string(), "a".to_string()];
        assert_eq!(add_missing_underscore_name(&by), vec!["__name__", "job", "a"]);
        assert_eq!(remove_underscore_name(&by), vec!["job", "a"]);
        let dups = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(sort_and_remove_duplicates(&dups), vec!["a", "b"]);
    }

    #[test]
    fn test_get_input_output_labels() {
        let src = labels(&[("__name__", "foo"), ("instance", "x"), ("job", "api")]);

        let (mut input, mut output) = (vec![], vec![]);
        let by = vec!["__name__".to_string(), "job".to_string()];
        get_input_output_labels(&mut input, &mut output, &src, &by, &[]);
        assert_eq!(input, labels(&[("instance", "x")]));
        assert_eq!(output, labels(&[("__name__", "foo"), ("job", "api")]));

        let (mut input, mut output) = (vec![], vec![]);
        let without = vec!["instance".to_string()];
        get_input_output_labels(&mut input, &mut output, &src, &[], &without);
        assert_eq!(input, labels(&[("instance", "x")]));
        assert_eq!(output, labels(&[("__name__", "foo"), ("job", "api")]));
    }

    #[test]
    fn test_packed_key_round_trip() {
        let input = labels(&[("instance", "host-1")]);
        let output = labels(&[("__name__", "requests_total"), ("job", "api")]);
        let mut key = vec![];
        compress_labels(&mut key, &input, &output);

        let (input_key, output_key) = get_input_output_key(&key);
        let mut decoded = vec![];
        decompress_labels(&mut decoded, output_key);
        assert_eq!(decoded, output);
        decoded.clear();
        decompress_labels(&mut decoded, input_key);
        assert_eq!(decoded, input);
    }

    #[test]
    #[should_panic(expected = "BUG")]
    fn test_truncated_packed_key() {
        let mut key = vec![];
        marshal_var_uint64(&mut key, 10);
        key.push(1);
        let _ = get_input_output_key(&key);
    }
}
