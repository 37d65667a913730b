use test_case::test_case;

use crate::common::labels::labels_to_string;
use crate::common::types::Label;
use crate::relabel::{parse_relabel_configs_data, RelabelAction, RelabelConfig};

fn new_labels(pairs: &[(&str, &str)]) -> Vec<Label> {
    pairs.iter().map(|(n, v)| Label::new(*n, *v)).collect()
}

fn check_apply(config: &str, labels: &[(&str, &str)], expected: &str) {
    let pcs = parse_relabel_configs_data(config)
        .unwrap_or_else(|e| panic!("cannot parse relabel configs {config:?}: {e}"));
    let mut labels = new_labels(labels);
    pcs.apply(&mut labels, 0);
    assert_eq!(labels_to_string(&labels), expected, "config:\n{config}");
}

#[test]
fn test_replace_copies_source_labels() {
    check_apply(
        r#"
- action: replace
  source_labels: [xxx, foo]
  target_label: bar
"#,
        &[("xxx", "yyy"), ("foo", "abc")],
        r#"{bar="yyy;abc",foo="abc",xxx="yyy"}"#,
    );
}

#[test]
fn test_replace_with_capture_groups() {
    check_apply(
        r#"
- action: replace
  source_labels: [xxx]
  regex: "a(.+)c"
  target_label: "name_$1"
  replacement: "x-$1-y"
"#,
        &[("xxx", "abbbc")],
        r#"{name_bbb="x-bbb-y",xxx="abbbc"}"#,
    );
}

#[test]
fn test_replace_regex_mismatch() {
    check_apply(
        r#"
- action: replace
  source_labels: [xxx]
  regex: "a.+"
  target_label: bar
"#,
        &[("xxx", "yyy")],
        r#"{xxx="yyy"}"#,
    );
}

#[test]
fn test_replace_label_references() {
    check_apply(
        r#"
- target_label: instance
  replacement: "{{host}}:{{port}}"
"#,
        &[("host", "h1"), ("port", "80")],
        r#"{host="h1",instance="h1:80",port="80"}"#,
    );
}

#[test]
fn test_replace_empty_value_removes_label() {
    check_apply(
        r#"
- target_label: foo
  replacement: ""
"#,
        &[("foo", "bar"), ("x", "y")],
        r#"{x="y"}"#,
    );
}

#[test]
fn test_replace_all() {
    check_apply(
        r#"
- action: replace_all
  source_labels: [foo]
  target_label: foo
  regex: "-"
  replacement: "_"
"#,
        &[("foo", "a-b-c")],
        r#"{foo="a_b_c"}"#,
    );
}

#[test_case("keep", "bar", r#"bar{foo="1"}"#)]
#[test_case("keep", "baz", "{}")]
#[test_case("drop", "bar", "{}")]
#[test_case("drop", "baz", r#"bar{foo="1"}"#)]
fn test_keep_drop(action: &str, regex: &str, expected: &str) {
    let config = format!(
        "- action: {action}\n  source_labels: [__name__]\n  regex: {regex}\n"
    );
    check_apply(&config, &[("__name__", "bar"), ("foo", "1")], expected);
}

#[test_case("keep", r#"bar{foo="1"}"#)]
#[test_case("drop", "{}")]
fn test_keep_drop_with_if(action: &str, expected: &str) {
    let config = format!("- action: {action}\n  if: 'bar{{foo=\"1\"}}'\n");
    check_apply(&config, &[("__name__", "bar"), ("foo", "1")], expected);
}

#[test]
fn test_keep_if_mismatch_drops_series() {
    check_apply(
        r#"
- action: keep
  if: 'other'
"#,
        &[("__name__", "bar")],
        "{}",
    );
}

#[test]
fn test_if_mismatch_skips_rule() {
    check_apply(
        r#"
- action: replace
  if: '{job="api"}'
  target_label: env
  replacement: prod
"#,
        &[("job", "web")],
        r#"{job="web"}"#,
    );
}

#[test_case("keep_metrics", "foo|bar", "foo")]
#[test_case("drop_metrics", "foo|bar", "{}")]
fn test_keep_drop_metrics(action: &str, regex: &str, expected: &str) {
    let config = format!("- action: {action}\n  regex: '{regex}'\n");
    check_apply(&config, &[("__name__", "foo")], expected);
}

#[test_case("keep_if_equal", &[("a", "1"), ("b", "1")], r#"{a="1",b="1"}"#)]
#[test_case("keep_if_equal", &[("a", "1"), ("b", "2")], "{}")]
#[test_case("drop_if_equal", &[("a", "1"), ("b", "1")], "{}")]
#[test_case("drop_if_equal", &[("a", "1"), ("b", "2")], r#"{a="1",b="2"}"#)]
fn test_if_equal(action: &str, labels: &[(&str, &str)], expected: &str) {
    let config = format!("- action: {action}\n  source_labels: [a, b]\n");
    check_apply(&config, labels, expected);
}

#[test_case("keepequal", &[("a", "1"), ("b", "1")], r#"{a="1",b="1"}"#)]
#[test_case("keepequal", &[("a", "1"), ("b", "2")], "{}")]
#[test_case("dropequal", &[("a", "1"), ("b", "1")], "{}")]
fn test_equal(action: &str, labels: &[(&str, &str)], expected: &str) {
    let config = format!("- action: {action}\n  source_labels: [a]\n  target_label: b\n");
    check_apply(&config, labels, expected);
}

#[test_case("keep_if_contains", "a,b,c", r#"{a="a,b,c",x="b"}"#)]
#[test_case("keep_if_contains", "a,c", "{}")]
#[test_case("drop_if_contains", "a,b,c", "{}")]
fn test_if_contains(action: &str, tags: &str, expected: &str) {
    let config = format!("- action: {action}\n  source_labels: [x]\n  target_label: a\n");
    check_apply(&config, &[("a", tags), ("x", "b")], expected);
}

#[test]
fn test_hashmod() {
    let config = r#"
- action: hashmod
  source_labels: [foo]
  target_label: shard
  modulus: 1
"#;
    check_apply(config, &[("foo", "bar")], r#"{foo="bar",shard="0"}"#);
}

#[test_case("uppercase", r#"{foo="aBc",up="ABC"}"#)]
#[test_case("lowercase", r#"{foo="aBc",up="abc"}"#)]
fn test_case_conversion(action: &str, expected: &str) {
    let config = format!("- action: {action}\n  source_labels: [foo]\n  target_label: up\n");
    check_apply(&config, &[("foo", "aBc")], expected);
}

#[test]
fn test_labelmap() {
    check_apply(
        r#"
- action: labelmap
  regex: "meta_(.+)"
"#,
        &[("meta_foo", "1"), ("bar", "2")],
        r#"{bar="2",foo="1",meta_foo="1"}"#,
    );
}

#[test]
fn test_labelmap_all() {
    check_apply(
        r#"
- action: labelmap_all
  regex: "\\."
  replacement: "_"
"#,
        &[("a.b.c", "1")],
        r#"{a_b_c="1"}"#,
    );
}

#[test_case("labeldrop", r#"{bar="2"}"#)]
#[test_case("labelkeep", r#"{foo_1="1",foo_2="3"}"#)]
fn test_labeldrop_labelkeep(action: &str, expected: &str) {
    let config = format!("- action: {action}\n  regex: 'foo_.*'\n");
    check_apply(&config, &[("foo_1", "1"), ("bar", "2"), ("foo_2", "3")], expected);
}

#[test]
fn test_apply_respects_labels_offset() {
    let pcs = parse_relabel_configs_data("- action: labeldrop\n  regex: 'x'\n").unwrap();
    let mut labels = new_labels(&[("x", "keep-me"), ("x", "drop-me"), ("y", "1")]);
    pcs.apply(&mut labels, 1);
    assert_eq!(labels, new_labels(&[("x", "keep-me"), ("y", "1")]));
}

#[test_case("- action: replace\n"; "replace without target")]
#[test_case("- action: replace_all\n  target_label: x\n"; "replace_all without source")]
#[test_case("- action: keep\n"; "keep without source or if")]
#[test_case("- action: hashmod\n  source_labels: [a]\n  target_label: b\n"; "hashmod without modulus")]
#[test_case("- action: keep_if_equal\n  source_labels: [a]\n"; "keep_if_equal single source")]
#[test_case("- action: keep_metrics\n"; "keep_metrics without regex")]
#[test_case("- action: labeldrop\n  source_labels: [a]\n  regex: a\n"; "labeldrop with source")]
#[test_case("- action: foobar\n  target_label: a\n"; "unknown action")]
#[test_case("- action: replace\n  target_label: a\n  regex: '('\n"; "invalid regex")]
#[test_case("- target_label: a\n  unknown_field: 1\n"; "unknown field")]
fn test_parse_failure(config: &str) {
    assert!(
        parse_relabel_configs_data(config).is_err(),
        "expected error for config {config:?}"
    );
}

#[test]
fn test_action_round_trip() {
    for name in ["replace", "replace_all", "keepequal", "labelmap_all", "drop_metrics"] {
        let action: RelabelAction = name.parse().unwrap();
        assert_eq!(action.to_string(), name);
    }
}

#[test]
fn test_relabel_config_serde() {
    let rc: RelabelConfig =
        serde_yaml::from_str("if: 'foo'\naction: keep\nsource_labels: [a]\n").unwrap();
    assert_eq!(rc.action.as_deref(), Some("keep"));
    assert_eq!(rc.source_labels, vec!["a".to_string()]);
    assert!(rc.if_expr.is_some());
    let data = serde_yaml::to_string(&rc).unwrap();
    let restored: RelabelConfig = serde_yaml::from_str(&data).unwrap();
    assert_eq!(restored, rc);
}
