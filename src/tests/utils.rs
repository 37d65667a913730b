use anyhow::{anyhow, bail, Context, Result};

use crate::common::labels::{labels_to_string, sort_labels};
use crate::common::time::parse_duration;
use crate::common::types::{Label, Sample, TimeSeries, METRIC_NAME_LABEL};

/// Parses Prometheus text exposition lines of the form `name{a="b"} value [offset]`.
///
/// The optional offset is a duration added to `base_ts`, e.g. `10s`. Blank lines are skipped.
pub fn parse_prom_metrics(data: &str, base_ts: i64) -> Result<Vec<TimeSeries>> {
    let mut tss = Vec::new();
    for (i, line) in data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let ts = parse_line(line, base_ts).with_context(|| format!("cannot parse line #{}: {line:?}", i + 1))?;
        tss.push(ts);
    }
    Ok(tss)
}

pub fn must_parse_prom_metrics(data: &str, base_ts: i64) -> Vec<TimeSeries> {
    parse_prom_metrics(data, base_ts).unwrap()
}

fn parse_line(line: &str, base_ts: i64) -> Result<TimeSeries> {
    let (mut labels, rest) = match line.find('{') {
        Some(n) => {
            let end = line.rfind('}').ok_or_else(|| anyhow!("missing closing brace"))?;
            let mut labels = parse_labels(&line[n + 1..end])?;
            let name = line[..n].trim();
            if !name.is_empty() {
                labels.push(Label::new(METRIC_NAME_LABEL, name));
            }
            (labels, &line[end + 1..])
        }
        None => {
            let n = line.find(' ').ok_or_else(|| anyhow!("missing value"))?;
            (vec![Label::new(METRIC_NAME_LABEL, &line[..n])], &line[n..])
        }
    };

    let mut fields = rest.split_whitespace();
    let value = fields.next().ok_or_else(|| anyhow!("missing value"))?;
    let value = parse_value(value)?;
    let timestamp = match fields.next() {
        Some(offset) => {
            let offset = parse_duration(offset).with_context(|| format!("invalid offset {offset:?}"))?;
            base_ts + offset.as_millis() as i64
        }
        None => base_ts,
    };
    if fields.next().is_some() {
        bail!("unexpected trailing data");
    }

    sort_labels(&mut labels);
    Ok(TimeSeries {
        labels,
        samples: vec![Sample::new(timestamp, value)],
    })
}

fn parse_value(s: &str) -> Result<f64> {
    match s {
        "NaN" => Ok(f64::NAN),
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        _ => s.parse::<f64>().with_context(|| format!("invalid value {s:?}")),
    }
}

fn parse_labels(s: &str) -> Result<Vec<Label>> {
    let mut labels = Vec::new();
    let mut rest = s.trim();
    while !rest.is_empty() {
        let eq = rest.find('=').ok_or_else(|| anyhow!("missing '=' in {rest:?}"))?;
        let name = rest[..eq].trim();
        rest = rest[eq + 1..].trim_start();
        let Some(quoted) = rest.strip_prefix('"') else {
            bail!("label value for {name:?} must be quoted");
        };

        let mut value = String::new();
        let mut chars = quoted.char_indices();
        let mut end = None;
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    let (_, escaped) = chars.next().ok_or_else(|| anyhow!("unterminated escape"))?;
                    value.push(match escaped {
                        'n' => '\n',
                        c => c,
                    });
                }
                '"' => {
                    end = Some(i);
                    break;
                }
                c => value.push(c),
            }
        }
        let end = end.ok_or_else(|| anyhow!("unterminated value for label {name:?}"))?;
        labels.push(Label::new(name, value));

        rest = quoted[end + 1..].trim_start();
        rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
    }
    Ok(labels)
}

/// Renders every sample as `labels value` and sorts the result.
pub fn sorted_series_strings(tss: &[TimeSeries]) -> Vec<String> {
    let mut result: Vec<String> = tss
        .iter()
        .flat_map(|ts| {
            let labels = labels_to_string(&ts.labels);
            ts.samples
                .iter()
                .map(move |s| format!("{labels} {}", s.value))
        })
        .collect();
    result.sort();
    result
}

#[test]
fn test_parse_prom_metrics() {
    let tss = must_parse_prom_metrics(
        r#"
foo{job="a",instance="x\"y"} 1.5
bar 2 10s
{abc="1"} NaN
"#,
        1000,
    );
    assert_eq!(tss.len(), 3);
    assert_eq!(labels_to_string(&tss[0].labels), r#"foo{instance="x\"y",job="a"}"#);
    assert_eq!(tss[1].samples, vec![Sample::new(11_000, 2.0)]);
    assert_eq!(labels_to_string(&tss[2].labels), r#"{abc="1"}"#);
    assert!(tss[2].samples[0].value.is_nan());

    assert!(parse_prom_metrics("foo", 0).is_err());
    assert!(parse_prom_metrics("foo{a=1} 2", 0).is_err());
}
