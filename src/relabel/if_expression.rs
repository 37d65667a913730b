use std::fmt::{self, Display};

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while};
use nom::character::complete::{char, multispace0, multispace1, satisfy};
use nom::combinator::{all_consuming, opt, recognize};
use nom::error::{Error as NomError, ErrorKind};
use nom::multi::separated_list1;
use nom::sequence::{delimited, pair, terminated, tuple};
use nom::IResult;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::label_filter::{LabelFilter, LabelFilterOp};
use crate::common::types::{Label, METRIC_NAME_LABEL};
use crate::error::{StreamAggrError, StreamAggrResult};

/// IfExpression represents PromQL-like label filters such as `metric_name{filters...}`.
///
/// It may contain either a single filter or multiple filters, which are executed with `or` operator.
///
/// Examples:
///
/// if: 'foo{bar="baz"}'
///
/// if:
/// - 'foo{bar="baz"}'
/// - '{x=~"y"}'
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IfExpression(pub Vec<IfExpressionMatcher>);

impl IfExpression {
    pub fn new(ies: Vec<IfExpressionMatcher>) -> Self {
        IfExpression(ies)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse parses ie from s.
    pub fn parse(s: &str) -> StreamAggrResult<Self> {
        let ie = IfExpressionMatcher::parse(s)?;
        Ok(IfExpression(vec![ie]))
    }

    /// Match returns true if labels match at least a single label filter inside ie.
    ///
    /// Match returns true for empty ie.
    pub fn is_match(&self, labels: &[Label]) -> bool {
        if self.is_empty() {
            return true;
        }
        self.0.iter().any(|ie| ie.is_match(labels))
    }
}

impl Display for IfExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            return write!(f, "{}", &self.0[0]);
        }
        let items: Vec<&str> = self.0.iter().map(|ie| ie.s.as_str()).collect();
        write!(f, "{items:?}")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIfExpression {
    Single(String),
    Multi(Vec<String>),
}

impl<'de> Deserialize<'de> for IfExpression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let sources = match RawIfExpression::deserialize(deserializer)? {
            RawIfExpression::Single(s) => vec![s],
            RawIfExpression::Multi(v) => v,
        };
        let mut ies = Vec::with_capacity(sources.len());
        for s in sources.iter() {
            let ie = IfExpressionMatcher::parse(s).map_err(serde::de::Error::custom)?;
            ies.push(ie);
        }
        Ok(IfExpression(ies))
    }
}

impl Serialize for IfExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.len() == 1 {
            return serializer.serialize_str(&self.0[0].s);
        }
        let items: Vec<&str> = self.0.iter().map(|ie| ie.s.as_str()).collect();
        items.serialize(serializer)
    }
}

/// A single series selector, possibly holding several `or`-ed filter groups.
#[derive(Debug, Clone, Default)]
pub struct IfExpressionMatcher {
    s: String,
    lfss: Vec<Vec<LabelFilter>>,
}

impl PartialEq for IfExpressionMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.s == other.s
    }
}

impl IfExpressionMatcher {
    pub fn parse(s: &str) -> StreamAggrResult<Self> {
        let (_, (metric_name, groups)) = selector(s).map_err(|e| {
            StreamAggrError::InvalidSeriesSelector(format!("cannot parse series selector {s:?}: {e}"))
        })?;
        if metric_name.is_none() && groups.is_none() {
            return Err(StreamAggrError::InvalidSeriesSelector(format!(
                "missing series selector in {s:?}"
            )));
        }
        let groups = groups.unwrap_or_else(|| vec![vec![]]);
        let mut lfss = Vec::with_capacity(groups.len());
        for group in groups {
            let mut lfs = Vec::with_capacity(group.len() + 1);
            if let Some(name) = metric_name {
                let lf = LabelFilter::new(METRIC_NAME_LABEL, LabelFilterOp::Equal, name)
                    .map_err(StreamAggrError::InvalidSeriesSelector)?;
                lfs.push(lf);
            }
            for (label, op, value) in group {
                let lf = LabelFilter::new(label, op, &value)
                    .map_err(StreamAggrError::InvalidSeriesSelector)?;
                lfs.push(lf);
            }
            lfss.push(lfs);
        }
        Ok(IfExpressionMatcher {
            s: s.to_string(),
            lfss,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.lfss.is_empty()
    }

    /// Match returns true if ie matches the given labels.
    pub fn is_match(&self, labels: &[Label]) -> bool {
        if self.is_empty() {
            return true;
        }
        self.lfss
            .iter()
            .any(|lfs| lfs.iter().all(|lf| lf.matches(labels)))
    }
}

impl Display for IfExpressionMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.s)
    }
}

type RawFilter<'a> = (&'a str, LabelFilterOp, String);

fn metric_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_' || c == ':'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == ':' || c == '.'),
    ))(input)
}

fn label_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == ':'),
    ))(input)
}

fn filter_op(input: &str) -> IResult<&str, LabelFilterOp> {
    let (rest, op) = alt((tag("=~"), tag("!~"), tag("!="), tag("=")))(input)?;
    match LabelFilterOp::try_from(op) {
        Ok(op) => Ok((rest, op)),
        Err(_) => Err(nom::Err::Error(NomError::new(input, ErrorKind::Tag))),
    }
}

/// Parses a string in double, single or back quotes. Back-quoted strings are raw.
fn quoted_string(input: &str) -> IResult<&str, String> {
    let mut chars = input.char_indices();
    let quote = match chars.next() {
        Some((_, c)) if c == '"' || c == '\'' || c == '`' => c,
        _ => return Err(nom::Err::Error(NomError::new(input, ErrorKind::Char))),
    };
    let mut out = String::new();
    let mut escaped = false;
    for (i, c) in chars {
        if escaped {
            out.push(match c {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => other,
            });
            escaped = false;
            continue;
        }
        if c == '\\' && quote != '`' {
            escaped = true;
            continue;
        }
        if c == quote {
            return Ok((&input[i + c.len_utf8()..], out));
        }
        out.push(c);
    }
    Err(nom::Err::Error(NomError::new(input, ErrorKind::Char)))
}

fn label_filter(input: &str) -> IResult<&str, RawFilter<'_>> {
    let (input, (name, _, op, _, value)) =
        tuple((label_name, multispace0, filter_op, multispace0, quoted_string))(input)?;
    Ok((input, (name, op, value)))
}

fn filter_group(input: &str) -> IResult<&str, Vec<RawFilter<'_>>> {
    terminated(
        separated_list1(delimited(multispace0, char(','), multispace0), label_filter),
        opt(pair(multispace0, char(','))),
    )(input)
}

fn filter_groups(input: &str) -> IResult<&str, Vec<Vec<RawFilter<'_>>>> {
    separated_list1(tuple((multispace1, tag("or"), multispace1)), filter_group)(input)
}

fn braces(input: &str) -> IResult<&str, Vec<Vec<RawFilter<'_>>>> {
    let (input, groups) = delimited(
        pair(char('{'), multispace0),
        opt(filter_groups),
        pair(multispace0, char('}')),
    )(input)?;
    Ok((input, groups.unwrap_or_else(|| vec![vec![]])))
}

#[allow(clippy::type_complexity)]
fn selector(input: &str) -> IResult<&str, (Option<&str>, Option<Vec<Vec<RawFilter<'_>>>>)> {
    let (input, (_, name, _, groups, _)) = all_consuming(tuple((
        multispace0,
        opt(metric_name),
        multispace0,
        opt(braces),
        multispace0,
    )))(input)?;
    Ok((input, (name, groups)))
}
