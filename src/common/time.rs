use std::time::Duration;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{char, digit1};
use nom::combinator::{all_consuming, map, map_res, opt, recognize};
use nom::multi::many1;
use nom::sequence::pair;
use nom::IResult;

use crate::error::{StreamAggrError, StreamAggrResult};

/// Returns the time duration since UNIX_EPOCH in milliseconds.
pub fn current_time_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

const MILLIS_PER_SECOND: f64 = 1000.0;
const MILLIS_PER_MINUTE: f64 = 60.0 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: f64 = 60.0 * MILLIS_PER_MINUTE;
const MILLIS_PER_DAY: f64 = 24.0 * MILLIS_PER_HOUR;

fn number(input: &str) -> IResult<&str, f64> {
    map_res(recognize(pair(digit1, opt(pair(char('.'), digit1)))), |s: &str| {
        s.parse::<f64>()
    })(input)
}

fn unit(input: &str) -> IResult<&str, f64> {
    // `ms` must be tried before `m`
    alt((
        map(tag("ms"), |_| 1.0),
        map(tag("s"), |_| MILLIS_PER_SECOND),
        map(tag("m"), |_| MILLIS_PER_MINUTE),
        map(tag("h"), |_| MILLIS_PER_HOUR),
        map(tag("d"), |_| MILLIS_PER_DAY),
        map(tag("w"), |_| 7.0 * MILLIS_PER_DAY),
        map(tag("y"), |_| 365.0 * MILLIS_PER_DAY),
    ))(input)
}

fn duration_millis(input: &str) -> IResult<&str, f64> {
    map(all_consuming(many1(pair(number, unit))), |parts| {
        parts.iter().map(|(n, mult)| n * mult).sum()
    })(input)
}

/// Parses Prometheus-style durations such as `30s`, `1m`, `1h30m` or `1.5d`.
///
/// A bare number is treated as seconds.
pub fn parse_duration(arg: &str) -> StreamAggrResult<Duration> {
    let s = arg.trim();
    if s.is_empty() {
        return Err(StreamAggrError::InvalidDuration("duration cannot be empty".to_string()));
    }
    if s.starts_with('-') {
        return Err(StreamAggrError::InvalidDuration(format!(
            "duration cannot be negative; got {arg}"
        )));
    }
    if let Ok(secs) = s.parse::<f64>() {
        if !secs.is_finite() || secs < 0.0 {
            return Err(StreamAggrError::InvalidDuration(arg.to_string()));
        }
        return Ok(Duration::from_millis((secs * MILLIS_PER_SECOND).round() as u64));
    }
    match duration_millis(s) {
        Ok((_, ms)) => Ok(Duration::from_millis(ms.round() as u64)),
        Err(_) => Err(StreamAggrError::InvalidDuration(arg.to_string())),
    }
}
