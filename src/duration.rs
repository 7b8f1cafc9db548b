//! Duration strings with unit suffixes (`500ms`, `5s`, `10m`, `1h30m`, `2d`,
//! `1w`, `3M`, `1y`).
//!
//! Months are 30 days and years 365 days. A bare number is milliseconds.

use std::time::Duration;

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1},
    combinator::{all_consuming, map_res, opt, recognize, value},
    error::{context, VerboseError},
    multi::many1,
    sequence::{pair, tuple},
    IResult,
};
use thiserror::Error;

type ParserResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

const SECOND: f64 = 1_000.0;
const MINUTE: f64 = 60.0 * SECOND;
const HOUR: f64 = 60.0 * MINUTE;
const DAY: f64 = 24.0 * HOUR;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DurationError {
    #[error("Invalid duration: {0}")]
    Invalid(String),
    #[error("Negative duration not allowed: {0}")]
    Negative(String),
}

fn unit(input: &str) -> ParserResult<f64> {
    context(
        "duration unit",
        alt((
            value(1.0, tag("ms")),
            value(SECOND, char('s')),
            value(MINUTE, char('m')),
            value(HOUR, char('h')),
            value(DAY, char('d')),
            value(7.0 * DAY, char('w')),
            value(30.0 * DAY, char('M')),
            value(365.0 * DAY, char('y')),
        )),
    )(input)
}

fn amount(input: &str) -> ParserResult<f64> {
    map_res(
        recognize(tuple((digit1, opt(pair(char('.'), digit1))))),
        |s: &str| s.parse::<f64>(),
    )(input)
}

fn segments(input: &str) -> ParserResult<f64> {
    let (input, parts) = many1(pair(amount, unit))(input)?;
    Ok((input, parts.into_iter().map(|(n, u)| n * u).sum()))
}

/// Parses a possibly signed duration into milliseconds.
pub fn parse_duration_ms(input: &str) -> Result<i64, DurationError> {
    let trimmed = input.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    if body.is_empty() {
        return Err(DurationError::Invalid(input.to_string()));
    }
    let millis = if body.chars().all(|c| c.is_ascii_digit()) {
        body.parse::<f64>()
            .map_err(|_| DurationError::Invalid(input.to_string()))?
    } else {
        all_consuming(segments)(body)
            .map(|(_, ms)| ms)
            .map_err(|_| DurationError::Invalid(input.to_string()))?
    };
    let millis = millis.round() as i64;
    Ok(if negative { -millis } else { millis })
}

pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let millis = parse_duration_ms(input)?;
    if millis < 0 {
        return Err(DurationError::Negative(input.to_string()));
    }
    Ok(Duration::from_millis(millis as u64))
}

/// Human readable rendering, e.g. `1h 2m 3s`.
pub fn format_duration_ms(millis: i64) -> String {
    let sign = if millis < 0 { "-" } else { "" };
    let mut remaining = millis.unsigned_abs() / 1_000;
    if remaining == 0 {
        return "0s".to_string();
    }
    let mut parts = Vec::new();
    for (size, suffix) in [(86_400, "d"), (3_600, "h"), (60, "m"), (1, "s")] {
        let count = remaining / size;
        if count > 0 {
            parts.push(format!("{}{}", count, suffix));
            remaining %= size;
        }
    }
    format!("{}{}", sign, parts.join(" "))
}

/// Serde helper accepting either a millisecond count or a duration string.
/// Serializes back to milliseconds.
pub mod flexible {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
            Raw::Text(text) => super::parse_duration(&text).map_err(de::Error::custom),
        }
    }
}

/// Same as [`flexible`] for optional fields.
pub mod flexible_option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    struct Wrapper(#[serde(with = "super::flexible")] Duration);

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(d)| d))
    }
}
