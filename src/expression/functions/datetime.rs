use std::fmt::Write;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use super::{arg, invalid, require, text, Registry};
use crate::duration::parse_duration_ms;
use crate::expression::EvalResult;
use crate::value::Value;

const TIMESTAMP_STYLES: [&str; 7] = ["t", "T", "d", "D", "f", "F", "R"];

pub(super) fn register(registry: &mut Registry) {
    registry.insert("now", now);
    registry.insert("timestamp", timestamp);
    registry.insert("date_add", date_add);
    registry.insert("date_diff", date_diff);
    registry.insert("format_date", format_date);
}

fn render(date: DateTime<Utc>) -> Value {
    Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Dates are RFC 3339 strings or epoch milliseconds; null means now.
pub(crate) fn parse_date(function: &str, value: &Value) -> EvalResult<DateTime<Utc>> {
    match value {
        Value::Null => Ok(Utc::now()),
        Value::Integer(ms) => Utc
            .timestamp_millis_opt(*ms)
            .single()
            .ok_or_else(|| invalid(function, format!("timestamp out of range: {}", ms))),
        Value::Float(ms) => Utc
            .timestamp_millis_opt(ms.trunc() as i64)
            .single()
            .ok_or_else(|| invalid(function, format!("timestamp out of range: {}", ms))),
        Value::String(s) if s.eq_ignore_ascii_case("now") => Ok(Utc::now()),
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| invalid(function, format!("invalid date `{}`: {}", s, e))),
        other => Err(invalid(
            function,
            format!("expected a date, got {}", other.type_name()),
        )),
    }
}

fn now(_args: &[Value]) -> EvalResult<Value> {
    Ok(render(Utc::now()))
}

/// Platform relative-timestamp markup, `<t:seconds:style>`.
fn timestamp(args: &[Value]) -> EvalResult<Value> {
    let date = parse_date("timestamp", arg(args, 0))?;
    let style = match arg(args, 1) {
        Value::Null => "f".to_string(),
        other => other.to_string(),
    };
    if !TIMESTAMP_STYLES.contains(&style.as_str()) {
        return Err(invalid("timestamp", format!("unknown style `{}`", style)));
    }
    Ok(Value::String(format!("<t:{}:{}>", date.timestamp(), style)))
}

fn date_add(args: &[Value]) -> EvalResult<Value> {
    require("date_add", args, 2)?;
    let date = parse_date("date_add", arg(args, 0))?;
    let millis = match arg(args, 1) {
        Value::Integer(ms) => *ms,
        Value::Float(ms) => ms.trunc() as i64,
        other => parse_duration_ms(&other.to_string())
            .map_err(|e| invalid("date_add", e.to_string()))?,
    };
    chrono::Duration::try_milliseconds(millis)
        .and_then(|delta| date.checked_add_signed(delta))
        .map(render)
        .ok_or_else(|| invalid("date_add", "resulting date out of range"))
}

/// `b - a` expressed in `unit` (ms, s, m, h, d, w), truncated.
fn date_diff(args: &[Value]) -> EvalResult<Value> {
    require("date_diff", args, 2)?;
    let a = parse_date("date_diff", arg(args, 0))?;
    let b = parse_date("date_diff", arg(args, 1))?;
    let millis = (b - a).num_milliseconds();
    let unit = match arg(args, 2) {
        Value::Null => "ms".to_string(),
        other => other.to_string(),
    };
    let divisor = match unit.as_str() {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 604_800_000,
        _ => return Err(invalid("date_diff", format!("unknown unit `{}`", unit))),
    };
    Ok(Value::Integer(millis / divisor))
}

/// strftime formatting; invalid format strings are argument errors.
fn format_date(args: &[Value]) -> EvalResult<Value> {
    let date = parse_date("format_date", arg(args, 0))?;
    let format = match arg(args, 1) {
        Value::Null => "%Y-%m-%d %H:%M:%S".to_string(),
        _ => text(args, 1),
    };
    let mut output = String::new();
    write!(output, "{}", date.format(&format))
        .map_err(|_| invalid("format_date", format!("invalid format `{}`", format)))?;
    Ok(Value::String(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::functions::call;

    const EPOCH_2024: i64 = 1_704_067_200_000;

    #[test]
    fn test_timestamp_markup() {
        assert_eq!(
            call("timestamp", &[Value::Integer(EPOCH_2024), Value::from("R")]).unwrap(),
            Value::from("<t:1704067200:R>")
        );
        assert!(call("timestamp", &[Value::Integer(0), Value::from("x")]).is_err());
    }

    #[test]
    fn test_date_add_and_diff() {
        let later = call(
            "date_add",
            &[Value::from("2024-01-01T00:00:00Z"), Value::from("1d")],
        )
        .unwrap();
        assert_eq!(later, Value::from("2024-01-02T00:00:00.000Z"));
        let earlier = call(
            "date_add",
            &[Value::from("2024-01-01T00:00:00Z"), Value::from("-5m")],
        )
        .unwrap();
        assert_eq!(earlier, Value::from("2023-12-31T23:55:00.000Z"));
        assert_eq!(
            call(
                "date_diff",
                &[
                    Value::from("2024-01-01T00:00:00Z"),
                    later.clone(),
                    Value::from("h")
                ]
            )
            .unwrap(),
            Value::Integer(24)
        );
    }

    #[test]
    fn test_format_date() {
        assert_eq!(
            call("format_date", &[Value::Integer(EPOCH_2024), Value::from("%Y/%m/%d")]).unwrap(),
            Value::from("2024/01/01")
        );
        assert!(call("format_date", &[Value::Integer(EPOCH_2024), Value::from("%Y %")]).is_err());
    }

    #[test]
    fn test_now_is_rfc3339() {
        let now = call("now", &[]).unwrap();
        assert!(parse_date("test", &now).is_ok());
    }
}
