use super::{arg, integer, invalid, require, text, Registry};
use crate::duration::format_duration_ms;
use crate::expression::EvalResult;
use crate::value::Value;

pub(super) fn register(registry: &mut Registry) {
    registry.insert("mention", mention);
    registry.insert("ordinal", ordinal);
    registry.insert("plural", plural);
    registry.insert("format_duration", format_duration);
}

fn mention(args: &[Value]) -> EvalResult<Value> {
    require("mention", args, 1)?;
    let id = text(args, 0);
    let kind = match arg(args, 1) {
        Value::Null => "user".to_string(),
        other => other.to_string(),
    };
    let markup = match kind.as_str() {
        "user" | "member" => format!("<@{}>", id),
        "role" => format!("<@&{}>", id),
        "channel" => format!("<#{}>", id),
        _ => return Err(invalid("mention", format!("unknown mention kind `{}`", kind))),
    };
    Ok(Value::String(markup))
}

fn ordinal(args: &[Value]) -> EvalResult<Value> {
    let n = integer("ordinal", args, 0)?;
    let suffix = match (n.rem_euclid(100), n.rem_euclid(10)) {
        (11..=13, _) => "th",
        (_, 1) => "st",
        (_, 2) => "nd",
        (_, 3) => "rd",
        _ => "th",
    };
    Ok(Value::String(format!("{}{}", n, suffix)))
}

/// The word matching `n`; the plural form defaults to `singular + "s"`.
fn plural(args: &[Value]) -> EvalResult<Value> {
    require("plural", args, 2)?;
    let n = super::number("plural", args, 0)?;
    let singular = text(args, 1);
    if n == 1.0 {
        return Ok(Value::String(singular));
    }
    Ok(Value::String(match arg(args, 2) {
        Value::Null => format!("{}s", singular),
        other => other.to_string(),
    }))
}

fn format_duration(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::String(format_duration_ms(integer(
        "format_duration",
        args,
        0,
    )?)))
}

#[cfg(test)]
mod tests {
    use crate::expression::functions::call;
    use crate::value::Value;

    #[test]
    fn test_mention() {
        assert_eq!(call("mention", &[Value::from("42")]).unwrap(), Value::from("<@42>"));
        assert_eq!(
            call("mention", &[Value::Integer(7), Value::from("role")]).unwrap(),
            Value::from("<@&7>")
        );
        assert_eq!(
            call("mention", &[Value::from("9"), Value::from("channel")]).unwrap(),
            Value::from("<#9>")
        );
        assert!(call("mention", &[Value::from("9"), Value::from("emoji")]).is_err());
    }

    #[test]
    fn test_ordinal() {
        let cases = [(1, "1st"), (2, "2nd"), (3, "3rd"), (4, "4th"), (11, "11th"), (12, "12th"), (22, "22nd"), (101, "101st"), (113, "113th")];
        for (n, expected) in cases {
            assert_eq!(call("ordinal", &[Value::Integer(n)]).unwrap(), Value::from(expected));
        }
    }

    #[test]
    fn test_plural_and_duration() {
        assert_eq!(
            call("plural", &[Value::Integer(1), Value::from("warning")]).unwrap(),
            Value::from("warning")
        );
        assert_eq!(
            call("plural", &[Value::Integer(3), Value::from("warning")]).unwrap(),
            Value::from("warnings")
        );
        assert_eq!(
            call("plural", &[Value::Integer(0), Value::from("child"), Value::from("children")]).unwrap(),
            Value::from("children")
        );
        assert_eq!(
            call("format_duration", &[Value::Integer(90_000)]).unwrap(),
            Value::from("1m 30s")
        );
    }
}
