use tracing::debug;

use super::{arg, integer, invalid, list, require, text, Registry};
use crate::expression::pattern::compile_pattern;
use crate::expression::EvalResult;
use crate::value::Value;

const MAX_REPEAT_LENGTH: usize = 100_000;

pub(super) fn register(registry: &mut Registry) {
    registry.insert("lower", lower);
    registry.insert("upper", upper);
    registry.insert("capitalize", capitalize);
    registry.insert("title", title);
    registry.insert("trim", trim);
    registry.insert("truncate", truncate);
    registry.insert("pad_start", pad_start);
    registry.insert("pad_end", pad_end);
    registry.insert("replace", replace);
    registry.insert("match", match_pattern);
    registry.insert("test", test_pattern);
    registry.insert("split", split);
    registry.insert("join", join);
    registry.insert("contains", contains);
    registry.insert("starts_with", starts_with);
    registry.insert("ends_with", ends_with);
    registry.insert("repeat_str", repeat_str);
}

fn lower(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::String(text(args, 0).to_lowercase()))
}

fn upper(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::String(text(args, 0).to_uppercase()))
}

fn capitalize_word(word: &str, lower_rest: bool) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => {
            let rest: String = chars.collect();
            let rest = if lower_rest { rest.to_lowercase() } else { rest };
            first.to_uppercase().chain(rest.chars()).collect()
        }
        None => String::new(),
    }
}

fn capitalize(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::String(capitalize_word(&text(args, 0), false)))
}

fn title(args: &[Value]) -> EvalResult<Value> {
    let source = text(args, 0);
    let titled: Vec<String> = source
        .split(' ')
        .map(|word| capitalize_word(word, true))
        .collect();
    Ok(Value::String(titled.join(" ")))
}

fn trim(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::String(text(args, 0).trim().to_string()))
}

/// The result, suffix included, never exceeds `len` characters unless the
/// suffix alone is longer.
fn truncate(args: &[Value]) -> EvalResult<Value> {
    require("truncate", args, 2)?;
    let source = text(args, 0);
    let limit = integer("truncate", args, 1)?.max(0) as usize;
    let suffix = match arg(args, 2) {
        Value::Null => "...".to_string(),
        other => other.to_string(),
    };
    if source.chars().count() <= limit {
        return Ok(Value::String(source));
    }
    let keep = limit.saturating_sub(suffix.chars().count());
    let mut truncated: String = source.chars().take(keep).collect();
    truncated.push_str(&suffix);
    Ok(Value::String(truncated))
}

fn padding(function: &str, args: &[Value]) -> EvalResult<(String, String)> {
    require(function, args, 2)?;
    let source = text(args, 0);
    let width = integer(function, args, 1)?.clamp(0, MAX_REPEAT_LENGTH as i64) as usize;
    let fill = match arg(args, 2) {
        Value::Null => " ".to_string(),
        other => other.to_string(),
    };
    let missing = width.saturating_sub(source.chars().count());
    if missing == 0 || fill.is_empty() {
        return Ok((source, String::new()));
    }
    let pad: String = fill.chars().cycle().take(missing).collect();
    Ok((source, pad))
}

fn pad_start(args: &[Value]) -> EvalResult<Value> {
    let (source, pad) = padding("pad_start", args)?;
    Ok(Value::String(pad + &source))
}

fn pad_end(args: &[Value]) -> EvalResult<Value> {
    let (source, pad) = padding("pad_end", args)?;
    Ok(Value::String(source + &pad))
}

/// Rejected patterns fall back to literal substring behaviour.
fn replace(args: &[Value]) -> EvalResult<Value> {
    require("replace", args, 3)?;
    let (source, pattern, replacement) = (text(args, 0), text(args, 1), text(args, 2));
    let replaced = match compile_pattern(&pattern, false) {
        Ok(regex) => regex.replace_all(&source, replacement.as_str()).into_owned(),
        Err(e) => {
            debug!("replace: using literal match for `{}`: {}", pattern, e);
            source.replace(&pattern, &replacement)
        }
    };
    Ok(Value::String(replaced))
}

/// All matches as a list, or null when nothing matches.
fn match_pattern(args: &[Value]) -> EvalResult<Value> {
    require("match", args, 2)?;
    let (source, pattern) = (text(args, 0), text(args, 1));
    let matches: Vec<Value> = match compile_pattern(&pattern, false) {
        Ok(regex) => regex
            .find_iter(&source)
            .map(|m| Value::from(m.as_str()))
            .collect(),
        Err(e) => {
            debug!("match: using literal match for `{}`: {}", pattern, e);
            if pattern.is_empty() {
                Vec::new()
            } else {
                source
                    .matches(pattern.as_str())
                    .map(Value::from)
                    .collect()
            }
        }
    };
    Ok(if matches.is_empty() {
        Value::Null
    } else {
        Value::List(matches)
    })
}

fn test_pattern(args: &[Value]) -> EvalResult<Value> {
    require("test", args, 2)?;
    let (source, pattern) = (text(args, 0), text(args, 1));
    let found = match compile_pattern(&pattern, false) {
        Ok(regex) => regex.is_match(&source),
        Err(e) => {
            debug!("test: using literal match for `{}`: {}", pattern, e);
            source.contains(&pattern)
        }
    };
    Ok(Value::Boolean(found))
}

fn split(args: &[Value]) -> EvalResult<Value> {
    let source = text(args, 0);
    let separator = text(args, 1);
    let parts: Vec<Value> = if separator.is_empty() {
        source.chars().map(|c| Value::String(c.to_string())).collect()
    } else {
        source.split(separator.as_str()).map(Value::from).collect()
    };
    Ok(Value::List(parts))
}

fn join(args: &[Value]) -> EvalResult<Value> {
    let items = list("join", args, 0)?;
    let separator = match arg(args, 1) {
        Value::Null => ",".to_string(),
        other => other.to_string(),
    };
    let joined: Vec<String> = items.iter().map(ToString::to_string).collect();
    Ok(Value::String(joined.join(&separator)))
}

/// Substring test for strings, membership test for lists.
fn contains(args: &[Value]) -> EvalResult<Value> {
    require("contains", args, 2)?;
    let found = match arg(args, 0) {
        Value::List(items) => items.iter().any(|item| item.loose_eq(arg(args, 1))),
        Value::Map(map) => map.contains_key(&text(args, 1)),
        _ => text(args, 0).contains(&text(args, 1)),
    };
    Ok(Value::Boolean(found))
}

fn starts_with(args: &[Value]) -> EvalResult<Value> {
    require("starts_with", args, 2)?;
    Ok(Value::Boolean(text(args, 0).starts_with(&text(args, 1))))
}

fn ends_with(args: &[Value]) -> EvalResult<Value> {
    require("ends_with", args, 2)?;
    Ok(Value::Boolean(text(args, 0).ends_with(&text(args, 1))))
}

fn repeat_str(args: &[Value]) -> EvalResult<Value> {
    require("repeat_str", args, 2)?;
    let source = text(args, 0);
    let count = integer("repeat_str", args, 1)?.max(0) as usize;
    if source.len().saturating_mul(count) > MAX_REPEAT_LENGTH {
        return Err(invalid(
            "repeat_str",
            format!("result would exceed {} bytes", MAX_REPEAT_LENGTH),
        ));
    }
    Ok(Value::String(source.repeat(count)))
}

#[cfg(test)]
mod tests {
    use crate::expression::functions::call;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn s(v: &str) -> Value {
        Value::from(v)
    }

    #[test]
    fn test_case_functions() {
        assert_eq!(call("upper", &[s("abc")]).unwrap(), s("ABC"));
        assert_eq!(call("capitalize", &[s("hello World")]).unwrap(), s("Hello World"));
        assert_eq!(call("title", &[s("hello wORLD")]).unwrap(), s("Hello World"));
        assert_eq!(call("trim", &[s("  x ")]).unwrap(), s("x"));
    }

    #[test]
    fn test_truncate_and_pad() {
        assert_eq!(
            call("truncate", &[s("abcdefghij"), Value::Integer(6)]).unwrap(),
            s("abc...")
        );
        assert_eq!(
            call("truncate", &[s("short"), Value::Integer(10)]).unwrap(),
            s("short")
        );
        assert_eq!(
            call("pad_start", &[s("7"), Value::Integer(3), s("0")]).unwrap(),
            s("007")
        );
        assert_eq!(call("pad_end", &[s("ab"), Value::Integer(4)]).unwrap(), s("ab  "));
    }

    #[test]
    fn test_regex_functions() {
        assert_eq!(
            call("replace", &[s("a1b22"), s(r"\d+"), s("#")]).unwrap(),
            s("a#b#")
        );
        assert_eq!(
            call("match", &[s("a1b22"), s(r"\d+")]).unwrap(),
            Value::List(vec![s("1"), s("22")])
        );
        assert_eq!(call("match", &[s("abc"), s(r"\d")]).unwrap(), Value::Null);
        assert_eq!(
            call("test", &[s("hello"), s("^h")]).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_rejected_pattern_falls_back_to_literal() {
        assert_eq!(
            call("replace", &[s("x(a+)+y"), s("(a+)+"), s("_")]).unwrap(),
            s("x_y")
        );
        assert_eq!(
            call("test", &[s("aaaa"), s("(a+)+")]).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            call("match", &[s("[unclosed [unclosed"), s("[unclosed")]).unwrap(),
            Value::List(vec![s("[unclosed"), s("[unclosed")])
        );
    }

    #[test]
    fn test_split_join_contains() {
        assert_eq!(
            call("split", &[s("a,b"), s(",")]).unwrap(),
            Value::List(vec![s("a"), s("b")])
        );
        assert_eq!(
            call("join", &[Value::List(vec![s("a"), Value::Integer(1)]), s("-")]).unwrap(),
            s("a-1")
        );
        assert_eq!(
            call("contains", &[Value::List(vec![Value::Integer(2)]), Value::Float(2.0)]).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            call("starts_with", &[s("prefix"), s("pre")]).unwrap(),
            Value::Boolean(true)
        );
        assert!(call("repeat_str", &[s("ab"), Value::Integer(1_000_000)]).is_err());
        assert_eq!(call("repeat_str", &[s("ab"), Value::Integer(2)]).unwrap(), s("abab"));
    }
}
