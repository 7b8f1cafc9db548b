use super::{arg, invalid, text, Registry};
use crate::expression::EvalResult;
use crate::value::Value;

pub(super) fn register(registry: &mut Registry) {
    registry.insert("type_of", type_of);
    registry.insert("is_null", |args| Ok(Value::Boolean(arg(args, 0).is_null())));
    registry.insert("is_number", |args| {
        Ok(Value::Boolean(arg(args, 0).is_number()))
    });
    registry.insert("is_string", |args| {
        Ok(Value::Boolean(matches!(arg(args, 0), Value::String(_))))
    });
    registry.insert("is_bool", |args| {
        Ok(Value::Boolean(matches!(arg(args, 0), Value::Boolean(_))))
    });
    registry.insert("is_list", |args| {
        Ok(Value::Boolean(matches!(arg(args, 0), Value::List(_))))
    });
    registry.insert("is_map", |args| {
        Ok(Value::Boolean(matches!(arg(args, 0), Value::Map(_))))
    });
    registry.insert("to_number", to_number);
    registry.insert("to_int", to_int);
    registry.insert("to_string", |args| Ok(Value::String(text(args, 0))));
    registry.insert("to_bool", to_bool);
    registry.insert("to_json", to_json);
    registry.insert("from_json", from_json);
    registry.insert("default", default);
}

fn type_of(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::from(arg(args, 0).type_name()))
}

/// Unparseable input converts to null rather than failing.
fn to_number(args: &[Value]) -> EvalResult<Value> {
    Ok(match arg(args, 0) {
        number @ (Value::Integer(_) | Value::Float(_)) => number.clone(),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .map(Value::Integer)
                .or_else(|_| trimmed.parse::<f64>().map(Value::Float))
                .unwrap_or_default()
        }
        Value::Boolean(b) => Value::Integer(i64::from(*b)),
        _ => Value::Null,
    })
}

fn to_int(args: &[Value]) -> EvalResult<Value> {
    Ok(arg(args, 0).as_i64().map(Value::Integer).unwrap_or_default())
}

fn to_bool(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Boolean(match arg(args, 0) {
        Value::String(s) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "0" | "no" | "off"
        ),
        other => other.is_truthy(),
    }))
}

fn to_json(args: &[Value]) -> EvalResult<Value> {
    serde_json::to_string(&arg(args, 0).to_json())
        .map(Value::String)
        .map_err(|e| invalid("to_json", e.to_string()))
}

fn from_json(args: &[Value]) -> EvalResult<Value> {
    let source = text(args, 0);
    serde_json::from_str::<serde_json::Value>(&source)
        .map(Value::from)
        .map_err(|e| invalid("from_json", e.to_string()))
}

fn default(args: &[Value]) -> EvalResult<Value> {
    Ok(match arg(args, 0) {
        Value::Null => arg(args, 1).clone(),
        Value::String(s) if s.is_empty() => arg(args, 1).clone(),
        other => other.clone(),
    })
}
