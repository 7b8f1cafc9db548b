use super::{arg, invalid, require, text, Registry};
use crate::expression::EvalResult;
use crate::value::{is_reserved_key, Value, ValueMap};

pub(super) fn register(registry: &mut Registry) {
    registry.insert("keys", keys);
    registry.insert("values", values);
    registry.insert("entries", entries);
    registry.insert("get", get);
    registry.insert("has", has);
    registry.insert("merge", merge);
}

fn visible_entries<'a>(
    function: &str,
    args: &'a [Value],
) -> EvalResult<Vec<(&'a String, &'a Value)>> {
    match arg(args, 0) {
        Value::Map(map) => Ok(map.iter().filter(|(k, _)| !is_reserved_key(k)).collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(invalid(
            function,
            format!("expected a map, got {}", other.type_name()),
        )),
    }
}

fn keys(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::List(
        visible_entries("keys", args)?
            .into_iter()
            .map(|(k, _)| Value::String(k.clone()))
            .collect(),
    ))
}

fn values(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::List(
        visible_entries("values", args)?
            .into_iter()
            .map(|(_, v)| v.clone())
            .collect(),
    ))
}

fn entries(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::List(
        visible_entries("entries", args)?
            .into_iter()
            .map(|(k, v)| Value::List(vec![Value::String(k.clone()), v.clone()]))
            .collect(),
    ))
}

/// `get(obj, "a.b", default)`; reserved segments resolve to the default.
fn get(args: &[Value]) -> EvalResult<Value> {
    require("get", args, 2)?;
    let path = text(args, 1);
    Ok(arg(args, 0)
        .get_path(&path)
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or_else(|| arg(args, 2).clone()))
}

fn has(args: &[Value]) -> EvalResult<Value> {
    require("has", args, 2)?;
    let path = text(args, 1);
    Ok(Value::Boolean(arg(args, 0).get_path(&path).is_some()))
}

/// Shallow merge, later maps win; reserved keys are dropped.
fn merge(args: &[Value]) -> EvalResult<Value> {
    let mut merged = ValueMap::new();
    for (position, value) in args.iter().enumerate() {
        match value {
            Value::Map(map) => {
                for (key, entry) in map {
                    if !is_reserved_key(key) {
                        merged.insert(key.clone(), entry.clone());
                    }
                }
            }
            Value::Null => {}
            other => {
                return Err(invalid(
                    "merge",
                    format!(
                        "argument {} must be a map, got {}",
                        position + 1,
                        other.type_name()
                    ),
                ))
            }
        }
    }
    Ok(Value::Map(merged))
}
