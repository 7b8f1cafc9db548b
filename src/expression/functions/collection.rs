use rand::seq::SliceRandom;

use super::{arg, integer, invalid, list, optional_integer, require, text, Registry};
use crate::expression::EvalResult;
use crate::value::{resolve_index, Value};

pub const MAX_RANGE_LENGTH: usize = 10_000;

pub(super) fn register(registry: &mut Registry) {
    registry.insert("len", len);
    registry.insert("first", first);
    registry.insert("last", last);
    registry.insert("nth", nth);
    registry.insert("slice", slice);
    registry.insert("sort_by", sort_by);
    registry.insert("reverse", reverse);
    registry.insert("unique", unique);
    registry.insert("flatten", flatten);
    registry.insert("pick", pick);
    registry.insert("shuffle", shuffle);
    registry.insert("range", range);
    registry.insert("chunk", chunk);
    registry.insert("includes", includes);
    registry.insert("index_of", index_of);
}

fn len(args: &[Value]) -> EvalResult<Value> {
    let length = match arg(args, 0) {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(map) => map.len(),
        other => {
            return Err(invalid(
                "len",
                format!("cannot take the length of {}", other.type_name()),
            ))
        }
    };
    Ok(Value::Integer(length as i64))
}

fn element_at(items: &[Value], index: i64) -> Value {
    resolve_index(index, items.len())
        .map(|i| items[i].clone())
        .unwrap_or_default()
}

fn first(args: &[Value]) -> EvalResult<Value> {
    Ok(element_at(list("first", args, 0)?, 0))
}

fn last(args: &[Value]) -> EvalResult<Value> {
    Ok(element_at(list("last", args, 0)?, -1))
}

fn nth(args: &[Value]) -> EvalResult<Value> {
    require("nth", args, 2)?;
    let items = list("nth", args, 0)?;
    Ok(element_at(items, integer("nth", args, 1)?))
}

/// Clamps a possibly negative bound into `0..=len`.
fn clamp_bound(bound: i64, len: usize) -> usize {
    let len = len as i64;
    let resolved = if bound < 0 { len + bound } else { bound };
    resolved.clamp(0, len) as usize
}

fn slice(args: &[Value]) -> EvalResult<Value> {
    let start = optional_integer("slice", args, 1)?.unwrap_or(0);
    let end = optional_integer("slice", args, 2)?;
    match arg(args, 0) {
        Value::List(items) => {
            let from = clamp_bound(start, items.len());
            let to = clamp_bound(end.unwrap_or(items.len() as i64), items.len());
            Ok(Value::List(items.get(from..to.max(from)).unwrap_or(&[]).to_vec()))
        }
        _ => {
            let chars: Vec<char> = text(args, 0).chars().collect();
            let from = clamp_bound(start, chars.len());
            let to = clamp_bound(end.unwrap_or(chars.len() as i64), chars.len());
            Ok(Value::String(chars[from..to.max(from)].iter().collect()))
        }
    }
}

/// Stable sort; with a key, maps are ordered by the value at that path.
fn sort_by(args: &[Value]) -> EvalResult<Value> {
    let mut items = list("sort_by", args, 0)?.to_vec();
    match arg(args, 1) {
        Value::Null => items.sort_by(|a, b| a.compare(b)),
        key => {
            let path = key.to_string();
            items.sort_by(|a, b| {
                let left = a.get_path(&path).cloned().unwrap_or_default();
                let right = b.get_path(&path).cloned().unwrap_or_default();
                left.compare(&right)
            });
        }
    }
    if matches!(arg(args, 2), Value::String(order) if order.eq_ignore_ascii_case("desc")) {
        items.reverse();
    }
    Ok(Value::List(items))
}

fn reverse(args: &[Value]) -> EvalResult<Value> {
    match arg(args, 0) {
        Value::List(items) => Ok(Value::List(items.iter().rev().cloned().collect())),
        _ => Ok(Value::String(text(args, 0).chars().rev().collect())),
    }
}

fn unique(args: &[Value]) -> EvalResult<Value> {
    let mut seen: Vec<Value> = Vec::new();
    for item in list("unique", args, 0)? {
        if !seen.iter().any(|existing| existing.loose_eq(item)) {
            seen.push(item.clone());
        }
    }
    Ok(Value::List(seen))
}

fn flatten_into(items: &[Value], depth: i64, output: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::List(inner) if depth > 0 => flatten_into(inner, depth - 1, output),
            other => output.push(other.clone()),
        }
    }
}

fn flatten(args: &[Value]) -> EvalResult<Value> {
    let items = list("flatten", args, 0)?;
    let depth = optional_integer("flatten", args, 1)?.unwrap_or(1).min(32);
    let mut output = Vec::new();
    flatten_into(items, depth, &mut output);
    Ok(Value::List(output))
}

fn pick(args: &[Value]) -> EvalResult<Value> {
    let items = list("pick", args, 0)?;
    Ok(items
        .choose(&mut rand::thread_rng())
        .cloned()
        .unwrap_or_default())
}

fn shuffle(args: &[Value]) -> EvalResult<Value> {
    let mut items = list("shuffle", args, 0)?.to_vec();
    items.shuffle(&mut rand::thread_rng());
    Ok(Value::List(items))
}

/// `range(end)`, `range(start, end)` or `range(start, end, step)`; end is
/// exclusive and the result holds at most 10 000 elements.
fn range(args: &[Value]) -> EvalResult<Value> {
    require("range", args, 1)?;
    let (start, end) = if args.len() == 1 {
        (0, integer("range", args, 0)?)
    } else {
        (integer("range", args, 0)?, integer("range", args, 1)?)
    };
    let step = optional_integer("range", args, 2)?.unwrap_or(1);
    if step == 0 {
        return Err(invalid("range", "step must not be zero"));
    }
    let mut values = Vec::new();
    let mut current = start;
    while values.len() < MAX_RANGE_LENGTH
        && ((step > 0 && current < end) || (step < 0 && current > end))
    {
        values.push(Value::Integer(current));
        current = match current.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::List(values))
}

fn chunk(args: &[Value]) -> EvalResult<Value> {
    require("chunk", args, 2)?;
    let items = list("chunk", args, 0)?;
    let size = integer("chunk", args, 1)?;
    if size <= 0 {
        return Err(invalid("chunk", "size must be positive"));
    }
    Ok(Value::List(
        items
            .chunks(size as usize)
            .map(|c| Value::List(c.to_vec()))
            .collect(),
    ))
}

fn includes(args: &[Value]) -> EvalResult<Value> {
    require("includes", args, 2)?;
    let needle = arg(args, 1);
    Ok(Value::Boolean(
        list("includes", args, 0)?
            .iter()
            .any(|item| item.loose_eq(needle)),
    ))
}

fn index_of(args: &[Value]) -> EvalResult<Value> {
    require("index_of", args, 2)?;
    let position = match arg(args, 0) {
        Value::List(items) => items.iter().position(|item| item.loose_eq(arg(args, 1))),
        _ => {
            let haystack = text(args, 0);
            haystack
                .find(&text(args, 1))
                .map(|byte| haystack[..byte].chars().count())
        }
    };
    Ok(Value::Integer(position.map(|p| p as i64).unwrap_or(-1)))
}

#[cfg(test)]
mod tests {
    use super::MAX_RANGE_LENGTH;
    use crate::expression::functions::call;
    use crate::value::Value;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn v(value: serde_json::Value) -> Value {
        Value::from(value)
    }

    #[test]
    fn test_access_functions() {
        let items = v(json!([1, 2, 3]));
        assert_eq!(call("len", &[items.clone()]).unwrap(), Value::Integer(3));
        assert_eq!(call("len", &[Value::from("héllo")]).unwrap(), Value::Integer(5));
        assert_eq!(call("first", &[items.clone()]).unwrap(), Value::Integer(1));
        assert_eq!(call("last", &[items.clone()]).unwrap(), Value::Integer(3));
        assert_eq!(
            call("nth", &[items.clone(), Value::Integer(-2)]).unwrap(),
            Value::Integer(2)
        );
        assert_eq!(call("first", &[v(json!([]))]).unwrap(), Value::Null);
    }

    #[test]
    fn test_slice() {
        let items = v(json!([1, 2, 3, 4]));
        assert_eq!(
            call("slice", &[items.clone(), Value::Integer(1), Value::Integer(-1)]).unwrap(),
            v(json!([2, 3]))
        );
        assert_eq!(
            call("slice", &[Value::from("abcdef"), Value::Integer(-3)]).unwrap(),
            Value::from("def")
        );
        assert_eq!(
            call("slice", &[items, Value::Integer(3), Value::Integer(1)]).unwrap(),
            v(json!([]))
        );
    }

    #[test]
    fn test_sorting_and_shaping() {
        assert_eq!(
            call(
                "sort_by",
                &[v(json!([{"n": 3}, {"n": 1}, {"n": 2}])), Value::from("n")]
            )
            .unwrap(),
            v(json!([{"n": 1}, {"n": 2}, {"n": 3}]))
        );
        assert_eq!(
            call("unique", &[v(json!([1, 1.0, "a", "a", 2]))]).unwrap(),
            v(json!([1, "a", 2]))
        );
        assert_eq!(
            call("flatten", &[v(json!([1, [2, [3]]]))]).unwrap(),
            v(json!([1, 2, [3]]))
        );
        assert_eq!(
            call("chunk", &[v(json!([1, 2, 3])), Value::Integer(2)]).unwrap(),
            v(json!([[1, 2], [3]]))
        );
        assert_eq!(call("reverse", &[v(json!([1, 2]))]).unwrap(), v(json!([2, 1])));
    }

    #[test]
    fn test_range_is_bounded() {
        assert_eq!(call("range", &[Value::Integer(3)]).unwrap(), v(json!([0, 1, 2])));
        assert_eq!(
            call("range", &[Value::Integer(5), Value::Integer(0), Value::Integer(-2)]).unwrap(),
            v(json!([5, 3, 1]))
        );
        let huge = call("range", &[Value::Integer(0), Value::Integer(1_000_000)]).unwrap();
        assert_eq!(huge.as_list().unwrap().len(), MAX_RANGE_LENGTH);
        assert!(call("range", &[Value::Integer(0), Value::Integer(5), Value::Integer(0)]).is_err());
    }

    #[test]
    fn test_random_functions_stay_in_list() {
        let items = v(json!([1, 2, 3]));
        let picked = call("pick", &[items.clone()]).unwrap();
        assert!(items.as_list().unwrap().contains(&picked));
        let mut shuffled = call("shuffle", &[items]).unwrap().as_list().unwrap().clone();
        shuffled.sort_by(|a, b| a.compare(b));
        assert_eq!(Value::List(shuffled), v(json!([1, 2, 3])));
        assert_eq!(call("pick", &[v(json!([]))]).unwrap(), Value::Null);
    }

    #[test]
    fn test_search() {
        let items = v(json!(["a", "b"]));
        assert_eq!(
            call("includes", &[items.clone(), Value::from("b")]).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            call("index_of", &[items, Value::from("z")]).unwrap(),
            Value::Integer(-1)
        );
        assert_eq!(
            call("index_of", &[Value::from("hello"), Value::from("ll")]).unwrap(),
            Value::Integer(2)
        );
    }
}
