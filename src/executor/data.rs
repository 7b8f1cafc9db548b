//! Value mutations shared by state variables and local bindings.

use crate::state::{check_key, StateError, StateResult};
use crate::value::{resolve_index, Value, ValueMap};

fn wrong_type(name: &str, expected: &'static str, found: &Value) -> StateError {
    StateError::WrongType {
        name: name.to_string(),
        expected,
        found: found.type_name().to_string(),
    }
}

fn into_list(name: &str, current: Value) -> StateResult<Vec<Value>> {
    match current {
        Value::Null => Ok(Vec::new()),
        Value::List(items) => Ok(items),
        other => Err(wrong_type(name, "a list", &other)),
    }
}

fn into_map(name: &str, current: Value) -> StateResult<ValueMap> {
    match current {
        Value::Null => Ok(ValueMap::new()),
        Value::Map(map) => Ok(map),
        other => Err(wrong_type(name, "a map", &other)),
    }
}

pub fn list_push(name: &str, current: Value, item: Value) -> StateResult<Value> {
    let mut items = into_list(name, current)?;
    items.push(item);
    Ok(Value::List(items))
}

/// Removes by index (negative counts from the end) or else the first element
/// equal to `value`. Nothing matching leaves the list unchanged.
pub fn list_remove(
    name: &str,
    current: Value,
    index: Option<i64>,
    value: Option<&Value>,
) -> StateResult<(Value, Value)> {
    let mut items = into_list(name, current)?;
    let position = match (index, value) {
        (Some(index), _) => resolve_index(index, items.len()),
        (None, Some(value)) => items.iter().position(|item| item.loose_eq(value)),
        (None, None) => None,
    };
    let removed = position.map(|i| items.remove(i)).unwrap_or_default();
    Ok((Value::List(items), removed))
}

pub fn set_map(name: &str, current: Value, key: &str, value: Value) -> StateResult<Value> {
    check_key(key)?;
    let mut map = into_map(name, current)?;
    map.insert(key.to_string(), value);
    Ok(Value::Map(map))
}

pub fn delete_map(name: &str, current: Value, key: &str) -> StateResult<(Value, Value)> {
    check_key(key)?;
    let mut map = into_map(name, current)?;
    let removed = map.remove(key).unwrap_or_default();
    Ok((Value::Map(map), removed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn v(value: serde_json::Value) -> Value {
        Value::from(value)
    }

    #[test]
    fn test_list_operations() {
        let list = list_push("q", Value::Null, Value::Integer(1)).unwrap();
        let list = list_push("q", list, Value::Integer(2)).unwrap();
        assert_eq!(list, v(json!([1, 2])));

        let (list, removed) = list_remove("q", v(json!([1, 2, 3])), Some(-1), None).unwrap();
        assert_eq!((list, removed), (v(json!([1, 2])), Value::Integer(3)));

        let (list, removed) = list_remove("q", v(json!([1, 2])), Some(5), None).unwrap();
        assert_eq!((list, removed), (v(json!([1, 2])), Value::Null));

        let (list, _) = list_remove("q", v(json!(["a", "b"])), None, Some(&Value::from("a"))).unwrap();
        assert_eq!(list, v(json!(["b"])));

        assert!(matches!(
            list_push("q", Value::Integer(3), Value::Null),
            Err(StateError::WrongType { .. })
        ));
    }

    #[test]
    fn test_map_operations() {
        let map = set_map("m", Value::Null, "a", Value::Integer(1)).unwrap();
        assert_eq!(map, v(json!({"a": 1})));
        let (map, removed) = delete_map("m", map, "a").unwrap();
        assert_eq!((map, removed), (v(json!({})), Value::Integer(1)));
        assert!(matches!(
            set_map("m", Value::Null, "__proto__", Value::Null),
            Err(StateError::SecurityRejection(_))
        ));
        assert!(matches!(
            delete_map("m", Value::Null, "constructor"),
            Err(StateError::SecurityRejection(_))
        ));
    }
}
