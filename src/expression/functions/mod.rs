//! Built-in function table.
//!
//! Every function is a plain `fn(&[Value]) -> EvalResult<Value>`; domains
//! register themselves into one table built on first use.

mod collection;
mod convert;
mod datetime;
mod math;
mod object;
mod platform;
mod string;

use std::collections::HashMap;

use lazy_static::lazy_static;

use super::{EvalError, EvalResult};
use crate::value::Value;

pub type BuiltinFn = fn(&[Value]) -> EvalResult<Value>;

pub(crate) type Registry = HashMap<&'static str, BuiltinFn>;

lazy_static! {
    static ref BUILTINS: Registry = {
        let mut registry = Registry::new();
        datetime::register(&mut registry);
        math::register(&mut registry);
        string::register(&mut registry);
        collection::register(&mut registry);
        object::register(&mut registry);
        convert::register(&mut registry);
        platform::register(&mut registry);
        registry
    };
}

pub fn call(name: &str, args: &[Value]) -> EvalResult<Value> {
    let function = BUILTINS
        .get(name)
        .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
    function(args)
}

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains_key(name)
}

pub fn names() -> Vec<&'static str> {
    let mut names: Vec<_> = BUILTINS.keys().copied().collect();
    names.sort_unstable();
    names
}

static NULL: Value = Value::Null;

pub(crate) fn invalid(function: &str, message: impl Into<String>) -> EvalError {
    EvalError::InvalidArguments {
        function: function.to_string(),
        message: message.into(),
    }
}

/// Missing trailing arguments read as null.
pub(crate) fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&NULL)
}

pub(crate) fn require(function: &str, args: &[Value], count: usize) -> EvalResult<()> {
    if args.len() < count {
        return Err(invalid(
            function,
            format!("expected at least {} argument(s), got {}", count, args.len()),
        ));
    }
    Ok(())
}

pub(crate) fn number(function: &str, args: &[Value], index: usize) -> EvalResult<f64> {
    let value = arg(args, index);
    let parsed = match value {
        Value::Integer(_) | Value::Float(_) | Value::String(_) => value.as_f64(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        invalid(
            function,
            format!("argument {} must be a number, got {}", index + 1, value.type_name()),
        )
    })
}

pub(crate) fn integer(function: &str, args: &[Value], index: usize) -> EvalResult<i64> {
    number(function, args, index).map(|n| n.trunc() as i64)
}

pub(crate) fn optional_integer(
    function: &str,
    args: &[Value],
    index: usize,
) -> EvalResult<Option<i64>> {
    if arg(args, index).is_null() {
        return Ok(None);
    }
    integer(function, args, index).map(Some)
}

/// Any value stringified; null becomes the empty string.
pub(crate) fn text(args: &[Value], index: usize) -> String {
    arg(args, index).to_string()
}

pub(crate) fn list<'a>(function: &str, args: &'a [Value], index: usize) -> EvalResult<&'a [Value]> {
    match arg(args, index) {
        Value::List(items) => Ok(items),
        other => Err(invalid(
            function,
            format!("argument {} must be a list, got {}", index + 1, other.type_name()),
        )),
    }
}

/// Either a list argument or the remaining arguments as a list.
pub(crate) fn spread(args: &[Value]) -> &[Value] {
    match args {
        [Value::List(items)] => items,
        _ => args,
    }
}
