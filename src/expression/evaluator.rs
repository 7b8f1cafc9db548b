use std::cmp::Ordering;
use std::fmt::Write;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::ast::{BinaryOperator, Expr, UnaryOperator};
use super::parser::parse_expression;
use super::template::{self, Segment};
use super::{functions, EvalError, EvalResult, VariableScope};
use crate::value::{is_reserved_key, resolve_index, Value, ValueMap};

pub const DEFAULT_PARSE_CACHE_CAPACITY: usize = 1024;

/// Evaluates expressions and templates against a [`VariableScope`].
///
/// Parsed expressions are memoized by source text; the cache is dropped
/// wholesale once it reaches its capacity.
pub struct ExpressionEvaluator {
    cache: DashMap<String, Arc<Expr>>,
    cache_capacity: usize,
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self::with_cache_capacity(DEFAULT_PARSE_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity(cache_capacity: usize) -> Self {
        Self {
            cache: DashMap::new(),
            cache_capacity,
        }
    }

    pub fn parse(&self, source: &str) -> EvalResult<Arc<Expr>> {
        if let Some(expr) = self.cache.get(source) {
            return Ok(expr.value().clone());
        }
        let expr = Arc::new(parse_expression(source).inspect_err(|e| {
            debug!("Failed to parse expression `{}`: {}", source, e);
        })?);
        if self.cache_capacity > 0 {
            if self.cache.len() >= self.cache_capacity {
                self.cache.clear();
            }
            self.cache.insert(source.to_string(), expr.clone());
        }
        Ok(expr)
    }

    #[tracing::instrument(level = "trace", skip(self, scope))]
    pub fn evaluate(&self, source: &str, scope: &dyn VariableScope) -> EvalResult<Value> {
        let expr = self.parse(source.trim())?;
        self.eval_expr(&expr, scope)
    }

    /// Replaces every `${...}` span with its stringified value.
    pub fn interpolate(&self, template: &str, scope: &dyn VariableScope) -> EvalResult<String> {
        if !template.contains("${") {
            return Ok(template.to_string());
        }
        let mut output = String::with_capacity(template.len());
        for segment in template::split(template) {
            match segment {
                Segment::Text(text) => output.push_str(text),
                Segment::Expr(source) => {
                    let value = self.evaluate(source, scope)?;
                    let _ = write!(output, "{}", value);
                }
            }
        }
        Ok(output)
    }

    /// Like [`interpolate`](Self::interpolate), but a template made of a
    /// single span keeps the value's type.
    pub fn resolve(&self, template: &str, scope: &dyn VariableScope) -> EvalResult<Value> {
        match template::single_span(template) {
            Some(source) => self.evaluate(source, scope),
            None => self.interpolate(template, scope).map(Value::String),
        }
    }

    /// Resolves every string nested in lists and maps.
    pub fn resolve_value(&self, value: &Value, scope: &dyn VariableScope) -> EvalResult<Value> {
        match value {
            Value::String(template) => self.resolve(template, scope),
            Value::List(items) => items
                .iter()
                .map(|item| self.resolve_value(item, scope))
                .collect::<EvalResult<Vec<_>>>()
                .map(Value::List),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.resolve_value(v, scope)?)))
                .collect::<EvalResult<ValueMap>>()
                .map(Value::Map),
            other => Ok(other.clone()),
        }
    }

    /// Condition fields accept a bare expression or a single `${...}` span.
    pub fn condition(&self, source: &str, scope: &dyn VariableScope) -> EvalResult<bool> {
        let source = template::single_span(source).unwrap_or(source);
        Ok(self.evaluate(source, scope)?.is_truthy())
    }

    pub fn eval_expr(&self, expr: &Expr, scope: &dyn VariableScope) -> EvalResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Identifier(name) => scope
                .lookup(name)
                .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
            Expr::Member { object, property } => {
                let target = self.eval_expr(object, scope)?;
                access_property(&target, property)
            }
            Expr::Index { object, index } => {
                let target = self.eval_expr(object, scope)?;
                let index = self.eval_expr(index, scope)?;
                access_index(&target, &index)
            }
            Expr::Call {
                function,
                arguments,
            } => {
                let args = arguments
                    .iter()
                    .map(|arg| self.eval_expr(arg, scope))
                    .collect::<EvalResult<Vec<_>>>()?;
                functions::call(function, &args)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval_expr(operand, scope)?;
                eval_unary(*op, value)
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval_expr(left, scope)?;
                match op {
                    BinaryOperator::And if !left.is_truthy() => Ok(left),
                    BinaryOperator::Or if left.is_truthy() => Ok(left),
                    BinaryOperator::Coalesce if !left.is_null() => Ok(left),
                    BinaryOperator::And | BinaryOperator::Or | BinaryOperator::Coalesce => {
                        self.eval_expr(right, scope)
                    }
                    _ => {
                        let right = self.eval_expr(right, scope)?;
                        eval_binary(*op, &left, &right)
                    }
                }
            }
            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval_expr(condition, scope)?.is_truthy() {
                    self.eval_expr(then_branch, scope)
                } else {
                    self.eval_expr(else_branch, scope)
                }
            }
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval_expr(item, scope))
                .collect::<EvalResult<Vec<_>>>()
                .map(Value::List),
            Expr::Map(entries) => {
                let mut map = ValueMap::new();
                for (key, value) in entries {
                    if is_reserved_key(key) {
                        return Err(EvalError::ReservedKey(key.clone()));
                    }
                    map.insert(key.clone(), self.eval_expr(value, scope)?);
                }
                Ok(Value::Map(map))
            }
        }
    }
}

fn access_property(target: &Value, property: &str) -> EvalResult<Value> {
    if is_reserved_key(property) {
        return Err(EvalError::ReservedKey(property.to_string()));
    }
    let value = match target {
        Value::Map(map) => map.get(property).cloned(),
        Value::List(items) if property == "length" => Some(Value::Integer(items.len() as i64)),
        Value::List(items) => property
            .parse::<i64>()
            .ok()
            .and_then(|i| resolve_index(i, items.len()))
            .map(|i| items[i].clone()),
        Value::String(s) if property == "length" => Some(Value::Integer(s.chars().count() as i64)),
        _ => None,
    };
    Ok(value.unwrap_or_default())
}

fn access_index(target: &Value, index: &Value) -> EvalResult<Value> {
    match (target, index) {
        (_, Value::String(key)) => access_property(target, key),
        (Value::List(items), i) if i.is_number() => Ok(i
            .as_i64()
            .and_then(|i| resolve_index(i, items.len()))
            .map(|i| items[i].clone())
            .unwrap_or_default()),
        (Value::String(s), i) if i.is_number() => {
            let chars: Vec<char> = s.chars().collect();
            Ok(i.as_i64()
                .and_then(|i| resolve_index(i, chars.len()))
                .map(|i| Value::String(chars[i].to_string()))
                .unwrap_or_default())
        }
        _ => Ok(Value::Null),
    }
}

fn mismatch(op: impl ToString, left: &Value, right: &Value) -> EvalError {
    EvalError::TypeMismatch {
        operation: op.to_string(),
        left: left.type_name().to_string(),
        right: right.type_name().to_string(),
    }
}

fn eval_unary(op: UnaryOperator, value: Value) -> EvalResult<Value> {
    match (op, &value) {
        (UnaryOperator::Not, _) => Ok(Value::Boolean(!value.is_truthy())),
        (UnaryOperator::Negate, Value::Integer(i)) => Ok(i
            .checked_neg()
            .map(Value::Integer)
            .unwrap_or(Value::Float(-(*i as f64)))),
        (UnaryOperator::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOperator::Negate, _) => Err(mismatch(op, &value, &Value::Null)),
    }
}

/// Numbers, and strings that parse as numbers.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(_) | Value::Float(_) | Value::String(_) => value.as_f64(),
        _ => None,
    }
}

fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (n, Value::String(s)) | (Value::String(s), n) if n.is_number() => s
            .trim()
            .parse::<f64>()
            .map(|parsed| Some(parsed) == n.as_f64())
            .unwrap_or(false),
        _ => left.loose_eq(right),
    }
}

fn eval_binary(op: BinaryOperator, left: &Value, right: &Value) -> EvalResult<Value> {
    match op {
        BinaryOperator::Equal => Ok(Value::Boolean(equals(left, right))),
        BinaryOperator::NotEqual => Ok(Value::Boolean(!equals(left, right))),
        BinaryOperator::LessThan
        | BinaryOperator::LessThanEqual
        | BinaryOperator::GreaterThan
        | BinaryOperator::GreaterThanEqual => compare(op, left, right),
        BinaryOperator::Add => add(left, right),
        BinaryOperator::Subtract
        | BinaryOperator::Multiply
        | BinaryOperator::Divide
        | BinaryOperator::Modulo => arithmetic(op, left, right),
        BinaryOperator::And => Ok(if left.is_truthy() { right } else { left }.clone()),
        BinaryOperator::Or => Ok(if left.is_truthy() { left } else { right }.clone()),
        BinaryOperator::Coalesce => Ok(if left.is_null() { right } else { left }.clone()),
    }
}

fn compare(op: BinaryOperator, left: &Value, right: &Value) -> EvalResult<Value> {
    let ordering = match (left, right) {
        (Value::Null, _) | (_, Value::Null) => return Ok(Value::Boolean(false)),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ if left.is_number() || right.is_number() => match (numeric(left), numeric(right)) {
            (Some(a), Some(b)) => match a.partial_cmp(&b) {
                Some(ordering) => ordering,
                None => return Ok(Value::Boolean(false)),
            },
            _ => return Err(mismatch(op, left, right)),
        },
        _ => return Err(mismatch(op, left, right)),
    };
    let result = match op {
        BinaryOperator::LessThan => ordering == Ordering::Less,
        BinaryOperator::LessThanEqual => ordering != Ordering::Greater,
        BinaryOperator::GreaterThan => ordering == Ordering::Greater,
        BinaryOperator::GreaterThanEqual => ordering != Ordering::Less,
        _ => false,
    };
    Ok(Value::Boolean(result))
}

fn add(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::String(_), _) | (_, Value::String(_)) => {
            Ok(Value::String(format!("{}{}", left, right)))
        }
        (Value::List(a), Value::List(b)) => Ok(Value::List(a.iter().chain(b).cloned().collect())),
        _ => arithmetic(BinaryOperator::Add, left, right),
    }
}

fn arithmetic(op: BinaryOperator, left: &Value, right: &Value) -> EvalResult<Value> {
    if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
        return integer_arithmetic(op, *a, *b);
    }
    let (Some(a), Some(b)) = (numeric(left), numeric(right)) else {
        return Err(mismatch(op, left, right));
    };
    let result = match op {
        BinaryOperator::Add => a + b,
        BinaryOperator::Subtract => a - b,
        BinaryOperator::Multiply => a * b,
        BinaryOperator::Divide | BinaryOperator::Modulo if b == 0.0 => {
            return Err(EvalError::DivisionByZero)
        }
        BinaryOperator::Divide => a / b,
        BinaryOperator::Modulo => a % b,
        _ => return Err(mismatch(op, left, right)),
    };
    Ok(Value::Float(result))
}

fn integer_arithmetic(op: BinaryOperator, a: i64, b: i64) -> EvalResult<Value> {
    let widened = |f: fn(f64, f64) -> f64| Value::Float(f(a as f64, b as f64));
    let value = match op {
        BinaryOperator::Add => a
            .checked_add(b)
            .map(Value::Integer)
            .unwrap_or_else(|| widened(|x, y| x + y)),
        BinaryOperator::Subtract => a
            .checked_sub(b)
            .map(Value::Integer)
            .unwrap_or_else(|| widened(|x, y| x - y)),
        BinaryOperator::Multiply => a
            .checked_mul(b)
            .map(Value::Integer)
            .unwrap_or_else(|| widened(|x, y| x * y)),
        BinaryOperator::Divide | BinaryOperator::Modulo if b == 0 => {
            return Err(EvalError::DivisionByZero)
        }
        BinaryOperator::Divide => match a.checked_rem(b) {
            Some(0) => a
                .checked_div(b)
                .map(Value::Integer)
                .unwrap_or_else(|| widened(|x, y| x / y)),
            _ => widened(|x, y| x / y),
        },
        BinaryOperator::Modulo => Value::Integer(a.checked_rem(b).unwrap_or(0)),
        _ => {
            return Err(mismatch(op, &Value::Integer(a), &Value::Integer(b)));
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::EmptyScope;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn scope() -> ValueMap {
        match Value::from(json!({
            "args": {"value": 15, "name": "Ada", "text": "7"},
            "user": {"id": "42", "roles": ["a", "b", "c"]},
            "count": 3,
            "empty": null
        })) {
            Value::Map(map) => map,
            _ => unreachable!(),
        }
    }

    fn eval(source: &str) -> EvalResult<Value> {
        ExpressionEvaluator::new().evaluate(source, &scope())
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Value::Integer(7));
        assert_eq!(eval("7 / 2").unwrap(), Value::Float(3.5));
        assert_eq!(eval("8 / 2").unwrap(), Value::Integer(4));
        assert_eq!(eval("7 % 4").unwrap(), Value::Integer(3));
        assert_eq!(eval("-count + 1").unwrap(), Value::Integer(-2));
        assert_eq!(eval("1.5 * 2").unwrap(), Value::Float(3.0));
        assert_eq!(eval("1 / 0"), Err(EvalError::DivisionByZero));
        assert!(matches!(
            eval("[1] - 1"),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(
            eval("'Hello, ' + args.name + '!'").unwrap(),
            Value::from("Hello, Ada!")
        );
        assert_eq!(eval("'n' + 1").unwrap(), Value::from("n1"));
    }

    #[test]
    fn test_comparison_and_logic() {
        assert_eq!(eval("args.value > 10").unwrap(), Value::Boolean(true));
        assert_eq!(eval("args.text == 7").unwrap(), Value::Boolean(true));
        assert_eq!(eval("args.text < 10").unwrap(), Value::Boolean(true));
        assert_eq!(eval("empty > 1").unwrap(), Value::Boolean(false));
        assert_eq!(eval("empty || 'fallback'").unwrap(), Value::from("fallback"));
        assert_eq!(eval("count && 'yes'").unwrap(), Value::from("yes"));
        assert_eq!(eval("empty ?? 0").unwrap(), Value::Integer(0));
        assert_eq!(eval("count ?? 0").unwrap(), Value::Integer(3));
        assert_eq!(eval("count > 2 ? 'big' : 'small'").unwrap(), Value::from("big"));
        assert_eq!(eval("!empty").unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_access() {
        assert_eq!(eval("user.roles[-1]").unwrap(), Value::from("c"));
        assert_eq!(eval("user.roles[5]").unwrap(), Value::Null);
        assert_eq!(eval("user.roles.length").unwrap(), Value::Integer(3));
        assert_eq!(eval("user.missing.deeper").unwrap(), Value::Null);
        assert_eq!(eval("user['id']").unwrap(), Value::from("42"));
        assert_eq!(eval("args.name[0]").unwrap(), Value::from("A"));
    }

    #[test]
    fn test_undefined_identifier_is_error() {
        assert_eq!(
            eval("nope + 1"),
            Err(EvalError::UndefinedVariable("nope".to_string()))
        );
        assert_eq!(
            eval("nope(1)"),
            Err(EvalError::UnknownFunction("nope".to_string()))
        );
    }

    #[test]
    fn test_reserved_keys_rejected() {
        assert!(matches!(
            eval("user.__proto__"),
            Err(EvalError::ReservedKey(_))
        ));
        assert!(matches!(
            eval("user['constructor']"),
            Err(EvalError::ReservedKey(_))
        ));
        assert!(matches!(
            eval("{prototype: 1}"),
            Err(EvalError::ReservedKey(_))
        ));
    }

    #[test]
    fn test_interpolate_and_resolve() {
        let evaluator = ExpressionEvaluator::new();
        let scope = scope();
        assert_eq!(
            evaluator
                .interpolate("Hi ${args.name}, you have ${count * 2} points", &scope)
                .unwrap(),
            "Hi Ada, you have 6 points"
        );
        assert_eq!(
            evaluator.interpolate("no markers here", &scope).unwrap(),
            "no markers here"
        );
        assert_eq!(
            evaluator.resolve("${args.value}", &scope).unwrap(),
            Value::Integer(15)
        );
        assert_eq!(
            evaluator.resolve("v=${args.value}", &scope).unwrap(),
            Value::from("v=15")
        );
        assert_eq!(
            evaluator
                .resolve_value(&Value::from(json!({"a": ["${count}"]})), &scope)
                .unwrap(),
            Value::from(json!({"a": [3]}))
        );
    }

    #[test]
    fn test_condition_accepts_wrapped_expression() {
        let evaluator = ExpressionEvaluator::new();
        let scope = scope();
        assert!(evaluator.condition("${args.value > 10}", &scope).unwrap());
        assert!(!evaluator.condition("args.value <= 10", &scope).unwrap());
    }

    #[test]
    fn test_parse_cache_is_bounded() {
        let evaluator = ExpressionEvaluator::with_cache_capacity(2);
        for i in 0..5 {
            evaluator.evaluate(&format!("{} + 1", i), &EmptyScope).unwrap();
        }
        assert!(evaluator.cache.len() <= 2);
    }
}
