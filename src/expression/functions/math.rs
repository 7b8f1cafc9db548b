use std::cmp::Ordering;

use rand::Rng;

use super::{invalid, number, optional_integer, require, spread, Registry};
use crate::expression::EvalResult;
use crate::value::Value;

pub(super) fn register(registry: &mut Registry) {
    registry.insert("random", random);
    registry.insert("round", round);
    registry.insert("floor", floor);
    registry.insert("ceil", ceil);
    registry.insert("abs", abs);
    registry.insert("min", min);
    registry.insert("max", max);
    registry.insert("clamp", clamp);
    registry.insert("sum", sum);
    registry.insert("avg", avg);
}

/// Whole floats become integers so that `floor(2.5) == 2` stays integral.
fn integral(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::Integer(f as i64)
    } else {
        Value::Float(f)
    }
}

/// `random()` is a float in [0, 1); `random(min, max)` an integer in
/// [min, max].
fn random(args: &[Value]) -> EvalResult<Value> {
    let mut rng = rand::thread_rng();
    if args.is_empty() {
        return Ok(Value::Float(rng.gen::<f64>()));
    }
    let (low, high) = if args.len() == 1 {
        (0, number("random", args, 0)? as i64)
    } else {
        (number("random", args, 0)? as i64, number("random", args, 1)? as i64)
    };
    if low > high {
        return Err(invalid("random", "min must not exceed max"));
    }
    Ok(Value::Integer(rng.gen_range(low..=high)))
}

fn round(args: &[Value]) -> EvalResult<Value> {
    let x = number("round", args, 0)?;
    match optional_integer("round", args, 1)? {
        None | Some(0) => Ok(integral(x.round())),
        Some(digits) => {
            let factor = 10f64.powi(digits.clamp(-15, 15) as i32);
            Ok(Value::Float((x * factor).round() / factor))
        }
    }
}

fn floor(args: &[Value]) -> EvalResult<Value> {
    Ok(integral(number("floor", args, 0)?.floor()))
}

fn ceil(args: &[Value]) -> EvalResult<Value> {
    Ok(integral(number("ceil", args, 0)?.ceil()))
}

fn abs(args: &[Value]) -> EvalResult<Value> {
    match args.first() {
        Some(Value::Integer(i)) => Ok(i
            .checked_abs()
            .map(Value::Integer)
            .unwrap_or(Value::Float((*i as f64).abs()))),
        _ => Ok(Value::Float(number("abs", args, 0)?.abs())),
    }
}

fn numbers(function: &str, args: &[Value]) -> EvalResult<Vec<Value>> {
    let values = spread(args);
    values
        .iter()
        .enumerate()
        .map(|(i, v)| match v {
            Value::Integer(_) | Value::Float(_) => Ok(v.clone()),
            _ => number(function, values, i).map(Value::Float),
        })
        .collect()
}

fn extreme(function: &str, args: &[Value], pick_greater: bool) -> EvalResult<Value> {
    let values = numbers(function, args)?;
    let mut iter = values.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| invalid(function, "expected at least one number"))?;
    Ok(iter.fold(first, |best, candidate| {
        let ordering = candidate.compare(&best);
        let better = if pick_greater {
            ordering == Ordering::Greater
        } else {
            ordering == Ordering::Less
        };
        if better {
            candidate
        } else {
            best
        }
    }))
}

fn min(args: &[Value]) -> EvalResult<Value> {
    extreme("min", args, false)
}

fn max(args: &[Value]) -> EvalResult<Value> {
    extreme("max", args, true)
}

fn clamp(args: &[Value]) -> EvalResult<Value> {
    require("clamp", args, 3)?;
    let low = number("clamp", args, 1)?;
    let high = number("clamp", args, 2)?;
    if low > high {
        return Err(invalid("clamp", "lower bound exceeds upper bound"));
    }
    let x = number("clamp", args, 0)?;
    if x < low {
        Ok(args[1].clone())
    } else if x > high {
        Ok(args[2].clone())
    } else {
        Ok(args[0].clone())
    }
}

fn sum(args: &[Value]) -> EvalResult<Value> {
    let mut total_int: i64 = 0;
    let mut total_float = 0.0;
    let mut using_float = false;
    for value in numbers("sum", args)? {
        match value {
            Value::Integer(i) if !using_float => match total_int.checked_add(i) {
                Some(total) => total_int = total,
                None => {
                    using_float = true;
                    total_float = total_int as f64 + i as f64;
                }
            },
            other => {
                if !using_float {
                    total_float = total_int as f64;
                    using_float = true;
                }
                total_float += other.as_f64().unwrap_or(0.0);
            }
        }
    }
    Ok(if using_float {
        Value::Float(total_float)
    } else {
        Value::Integer(total_int)
    })
}

fn avg(args: &[Value]) -> EvalResult<Value> {
    let values = numbers("avg", args)?;
    if values.is_empty() {
        return Ok(Value::Null);
    }
    let total: f64 = values.iter().filter_map(Value::as_f64).sum();
    Ok(Value::Float(total / values.len() as f64))
}
