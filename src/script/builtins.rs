//! Built-in functions
//!
//! Functions that need to call back into script code (`sorted` with `key=`,
//! `map`, `filter`, `print`) are handled by the interpreter.

use super::ast::BinOp;
use super::error::{Fault, ScriptError, ScriptResult};
use super::methods::{pairs_of, sort_values};
use super::ops::binary_scalar;
use super::value::{Args, Dict, Value};
use crate::frame::column::{reduce, reduction_value, Reduction};

/// Names resolvable as built-in functions
pub const BUILTINS: &[&str] = &[
    "print", "len", "range", "sum", "min", "max", "abs", "round", "sorted", "reversed", "list",
    "dict", "set", "tuple", "str", "int", "float", "bool", "enumerate", "zip", "any", "all",
    "isinstance", "repr", "map", "filter", "type",
];

pub fn lookup(name: &str) -> Option<&'static str> {
    BUILTINS.iter().copied().find(|b| *b == name)
}

fn one_arg<'a>(args: &'a Args, func: &str) -> ScriptResult<&'a Value> {
    args.max_positional(func, 1)?;
    args.require(0, "x", func)
}

fn series_reduction(value: &Value, op: Reduction) -> Option<ScriptResult<Value>> {
    match value {
        Value::Series(s) => Some(
            s.cells()
                .and_then(|cells| reduce(&cells, op))
                .map(reduction_value),
        ),
        _ => None,
    }
}

fn checked_len(items: Vec<Value>, max_items: usize) -> ScriptResult<Value> {
    if items.len() > max_items {
        return Err(ScriptError::new(
            Fault::MemoryLimit,
            format!("collection of {} items exceeds the limit of {}", items.len(), max_items),
        ));
    }
    Ok(Value::list(items))
}

fn length(value: &Value) -> ScriptResult<usize> {
    Ok(match value {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(d) => d.borrow().len(),
        Value::Frame(f) => f.height(),
        Value::Series(s) => s.len(),
        other => {
            return Err(ScriptError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    })
}

fn range(args: &Args, max_items: usize) -> ScriptResult<Value> {
    let ints = args
        .positional
        .iter()
        .map(|v| {
            v.as_int().ok_or_else(|| {
                ScriptError::type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    v.type_name()
                ))
            })
        })
        .collect::<ScriptResult<Vec<i64>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(ScriptError::type_error("range expected 1 to 3 arguments")),
    };
    if step == 0 {
        return Err(ScriptError::value("range() arg 3 must not be zero"));
    }
    // widened so that bounds near the i64 limits cannot overflow
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    let count = if step > 0 {
        (stop - start + step - 1).max(0) / step
    } else {
        (start - stop - step - 1).max(0) / -step
    };
    if count > max_items as i128 {
        return Err(ScriptError::new(
            Fault::MemoryLimit,
            format!("range of {} items exceeds the limit of {}", count, max_items),
        ));
    }
    Ok(Value::list(
        (0..count).map(|i| Value::Int((start + i * step) as i64)).collect(),
    ))
}

/// Elements of a `min`/`max` call: one iterable or several arguments
pub fn extremum_candidates(args: &Args, func: &str) -> ScriptResult<Vec<Value>> {
    let items = match args.positional.as_slice() {
        [single] => single.iter_values()?,
        [] => return Err(ScriptError::type_error(format!("{} expected at least 1 argument", func))),
        many => many.to_vec(),
    };
    if items.is_empty() {
        return match args.kwarg("default") {
            Some(d) => Ok(vec![d.clone()]),
            None => Err(ScriptError::value(format!("{}() arg is an empty sequence", func))),
        };
    }
    Ok(items)
}

fn extremum(args: &Args, func: &str, want_max: bool) -> ScriptResult<Value> {
    if let [single] = args.positional.as_slice() {
        let op = if want_max { Reduction::Max } else { Reduction::Min };
        if let Some(result) = series_reduction(single, op) {
            return result;
        }
    }
    let items = extremum_candidates(args, func)?;
    let mut best = items[0].clone();
    for item in &items[1..] {
        let ord = item.compare(&best)?;
        if (want_max && ord.is_gt()) || (!want_max && ord.is_lt()) {
            best = item.clone();
        }
    }
    Ok(best)
}

fn sum(args: &Args) -> ScriptResult<Value> {
    let iterable = args.require(0, "iterable", "sum")?;
    if let Some(result) = series_reduction(iterable, Reduction::Sum) {
        return result;
    }
    let mut total = args.get(1, "start").cloned().unwrap_or(Value::Int(0));
    for item in iterable.iter_values()? {
        total = binary_scalar(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn round(args: &Args) -> ScriptResult<Value> {
    let number = args.require(0, "number", "round")?;
    let digits = args.get(1, "ndigits").filter(|v| !matches!(v, Value::None));
    match (number, digits) {
        (Value::Int(i), _) => Ok(Value::Int(*i)),
        (Value::Bool(b), _) => Ok(Value::Int(*b as i64)),
        (Value::Float(f), None) => {
            if !f.is_finite() {
                return Err(ScriptError::value("cannot convert float NaN or infinity to integer"));
            }
            Ok(Value::Int(f.round_ties_even() as i64))
        }
        (Value::Float(f), Some(n)) => {
            let n = n
                .as_int()
                .ok_or_else(|| ScriptError::type_error("ndigits must be an integer"))?;
            let scale = 10f64.powi(n as i32);
            Ok(Value::Float((f * scale).round_ties_even() / scale))
        }
        (other, _) => Err(ScriptError::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn to_int(value: &Value) -> ScriptResult<Value> {
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Value::Float(_) => Err(ScriptError::value("cannot convert float NaN or infinity to integer")),
        Value::Str(s) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| ScriptError::value(format!("invalid literal for int() with base 10: {}", value.repr()))),
        other => Err(ScriptError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float(value: &Value) -> ScriptResult<Value> {
    if let Some(f) = value.as_f64() {
        return Ok(Value::Float(f));
    }
    match value {
        Value::Str(s) => {
            let text = s.trim().to_lowercase();
            let parsed = match text.as_str() {
                "nan" => Some(f64::NAN),
                "inf" | "infinity" => Some(f64::INFINITY),
                "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                other => other.parse::<f64>().ok(),
            };
            parsed
                .map(Value::Float)
                .ok_or_else(|| ScriptError::value(format!("could not convert string to float: {}", value.repr())))
        }
        other => Err(ScriptError::type_error(format!(
            "float() argument must be a string or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

/// Type names accepted by `isinstance`
fn instance_of(value: &Value, class: &Value) -> ScriptResult<bool> {
    match class {
        Value::Tuple(items) => {
            for item in items.iter() {
                if instance_of(value, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Builtin(name) => Ok(match *name {
            "int" => matches!(value, Value::Int(_) | Value::Bool(_)),
            "float" => matches!(value, Value::Float(_)),
            "str" => matches!(value, Value::Str(_)),
            "bool" => matches!(value, Value::Bool(_)),
            "list" => matches!(value, Value::List(_)),
            "tuple" => matches!(value, Value::Tuple(_)),
            "dict" => matches!(value, Value::Dict(_)),
            "pandas.DataFrame" => matches!(value, Value::Frame(_)),
            "pandas.Series" => matches!(value, Value::Series(_)),
            _ => false,
        }),
        Value::ExceptionType(fault) => Ok(match value {
            Value::Exception { fault: f, .. } => f == fault || fault.name() == "Exception",
            _ => false,
        }),
        other => Err(ScriptError::type_error(format!(
            "isinstance() arg 2 must be a type, not '{}'",
            other.type_name()
        ))),
    }
}

fn dedup(items: Vec<Value>) -> ScriptResult<Vec<Value>> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !item.is_hashable() {
            return Err(ScriptError::type_error(format!("unhashable type: '{}'", item.type_name())));
        }
        if !out.iter().any(|v| v.equals(&item)) {
            out.push(item);
        }
    }
    Ok(out)
}

pub fn call_builtin(name: &str, args: &Args, max_items: usize) -> ScriptResult<Value> {
    match name {
        "len" => Ok(Value::Int(length(one_arg(args, name)?)? as i64)),
        "range" => range(args, max_items),
        "sum" => sum(args),
        "min" => extremum(args, name, false),
        "max" => extremum(args, name, true),
        "abs" => match one_arg(args, name)? {
            Value::Int(i) => Ok(i.checked_abs().map_or(Value::Float((*i as f64).abs()), Value::Int)),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            Value::Bool(b) => Ok(Value::Int(*b as i64)),
            other => Err(ScriptError::type_error(format!(
                "bad operand type for abs(): '{}'",
                other.type_name()
            ))),
        },
        "round" => round(args),
        "sorted" => {
            let mut items = args.require(0, "iterable", name)?.iter_values()?;
            sort_values(&mut items, args.bool_or(99, "reverse", false)?)?;
            Ok(Value::list(items))
        }
        "reversed" => {
            let mut items = one_arg(args, name)?.iter_values()?;
            items.reverse();
            Ok(Value::list(items))
        }
        "list" => match args.positional.first() {
            Some(v) => checked_len(v.iter_values()?, max_items),
            None => Ok(Value::list(Vec::new())),
        },
        "tuple" => match args.positional.first() {
            Some(v) => Ok(Value::tuple(v.iter_values()?)),
            None => Ok(Value::tuple(Vec::new())),
        },
        // sets are modelled as de-duplicated lists in first-seen order
        "set" => match args.positional.first() {
            Some(v) => Ok(Value::list(dedup(v.iter_values()?)?)),
            None => Ok(Value::list(Vec::new())),
        },
        "dict" => {
            let mut dict = match args.positional.first() {
                Some(Value::Dict(d)) => d.borrow().clone(),
                Some(other) => {
                    let mut d = Dict::new();
                    for (k, v) in pairs_of(other)? {
                        d.insert(k, v)?;
                    }
                    d
                }
                None => Dict::new(),
            };
            for (k, v) in &args.keywords {
                dict.insert(Value::str(k.clone()), v.clone())?;
            }
            Ok(Value::dict(dict))
        }
        "str" => Ok(Value::str(args.positional.first().map(|v| v.to_display()).unwrap_or_default())),
        "repr" => Ok(Value::str(one_arg(args, name)?.repr())),
        "int" => match args.positional.first() {
            Some(v) => to_int(v),
            None => Ok(Value::Int(0)),
        },
        "float" => match args.positional.first() {
            Some(v) => to_float(v),
            None => Ok(Value::Float(0.0)),
        },
        "bool" => match args.positional.first() {
            Some(v) => Ok(Value::Bool(v.truthy()?)),
            None => Ok(Value::Bool(false)),
        },
        "enumerate" => {
            let start = args.int_or(1, "start", 0)?;
            let items = args.require(0, "iterable", name)?.iter_values()?;
            Ok(Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
                    .collect(),
            ))
        }
        "zip" => {
            let columns = args
                .positional
                .iter()
                .map(|v| v.iter_values())
                .collect::<ScriptResult<Vec<_>>>()?;
            let len = columns.iter().map(|c| c.len()).min().unwrap_or(0);
            Ok(Value::list(
                (0..len)
                    .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        "any" => {
            for item in one_arg(args, name)?.iter_values()? {
                if item.truthy()? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "all" => {
            for item in one_arg(args, name)?.iter_values()? {
                if !item.truthy()? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "isinstance" => {
            let value = args.require(0, "obj", name)?;
            let class = args.require(1, "class_or_tuple", name)?;
            Ok(Value::Bool(instance_of(value, class)?))
        }
        "type" => Ok(Value::str(one_arg(args, name)?.type_name())),
        other => Err(ScriptError::name(format!("name '{}' is not defined", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Value>) -> ScriptResult<Value> {
        call_builtin(name, &Args::positional(args), 1000)
    }

    #[test]
    fn test_range_and_limit() {
        assert_eq!(call("range", vec![Value::Int(1), Value::Int(7), Value::Int(2)]).unwrap().repr(), "[1, 3, 5]");
        assert_eq!(call("range", vec![Value::Int(3), Value::Int(0), Value::Int(-1)]).unwrap().repr(), "[3, 2, 1]");
        let err = call("range", vec![Value::Int(5000)]).unwrap_err();
        assert_eq!(err.fault, Fault::MemoryLimit);
    }

    #[test]
    fn test_round_is_half_even() {
        assert!(matches!(call("round", vec![Value::Float(2.5)]).unwrap(), Value::Int(2)));
        assert!(matches!(call("round", vec![Value::Float(3.5)]).unwrap(), Value::Int(4)));
        match call("round", vec![Value::Float(1.23456), Value::Int(2)]).unwrap() {
            Value::Float(f) => assert!((f - 1.23).abs() < 1e-9),
            other => panic!("unexpected {}", other.repr()),
        }
    }

    #[test]
    fn test_min_max_sum() {
        let items = Value::list(vec![Value::Int(3), Value::Float(1.5), Value::Int(9)]);
        assert_eq!(call("max", vec![items.clone()]).unwrap().repr(), "9");
        assert_eq!(call("min", vec![items.clone()]).unwrap().repr(), "1.5");
        assert_eq!(call("sum", vec![items]).unwrap().repr(), "13.5");
        assert!(call("max", vec![Value::list(vec![])]).is_err());
    }

    #[test]
    fn test_conversions() {
        assert!(matches!(call("int", vec![Value::str(" 42 ")]).unwrap(), Value::Int(42)));
        assert!(matches!(call("int", vec![Value::Float(-2.7)]).unwrap(), Value::Int(-2)));
        assert_eq!(call("int", vec![Value::str("x")]).unwrap_err().fault, Fault::Value);
        assert_eq!(call("set", vec![Value::list(vec![Value::Int(1), Value::Int(1), Value::Int(2)])]).unwrap().repr(), "[1, 2]");
    }
}
