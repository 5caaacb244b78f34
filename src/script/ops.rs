//! Scalar operators
//!
//! Arithmetic and comparison on plain values. Series operands are routed to the
//! element-wise versions in `frame::column`, which call back into these for each cell.

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::error::{Fault, ScriptError, ScriptResult};
use super::format::percent_format;
use super::value::Value;
use std::cmp::Ordering;

fn unsupported(op: &str, left: &Value, right: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        left.type_name(),
        right.type_name()
    ))
}

fn zero_division(message: &str) -> ScriptError {
    ScriptError::new(Fault::ZeroDivision, message)
}

pub fn binary_scalar(op: BinOp, left: &Value, right: &Value) -> ScriptResult<Value> {
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = a.as_ref().clone();
            items.extend(b.iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinOp::Mul, Value::Str(s), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Str(s)) => {
            Ok(Value::Str(s.repeat((*n).max(0) as usize)))
        }
        (BinOp::Mul, Value::List(l), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::List(l)) => {
            let items = l.borrow();
            let mut out = Vec::with_capacity(items.len() * (*n).max(0) as usize);
            for _ in 0..(*n).max(0) {
                out.extend(items.iter().cloned());
            }
            Ok(Value::list(out))
        }
        (BinOp::Mod, Value::Str(template), args) => Ok(Value::Str(percent_format(template, args)?)),
        (BinOp::BitAnd, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a && *b)),
        (BinOp::BitOr, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a || *b)),
        (BinOp::BitAnd, a, b) | (BinOp::BitOr, a, b) => match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) if !matches!(a, Value::Float(_)) && !matches!(b, Value::Float(_)) => {
                Ok(Value::Int(if op == BinOp::BitAnd { x & y } else { x | y }))
            }
            _ => Err(unsupported(op.symbol(), left, right)),
        },
        (_, a, b) if a.is_number() && b.is_number() => numeric(op, a, b),
        _ => Err(unsupported(op.symbol(), left, right)),
    }
}

fn numeric(op: BinOp, left: &Value, right: &Value) -> ScriptResult<Value> {
    let int_operands = !matches!(left, Value::Float(_)) && !matches!(right, Value::Float(_));
    if int_operands {
        let (a, b) = (left.as_int().unwrap_or(0), right.as_int().unwrap_or(0));
        let checked = match op {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::FloorDiv => {
                if b == 0 {
                    return Err(zero_division("integer division or modulo by zero"));
                }
                python_div_int(a, b)
            }
            BinOp::Mod => {
                if b == 0 {
                    return Err(zero_division("integer division or modulo by zero"));
                }
                Some(python_mod_int(a, b))
            }
            BinOp::Pow if b >= 0 => u32::try_from(b).ok().and_then(|e| a.checked_pow(e)),
            _ => None,
        };
        if let Some(value) = checked {
            return Ok(Value::Int(value));
        }
    }

    let (a, b) = (left.as_f64().unwrap_or(0.0), right.as_f64().unwrap_or(0.0));
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(zero_division("division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => a.powf(b),
        BinOp::BitAnd | BinOp::BitOr => return Err(unsupported(op.symbol(), left, right)),
    };
    Ok(Value::Float(value))
}

/// Floor division; `None` when the quotient does not fit (`i64::MIN // -1`)
fn python_div_int(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && (a < 0) != (b < 0) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn python_mod_int(a: i64, b: i64) -> i64 {
    if b == -1 {
        return 0;
    }
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        r + b
    } else {
        r
    }
}

pub fn unary_scalar(op: UnaryOp, operand: &Value) -> ScriptResult<Value> {
    match (op, operand) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy()?)),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, v) if v.as_int().is_some() => {
            let i = v.as_int().unwrap_or(0);
            Ok(i.checked_neg().map_or(Value::Float(-(i as f64)), Value::Int))
        }
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Int(!(*b as i64))),
        (UnaryOp::Invert, Value::Int(i)) => Ok(Value::Int(!i)),
        (op, v) => Err(ScriptError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                UnaryOp::Not => "not",
                UnaryOp::Invert => "~",
            },
            v.type_name()
        ))),
    }
}

pub fn compare_scalar(op: CmpOp, left: &Value, right: &Value) -> ScriptResult<bool> {
    let ordered = |want: fn(Ordering) -> bool| -> ScriptResult<bool> {
        if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
            if a.is_nan() || b.is_nan() {
                return Ok(false);
            }
        }
        Ok(want(left.compare(right)?))
    };
    match op {
        CmpOp::Eq => Ok(left.equals(right)),
        CmpOp::NotEq => Ok(!left.equals(right)),
        CmpOp::Lt => ordered(|o| o == Ordering::Less),
        CmpOp::LtE => ordered(|o| o != Ordering::Greater),
        CmpOp::Gt => ordered(|o| o == Ordering::Greater),
        CmpOp::GtE => ordered(|o| o != Ordering::Less),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => Ok(!contains(right, left)?),
        CmpOp::Is => Ok(left.identical(right)),
        CmpOp::IsNot => Ok(!left.identical(right)),
    }
}

/// `item in container`
pub fn contains(container: &Value, item: &Value) -> ScriptResult<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_str())),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| v.equals(item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.equals(item))),
        Value::Dict(d) => Ok(d.borrow().contains(item)),
        Value::Frame(f) => Ok(item.as_str().map(|name| f.has_column(name)).unwrap_or(false)),
        Value::Series(s) => {
            let key = crate::frame::cells::Cell::from_value(item)?;
            Ok(s.row_labels().iter().any(|label| *label == key))
        }
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_semantics() {
        assert!(matches!(
            binary_scalar(BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap(),
            Value::Float(f) if f == 3.5
        ));
        assert!(matches!(
            binary_scalar(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap(),
            Value::Int(-4)
        ));
        assert!(matches!(
            binary_scalar(BinOp::Mod, &Value::Int(-7), &Value::Int(3)).unwrap(),
            Value::Int(2)
        ));
    }

    #[test]
    fn test_division_by_zero() {
        let err = binary_scalar(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.fault, Fault::ZeroDivision);
    }

    #[test]
    fn test_mixed_types_are_rejected() {
        let err = binary_scalar(BinOp::Add, &Value::Int(1), &Value::str("a")).unwrap_err();
        assert_eq!(err.fault, Fault::Type);
        assert!(err.message.contains("'int' and 'str'"));
    }

    #[test]
    fn test_membership() {
        let list = Value::list(vec![Value::str("a"), Value::Int(2)]);
        assert!(compare_scalar(CmpOp::In, &Value::Int(2), &list).unwrap());
        assert!(compare_scalar(CmpOp::NotIn, &Value::str("z"), &list).unwrap());
        assert!(compare_scalar(CmpOp::In, &Value::str("ell"), &Value::str("hello")).unwrap());
    }
}
