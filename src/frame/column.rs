//! Series operations

use super::cells::{cells_to_series, dtype_name, sort_permutation, Cell};
use super::{FrameValue, Labels, SeriesValue};
use crate::script::ast::{BinOp, CmpOp, UnaryOp};
use crate::script::error::{Fault, ScriptError, ScriptResult};
use crate::script::ops;
use crate::script::value::{Args, Dict, Value};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use polars::prelude::*;
use std::collections::HashSet;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Count,
    Std,
    Nunique,
    First,
    Last,
    Size,
}

impl Reduction {
    pub fn from_name(name: &str) -> Option<Reduction> {
        Some(match name {
            "sum" => Reduction::Sum,
            "mean" | "average" => Reduction::Mean,
            "median" => Reduction::Median,
            "min" => Reduction::Min,
            "max" => Reduction::Max,
            "count" => Reduction::Count,
            "std" => Reduction::Std,
            "nunique" => Reduction::Nunique,
            "first" => Reduction::First,
            "last" => Reduction::Last,
            "size" => Reduction::Size,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Reduction::Sum => "sum",
            Reduction::Mean => "mean",
            Reduction::Median => "median",
            Reduction::Min => "min",
            Reduction::Max => "max",
            Reduction::Count => "count",
            Reduction::Std => "std",
            Reduction::Nunique => "nunique",
            Reduction::First => "first",
            Reduction::Last => "last",
            Reduction::Size => "size",
        }
    }

    /// Reductions that only make sense over numbers
    pub fn numeric_only(&self) -> bool {
        matches!(
            self,
            Reduction::Sum | Reduction::Mean | Reduction::Median | Reduction::Std
        )
    }
}

fn numbers(present: &[&Cell], op: &str) -> ScriptResult<Vec<f64>> {
    present
        .iter()
        .map(|c| {
            c.as_f64().ok_or_else(|| {
                ScriptError::type_error(format!(
                    "could not convert string to float: '{}' (in {})",
                    c.label(),
                    op
                ))
            })
        })
        .collect()
}

fn sorted_numbers(present: &[&Cell], op: &str) -> ScriptResult<Vec<f64>> {
    let mut values = numbers(present, op)?;
    values.sort_by(|a, b| a.total_cmp(b));
    Ok(values)
}

pub fn quantile_of(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Reduce a column of cells, skipping nulls
pub fn reduce(cells: &[Cell], op: Reduction) -> ScriptResult<Cell> {
    let present: Vec<&Cell> = cells.iter().filter(|c| !c.is_null()).collect();
    Ok(match op {
        Reduction::Size => Cell::Int(cells.len() as i64),
        Reduction::Count => Cell::Int(present.len() as i64),
        Reduction::First => present.first().map(|c| (*c).clone()).unwrap_or(Cell::Null),
        Reduction::Last => present.last().map(|c| (*c).clone()).unwrap_or(Cell::Null),
        Reduction::Nunique => {
            let distinct: HashSet<String> = present.iter().map(|c| c.hash_key()).collect();
            Cell::Int(distinct.len() as i64)
        }
        Reduction::Sum => {
            if !present.is_empty() && present.iter().all(|c| matches!(c, Cell::Str(_))) {
                Cell::Str(present.iter().map(|c| c.label()).collect())
            } else if present.iter().all(|c| matches!(c, Cell::Int(_) | Cell::Bool(_))) {
                let mut total: i64 = 0;
                let mut overflow = false;
                for c in &present {
                    let v = c.as_f64().unwrap_or(0.0) as i64;
                    match total.checked_add(v) {
                        Some(t) => total = t,
                        None => overflow = true,
                    }
                }
                if overflow {
                    Cell::Float(numbers(&present, "sum")?.iter().sum())
                } else {
                    Cell::Int(total)
                }
            } else {
                Cell::float(numbers(&present, "sum")?.iter().sum())
            }
        }
        Reduction::Mean => {
            let values = numbers(&present, "mean")?;
            if values.is_empty() {
                Cell::Null
            } else {
                Cell::float(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
        Reduction::Median => match quantile_of(&sorted_numbers(&present, "median")?, 0.5) {
            Some(v) => Cell::float(v),
            None => Cell::Null,
        },
        Reduction::Std => {
            let values = numbers(&present, "std")?;
            if values.len() < 2 {
                Cell::Null
            } else {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                    / (values.len() - 1) as f64;
                Cell::float(var.sqrt())
            }
        }
        Reduction::Min | Reduction::Max => {
            let all_numeric = present.iter().all(|c| c.is_numeric());
            let all_str = present.iter().all(|c| matches!(c, Cell::Str(_)));
            if !all_numeric && !all_str {
                return Err(ScriptError::type_error(format!(
                    "'{}' not supported between instances of 'str' and 'float'",
                    if op == Reduction::Min { "<" } else { ">" }
                )));
            }
            let pick = present.iter().copied().reduce(|best, c| {
                let ord = c.total_cmp(best);
                let better = if op == Reduction::Min {
                    ord == std::cmp::Ordering::Less
                } else {
                    ord == std::cmp::Ordering::Greater
                };
                if better {
                    c
                } else {
                    best
                }
            });
            pick.cloned().unwrap_or(Cell::Null)
        }
    })
}

/// Result of a reduction as a script value; missing numbers read as NaN
pub fn reduction_value(cell: Cell) -> Value {
    cell.to_value()
}

/// Summary statistics in the order `describe()` reports them
pub fn describe_cells(cells: &[Cell]) -> ScriptResult<Vec<(String, Cell)>> {
    let present: Vec<&Cell> = cells.iter().filter(|c| !c.is_null()).collect();
    if present.iter().all(|c| c.is_numeric()) {
        let sorted = sorted_numbers(&present, "describe")?;
        let q = |p: f64| quantile_of(&sorted, p).map(Cell::float).unwrap_or(Cell::Null);
        Ok(vec![
            ("count".to_string(), Cell::Float(present.len() as f64)),
            ("mean".to_string(), reduce(cells, Reduction::Mean)?),
            ("std".to_string(), reduce(cells, Reduction::Std)?),
            ("min".to_string(), q(0.0)),
            ("25%".to_string(), q(0.25)),
            ("50%".to_string(), q(0.5)),
            ("75%".to_string(), q(0.75)),
            ("max".to_string(), q(1.0)),
        ])
    } else {
        let counts = value_counts(cells);
        let (top, freq) = counts
            .first()
            .map(|(c, n)| (c.clone(), Cell::Int(*n as i64)))
            .unwrap_or((Cell::Null, Cell::Null));
        Ok(vec![
            ("count".to_string(), Cell::Int(present.len() as i64)),
            ("unique".to_string(), reduce(cells, Reduction::Nunique)?),
            ("top".to_string(), top),
            ("freq".to_string(), freq),
        ])
    }
}

/// Distinct non-null values with their counts, most frequent first
pub fn value_counts(cells: &[Cell]) -> Vec<(Cell, usize)> {
    let mut seen: Vec<(Cell, usize)> = Vec::new();
    let mut positions: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for cell in cells.iter().filter(|c| !c.is_null()) {
        match positions.get(&cell.hash_key()) {
            Some(&pos) => seen[pos].1 += 1,
            None => {
                positions.insert(cell.hash_key(), seen.len());
                seen.push((cell.clone(), 1));
            }
        }
    }
    // stable: ties keep first-seen order
    seen.sort_by(|a, b| b.1.cmp(&a.1));
    seen
}

/* ===================== Element-wise operators ===================== */

fn operand_cells(value: &Value, len: usize) -> ScriptResult<Vec<Cell>> {
    match value {
        Value::Series(s) => {
            if s.len() != len {
                return Err(ScriptError::value(format!(
                    "Can only compare identically-labeled Series objects (lengths {} and {})",
                    len,
                    s.len()
                )));
            }
            s.cells()
        }
        Value::List(_) | Value::Tuple(_) => {
            let items = value.iter_values()?;
            if items.len() != len {
                return Err(ScriptError::value(format!(
                    "Lengths must match to compare ({} vs {})",
                    len,
                    items.len()
                )));
            }
            items.iter().map(Cell::from_value).collect()
        }
        scalar => Ok(vec![Cell::from_value(scalar)?; len]),
    }
}

/// The series operand that shapes the result
fn anchor<'a>(left: &'a Value, right: &'a Value) -> ScriptResult<&'a SeriesValue> {
    match (left, right) {
        (Value::Series(s), _) | (_, Value::Series(s)) => Ok(s),
        _ => Err(ScriptError::type_error("expected a Series operand")),
    }
}

fn tracked_result(left: &Value, right: &Value, mut series: SeriesValue) -> Value {
    series.tracked = left.is_tracked() || right.is_tracked();
    Value::Series(series)
}

pub fn binary(op: BinOp, left: &Value, right: &Value) -> ScriptResult<Value> {
    let base = anchor(left, right)?;
    let len = base.len();
    let (a, b) = (operand_cells(left, len)?, operand_cells(right, len)?);
    let mut out = Vec::with_capacity(len);
    for (x, y) in a.iter().zip(b.iter()) {
        let cell = match op {
            BinOp::BitAnd | BinOp::BitOr => {
                let (p, q) = (truthy_cell(x), truthy_cell(y));
                Cell::Bool(if op == BinOp::BitAnd { p && q } else { p || q })
            }
            _ if x.is_null() || y.is_null() => Cell::Null,
            _ => match ops::binary_scalar(op, &x.to_value(), &y.to_value()) {
                Ok(v) => Cell::from_value(&v)?,
                Err(e) if e.fault == Fault::ZeroDivision => {
                    // element-wise division by zero yields inf or NaN instead of raising
                    let p = x.as_f64().unwrap_or(0.0);
                    if p == 0.0 || op == BinOp::Mod {
                        Cell::Null
                    } else {
                        Cell::Float(p.signum() * f64::INFINITY)
                    }
                }
                Err(e) => return Err(e),
            },
        };
        out.push(cell);
    }
    let name = match left {
        Value::Series(s) => s.name().to_string(),
        _ => base.name().to_string(),
    };
    let series = base.derived(cells_to_series(&name, &out));
    Ok(tracked_result(left, right, series))
}

fn truthy_cell(cell: &Cell) -> bool {
    match cell {
        Cell::Null => false,
        Cell::Bool(b) => *b,
        Cell::Int(i) => *i != 0,
        Cell::Float(f) => *f != 0.0,
        Cell::Str(s) => !s.is_empty(),
    }
}

pub fn compare(op: CmpOp, left: &Value, right: &Value) -> ScriptResult<Value> {
    let base = anchor(left, right)?;
    let len = base.len();
    let (a, b) = (operand_cells(left, len)?, operand_cells(right, len)?);
    let mut out = Vec::with_capacity(len);
    for (x, y) in a.iter().zip(b.iter()) {
        let flag = if x.is_null() || y.is_null() {
            op == CmpOp::NotEq
        } else {
            ops::compare_scalar(op, &x.to_value(), &y.to_value())?
        };
        out.push(Cell::Bool(flag));
    }
    let series = base.derived(cells_to_series(base.name(), &out));
    Ok(tracked_result(left, right, series))
}

pub fn unary(op: UnaryOp, series: &SeriesValue) -> ScriptResult<Value> {
    let cells = series.cells()?;
    let out = cells
        .iter()
        .map(|c| match (op, c) {
            (_, Cell::Null) => Ok(Cell::Null),
            (UnaryOp::Invert, Cell::Bool(b)) | (UnaryOp::Not, Cell::Bool(b)) => Ok(Cell::Bool(!b)),
            _ => Cell::from_value(&ops::unary_scalar(op, &c.to_value())?),
        })
        .collect::<ScriptResult<Vec<_>>>()?;
    Ok(Value::Series(series.derived_cells(&out)))
}

/* ===================== Indexing ===================== */

pub fn mask_of(value: &Value) -> Option<ScriptResult<Vec<bool>>> {
    match value {
        Value::Series(s) if s.data.dtype() == &DataType::Boolean => {
            Some(s.cells().map(|cells| cells.iter().map(truthy_cell).collect()))
        }
        _ => None,
    }
}

pub fn select_positions(series: &SeriesValue, positions: &[usize]) -> ScriptResult<SeriesValue> {
    let cells = series.cells()?;
    let picked: Vec<Cell> = positions.iter().map(|&i| cells[i].clone()).collect();
    let labels = series.labels.as_ref().map(|l| Labels {
        name: l.name.clone(),
        values: positions.iter().map(|&i| l.values[i].clone()).collect(),
    });
    Ok(SeriesValue {
        data: cells_to_series(series.name(), &picked),
        labels: labels.map(Rc::new),
        tracked: series.tracked,
    })
}

pub fn slice_positions(len: usize, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> ScriptResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(ScriptError::value("slice step cannot be zero"));
    }
    let n = len as i64;
    let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
    let norm = |v: i64| if v < 0 { v + n } else { v };
    let mut out = Vec::new();
    if step > 0 {
        let start = clamp(lower.map(norm).unwrap_or(0), 0, n);
        let stop = clamp(upper.map(norm).unwrap_or(n), 0, n);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = clamp(lower.map(norm).unwrap_or(n - 1), -1, n - 1);
        let stop = clamp(upper.map(norm).unwrap_or(-1), -1, n - 1);
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

pub fn subscript(series: &SeriesValue, key: &Value) -> ScriptResult<Value> {
    if let Some(mask) = mask_of(key) {
        let mask = mask?;
        if mask.len() != series.len() {
            return Err(ScriptError::index(format!(
                "Boolean index has wrong length: {} instead of {}",
                mask.len(),
                series.len()
            )));
        }
        let positions: Vec<usize> = (0..mask.len()).filter(|&i| mask[i]).collect();
        return Ok(Value::Series(select_positions(series, &positions)?));
    }
    match key {
        Value::Slice { lower, upper, step } => {
            let positions = slice_positions(series.len(), *lower, *upper, *step)?;
            Ok(Value::Series(select_positions(series, &positions)?))
        }
        Value::List(_) | Value::Tuple(_) => {
            let keys = key.iter_values()?;
            let mut positions = Vec::new();
            for k in &keys {
                positions.push(locate(series, k)?);
            }
            Ok(Value::Series(select_positions(series, &positions)?))
        }
        other => {
            let pos = locate(series, other)?;
            let cells = series.cells()?;
            Ok(cells[pos].to_value())
        }
    }
}

/// Label lookup first, then position for integer keys
fn locate(series: &SeriesValue, key: &Value) -> ScriptResult<usize> {
    let wanted = Cell::from_value(key)?;
    if let Some(labels) = &series.labels {
        if let Some(pos) = labels.values.iter().position(|l| *l == wanted) {
            return Ok(pos);
        }
    }
    if let Value::Int(i) = key {
        let idx = if *i < 0 { *i + series.len() as i64 } else { *i };
        if idx >= 0 && (idx as usize) < series.len() {
            return Ok(idx as usize);
        }
        return Err(ScriptError::index(format!("index {} is out of bounds", i)));
    }
    Err(ScriptError::key(key.repr()))
}

pub fn attribute(series: &SeriesValue, name: &str) -> ScriptResult<Option<Value>> {
    Ok(Some(match name {
        "values" => Value::list(series.values()?),
        "index" => Value::list(series.row_labels().iter().map(|c| c.to_value()).collect()),
        "name" => Value::str(series.name()),
        "shape" => Value::tuple(vec![Value::Int(series.len() as i64)]),
        "size" => Value::Int(series.len() as i64),
        "dtype" => Value::str(dtype_name(series.data.dtype())),
        "empty" => Value::Bool(series.is_empty()),
        _ => return Ok(None),
    }))
}

/* ===================== Methods ===================== */

fn with_positions_sorted(series: &SeriesValue, ascending: bool) -> ScriptResult<SeriesValue> {
    let cells = series.cells()?;
    let order = sort_permutation(&[cells], &[ascending], series.len());
    select_positions(series, &order)
}

fn scalar_arg(args: &Args, index: usize, name: &str, func: &str) -> ScriptResult<Cell> {
    Cell::from_value(args.require(index, name, func)?)
}

fn to_bool_series(series: &SeriesValue, flags: Vec<bool>) -> Value {
    let cells: Vec<Cell> = flags.into_iter().map(Cell::Bool).collect();
    Value::Series(series.derived_cells(&cells))
}

pub fn call_method(series: &SeriesValue, name: &str, args: &Args) -> ScriptResult<Value> {
    if let Some(op) = Reduction::from_name(name) {
        let cells = series.cells()?;
        return Ok(reduction_value(reduce(&cells, op)?));
    }
    let cells = series.cells()?;
    match name {
        "head" | "tail" => {
            let n = args.int_or(0, "n", 5)?.max(0) as usize;
            let len = series.len();
            let positions: Vec<usize> = if name == "head" {
                (0..len.min(n)).collect()
            } else {
                (len.saturating_sub(n)..len).collect()
            };
            Ok(Value::Series(select_positions(series, &positions)?))
        }
        "sort_values" => {
            let ascending = args.bool_or(0, "ascending", true)?;
            Ok(Value::Series(with_positions_sorted(series, ascending)?))
        }
        "sort_index" => {
            let ascending = args.bool_or(0, "ascending", true)?;
            let labels = series.row_labels();
            let order = sort_permutation(&[labels], &[ascending], series.len());
            Ok(Value::Series(select_positions(series, &order)?))
        }
        "nlargest" | "nsmallest" => {
            let n = args.int_or(0, "n", 5)?.max(0) as usize;
            let sorted = with_positions_sorted(series, name == "nsmallest")?;
            let keep: Vec<usize> = (0..sorted.len().min(n)).collect();
            Ok(Value::Series(select_positions(&sorted, &keep)?))
        }
        "unique" => {
            let mut seen = HashSet::new();
            let items = cells
                .iter()
                .filter(|c| seen.insert(c.hash_key()))
                .map(|c| c.to_value())
                .collect();
            Ok(Value::list(items))
        }
        "value_counts" => {
            let normalize = args.bool_or(99, "normalize", false)?;
            let ascending = args.bool_or(99, "ascending", false)?;
            let mut counts = value_counts(&cells);
            if ascending {
                counts.reverse();
            }
            let total: usize = counts.iter().map(|(_, n)| n).sum();
            let values: Vec<Cell> = counts
                .iter()
                .map(|(_, n)| {
                    if normalize {
                        Cell::Float(*n as f64 / total.max(1) as f64)
                    } else {
                        Cell::Int(*n as i64)
                    }
                })
                .collect();
            let labels = Labels {
                name: Some(series.name().to_string()),
                values: counts.into_iter().map(|(c, _)| c).collect(),
            };
            let name = if normalize { "proportion" } else { "count" };
            let mut out = SeriesValue::from_cells(name, &values, Some(labels));
            out.tracked = series.tracked;
            Ok(Value::Series(out))
        }
        "mode" => {
            let counts = value_counts(&cells);
            let best = counts.first().map(|(_, n)| *n).unwrap_or(0);
            let mut modes: Vec<Cell> = counts
                .into_iter()
                .filter(|(_, n)| *n == best)
                .map(|(c, _)| c)
                .collect();
            modes.sort_by(|a, b| a.total_cmp(b));
            let mut out = SeriesValue::from_cells(series.name(), &modes, None);
            out.tracked = series.tracked;
            Ok(Value::Series(out))
        }
        "quantile" => {
            let q = args.get(0, "q").and_then(|v| v.as_f64()).unwrap_or(0.5);
            let present: Vec<&Cell> = cells.iter().filter(|c| !c.is_null()).collect();
            let sorted = sorted_numbers(&present, "quantile")?;
            Ok(quantile_of(&sorted, q).map(Value::Float).unwrap_or(Value::Float(f64::NAN)))
        }
        "describe" => {
            let stats = describe_cells(&cells)?;
            let labels = Labels {
                name: None,
                values: stats.iter().map(|(k, _)| Cell::Str(k.clone())).collect(),
            };
            let values: Vec<Cell> = stats.into_iter().map(|(_, v)| v).collect();
            Ok(Value::Series(SeriesValue::from_cells(series.name(), &values, Some(labels))))
        }
        "round" => {
            let decimals = args.int_or(0, "decimals", 0)?;
            let factor = 10f64.powi(decimals as i32);
            let out: Vec<Cell> = cells
                .iter()
                .map(|c| match c {
                    Cell::Float(f) => Cell::Float((f * factor).round() / factor),
                    other => other.clone(),
                })
                .collect();
            Ok(Value::Series(series.derived_cells(&out)))
        }
        "abs" => {
            let out = cells
                .iter()
                .map(|c| match c {
                    Cell::Int(i) => Ok(i.checked_abs().map_or(Cell::Float((*i as f64).abs()), Cell::Int)),
                    Cell::Float(f) => Ok(Cell::Float(f.abs())),
                    Cell::Null => Ok(Cell::Null),
                    other => Err(ScriptError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        other.label()
                    ))),
                })
                .collect::<ScriptResult<Vec<_>>>()?;
            Ok(Value::Series(series.derived_cells(&out)))
        }
        "cumsum" => {
            let mut running = Cell::Int(0);
            let mut out = Vec::with_capacity(cells.len());
            for c in &cells {
                if c.is_null() {
                    out.push(Cell::Null);
                    continue;
                }
                running = Cell::from_value(&ops::binary_scalar(
                    BinOp::Add,
                    &running.to_value(),
                    &c.to_value(),
                )?)?;
                out.push(running.clone());
            }
            Ok(Value::Series(series.derived_cells(&out)))
        }
        "pct_change" => {
            let mut out = vec![Cell::Null];
            for pair in cells.windows(2) {
                out.push(match (pair[0].as_f64(), pair[1].as_f64()) {
                    (Some(prev), Some(cur)) if prev != 0.0 => Cell::float(cur / prev - 1.0),
                    _ => Cell::Null,
                });
            }
            out.truncate(cells.len());
            Ok(Value::Series(series.derived_cells(&out)))
        }
        "diff" => {
            let mut out = vec![Cell::Null];
            for pair in cells.windows(2) {
                out.push(match (pair[0].as_f64(), pair[1].as_f64()) {
                    (Some(prev), Some(cur)) => Cell::float(cur - prev),
                    _ => Cell::Null,
                });
            }
            out.truncate(cells.len());
            Ok(Value::Series(series.derived_cells(&out)))
        }
        "tolist" | "to_list" => Ok(Value::list(series.values()?)),
        "to_dict" => {
            let mut dict = Dict::new();
            for (label, cell) in series.row_labels().iter().zip(cells.iter()) {
                dict.insert(label.to_value(), cell.to_value())?;
            }
            Ok(Value::dict(dict))
        }
        "items" => {
            let pairs = series
                .row_labels()
                .iter()
                .zip(cells.iter())
                .map(|(l, c)| Value::tuple(vec![l.to_value(), c.to_value()]))
                .collect();
            Ok(Value::list(pairs))
        }
        "idxmax" | "idxmin" => {
            let op = if name == "idxmax" { Reduction::Max } else { Reduction::Min };
            let target = reduce(&cells, op)?;
            let pos = cells
                .iter()
                .position(|c| *c == target && !c.is_null())
                .ok_or_else(|| ScriptError::value(format!("attempt to get {} of an empty sequence", name)))?;
            Ok(series.row_labels()[pos].to_value())
        }
        "isnull" | "isna" => Ok(to_bool_series(series, cells.iter().map(|c| c.is_null()).collect())),
        "notnull" | "notna" => Ok(to_bool_series(series, cells.iter().map(|c| !c.is_null()).collect())),
        "any" => Ok(Value::Bool(cells.iter().any(truthy_cell))),
        "all" => Ok(Value::Bool(cells.iter().all(truthy_cell))),
        "fillna" => {
            let fill = scalar_arg(args, 0, "value", "fillna")?;
            let out: Vec<Cell> = cells
                .iter()
                .map(|c| if c.is_null() { fill.clone() } else { c.clone() })
                .collect();
            Ok(Value::Series(series.derived_cells(&out)))
        }
        "dropna" => {
            let positions: Vec<usize> = (0..cells.len()).filter(|&i| !cells[i].is_null()).collect();
            Ok(Value::Series(select_positions(series, &positions)?))
        }
        "isin" => {
            let options = args.require(0, "values", "isin")?.iter_values()?;
            let keys: HashSet<String> = options
                .iter()
                .map(|v| Cell::from_value(v).map(|c| c.hash_key()))
                .collect::<ScriptResult<_>>()?;
            Ok(to_bool_series(series, cells.iter().map(|c| keys.contains(&c.hash_key())).collect()))
        }
        "between" => {
            let low = args.require(0, "left", "between")?;
            let high = args.require(1, "right", "between")?;
            let mut flags = Vec::with_capacity(cells.len());
            for c in &cells {
                flags.push(
                    !c.is_null()
                        && ops::compare_scalar(CmpOp::GtE, &c.to_value(), low)?
                        && ops::compare_scalar(CmpOp::LtE, &c.to_value(), high)?,
                );
            }
            Ok(to_bool_series(series, flags))
        }
        "astype" => {
            let target = match args.require(0, "dtype", "astype")? {
                Value::Str(s) => s.clone(),
                Value::Builtin(b) => b.to_string(),
                other => other.repr(),
            };
            let out = cells
                .iter()
                .map(|c| convert_cell(c, &target))
                .collect::<ScriptResult<Vec<_>>>()?;
            Ok(Value::Series(series.derived_cells(&out)))
        }
        "map" => match args.require(0, "arg", "map")? {
            Value::Dict(d) => {
                let d = d.borrow();
                let out = cells
                    .iter()
                    .map(|c| match d.get(&c.to_value()) {
                        Some(v) => Cell::from_value(v),
                        None => Ok(Cell::Null),
                    })
                    .collect::<ScriptResult<Vec<_>>>()?;
                Ok(Value::Series(series.derived_cells(&out)))
            }
            other => Err(ScriptError::type_error(format!(
                "map() expects a dict or function, got '{}'",
                other.type_name()
            ))),
        },
        "rename" => {
            let new_name = args.str_arg(0, "index").unwrap_or_else(|| series.name().to_string());
            let mut data = series.data.clone();
            data.rename(&new_name);
            Ok(Value::Series(series.derived(data)))
        }
        "copy" => Ok(Value::Series(series.clone())),
        "reset_index" => {
            let drop = args.bool_or(99, "drop", false)?;
            if drop {
                let mut out = series.clone();
                out.labels = None;
                return Ok(Value::Series(out));
            }
            Ok(Value::Frame(to_frame(series, None)?))
        }
        "to_frame" => {
            let name = args.str_arg(0, "name");
            let mut frame = to_frame(series, name)?;
            if let Some(labels) = &series.labels {
                frame.index = Some(labels.name.clone().unwrap_or_else(|| "index".to_string()));
            }
            Ok(Value::Frame(frame))
        }
        "to_string" => Ok(Value::Str(super::render_series(series))),
        other => Err(ScriptError::attribute(format!(
            "'Series' object has no attribute '{}'",
            other
        ))),
    }
}

/// Series with its labels materialized as a leading column
pub fn to_frame(series: &SeriesValue, name: Option<String>) -> ScriptResult<FrameValue> {
    let label_name = series
        .labels
        .as_ref()
        .and_then(|l| l.name.clone())
        .unwrap_or_else(|| "index".to_string());
    let mut data = series.data.clone();
    if let Some(name) = name {
        data.rename(&name);
    }
    if data.name() == label_name {
        data.rename("value");
    }
    let columns = match &series.labels {
        Some(labels) => vec![cells_to_series(&label_name, &labels.values), data],
        None => vec![data],
    };
    let mut frame = FrameValue::new(DataFrame::new(columns)?);
    frame.tracked = series.tracked;
    Ok(frame)
}

fn convert_cell(cell: &Cell, target: &str) -> ScriptResult<Cell> {
    if cell.is_null() {
        return Ok(Cell::Null);
    }
    let fail = || {
        ScriptError::value(format!(
            "invalid literal for {}: '{}'",
            target,
            cell.label()
        ))
    };
    Ok(match target {
        "int" | "int64" | "int32" | "Int64" => match cell {
            Cell::Str(s) => Cell::Int(s.trim().parse::<i64>().map_err(|_| fail())?),
            other => Cell::Int(other.as_f64().ok_or_else(fail)?.trunc() as i64),
        },
        "float" | "float64" | "float32" => match cell {
            Cell::Str(s) => Cell::float(s.trim().parse::<f64>().map_err(|_| fail())?),
            other => Cell::float(other.as_f64().ok_or_else(fail)?),
        },
        "str" | "string" | "object" => Cell::Str(cell.label()),
        "bool" => Cell::Bool(truthy_cell(cell)),
        "category" | "datetime64[ns]" => cell.clone(),
        other => return Err(ScriptError::type_error(format!("data type '{}' not understood", other))),
    })
}

/* ===================== .str and .dt namespaces ===================== */

pub fn string_method(series: &SeriesValue, name: &str, args: &Args) -> ScriptResult<Value> {
    let cells = series.cells()?;
    let map_str = |f: &dyn Fn(&str) -> Cell| -> Vec<Cell> {
        cells
            .iter()
            .map(|c| match c {
                Cell::Str(s) => f(s),
                Cell::Null => Cell::Null,
                other => f(&other.label()),
            })
            .collect()
    };
    let out = match name {
        "upper" => map_str(&|s| Cell::Str(s.to_uppercase())),
        "lower" => map_str(&|s| Cell::Str(s.to_lowercase())),
        "strip" => map_str(&|s| Cell::Str(s.trim().to_string())),
        "title" => map_str(&|s| Cell::Str(title_case(s))),
        "len" => map_str(&|s| Cell::Int(s.chars().count() as i64)),
        "contains" | "startswith" | "endswith" => {
            let pat = args
                .str_arg(0, "pat")
                .ok_or_else(|| ScriptError::type_error(format!("{}() requires a string pattern", name)))?;
            let case = args.bool_or(99, "case", true)?;
            let pat = if case { pat } else { pat.to_lowercase() };
            map_str(&|s| {
                let s = if case { s.to_string() } else { s.to_lowercase() };
                Cell::Bool(match name {
                    "contains" => s.contains(pat.as_str()),
                    "startswith" => s.starts_with(pat.as_str()),
                    _ => s.ends_with(pat.as_str()),
                })
            })
        }
        "replace" => {
            let from = args.str_arg(0, "pat").unwrap_or_default();
            let to = args.str_arg(1, "repl").unwrap_or_default();
            map_str(&|s| Cell::Str(s.replace(from.as_str(), to.as_str())))
        }
        other => {
            return Err(ScriptError::attribute(format!(
                "'StringMethods' object has no attribute '{}'",
                other
            )))
        }
    };
    // string predicates leave nulls as False
    let out: Vec<Cell> = if matches!(name, "contains" | "startswith" | "endswith") {
        out.into_iter()
            .map(|c| if c.is_null() { Cell::Bool(false) } else { c })
            .collect()
    } else {
        out
    };
    Ok(Value::Series(series.derived_cells(&out)))
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            start = false;
        } else {
            out.push(c);
            start = true;
        }
    }
    out
}

pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%Y%m%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn datetime_cells(series: &SeriesValue) -> ScriptResult<Vec<Option<NaiveDateTime>>> {
    Ok(series
        .cells()?
        .iter()
        .map(|c| match c {
            Cell::Str(s) => parse_datetime(s),
            _ => None,
        })
        .collect())
}

pub fn datetime_attribute(series: &SeriesValue, name: &str) -> ScriptResult<Value> {
    let stamps = datetime_cells(series)?;
    let part = |dt: &NaiveDateTime| -> Option<Cell> {
        Some(match name {
            "year" => Cell::Int(dt.year() as i64),
            "month" => Cell::Int(dt.month() as i64),
            "day" => Cell::Int(dt.day() as i64),
            "hour" => Cell::Int(dt.hour() as i64),
            "minute" => Cell::Int(dt.minute() as i64),
            "quarter" => Cell::Int(((dt.month() - 1) / 3 + 1) as i64),
            "dayofweek" | "weekday" => Cell::Int(dt.weekday().num_days_from_monday() as i64),
            "date" => Cell::Str(dt.date().format("%Y-%m-%d").to_string()),
            _ => return None,
        })
    };
    let mut out = Vec::with_capacity(stamps.len());
    for stamp in &stamps {
        out.push(match stamp {
            Some(dt) => part(dt).ok_or_else(|| {
                ScriptError::attribute(format!(
                    "'DatetimeProperties' object has no attribute '{}'",
                    name
                ))
            })?,
            None => Cell::Null,
        });
    }
    Ok(Value::Series(series.derived_cells(&out)))
}

pub fn datetime_method(series: &SeriesValue, name: &str, args: &Args) -> ScriptResult<Value> {
    match name {
        "strftime" => {
            let fmt = args
                .str_arg(0, "date_format")
                .ok_or_else(|| ScriptError::type_error("strftime() requires a format string"))?;
            let out: Vec<Cell> = datetime_cells(series)?
                .iter()
                .map(|stamp| match stamp {
                    Some(dt) => Cell::Str(dt.format(&fmt).to_string()),
                    None => Cell::Null,
                })
                .collect();
            Ok(Value::Series(series.derived_cells(&out)))
        }
        "day_name" | "month_name" => {
            let out: Vec<Cell> = datetime_cells(series)?
                .iter()
                .map(|stamp| match stamp {
                    Some(dt) => Cell::Str(
                        dt.format(if name == "day_name" { "%A" } else { "%B" }).to_string(),
                    ),
                    None => Cell::Null,
                })
                .collect();
            Ok(Value::Series(series.derived_cells(&out)))
        }
        other => datetime_attribute(series, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labelled() -> SeriesValue {
        SeriesValue::from_cells(
            "sales",
            &[Cell::Int(10), Cell::Int(30), Cell::Int(20)],
            Some(Labels {
                name: Some("region".into()),
                values: vec![Cell::Str("A".into()), Cell::Str("B".into()), Cell::Str("C".into())],
            }),
        )
    }

    #[test]
    fn test_reductions() {
        let cells = vec![Cell::Int(1), Cell::Null, Cell::Int(4)];
        assert_eq!(reduce(&cells, Reduction::Sum).unwrap(), Cell::Int(5));
        assert_eq!(reduce(&cells, Reduction::Mean).unwrap(), Cell::Float(2.5));
        assert_eq!(reduce(&cells, Reduction::Count).unwrap(), Cell::Int(2));
        assert_eq!(reduce(&cells, Reduction::Size).unwrap(), Cell::Int(3));
        assert_eq!(reduce(&cells, Reduction::Max).unwrap(), Cell::Int(4));
        assert!(reduce(&[Cell::Str("a".into())], Reduction::Mean).is_err());
    }

    #[test]
    fn test_label_lookup_and_idxmax() {
        let s = labelled();
        assert!(matches!(subscript(&s, &Value::str("B")).unwrap(), Value::Int(30)));
        assert!(matches!(
            call_method(&s, "idxmax", &Args::default()).unwrap(),
            Value::Str(label) if label == "B"
        ));
    }

    #[test]
    fn test_comparison_builds_mask() {
        let s = Value::Series(labelled());
        let mask = compare(CmpOp::Gt, &s, &Value::Int(15)).unwrap();
        let Value::Series(mask) = mask else { panic!("expected series") };
        assert_eq!(mask.cells().unwrap(), vec![Cell::Bool(false), Cell::Bool(true), Cell::Bool(true)]);
    }

    #[test]
    fn test_value_counts_orders_by_frequency() {
        let s = SeriesValue::from_cells(
            "region",
            &[Cell::Str("E".into()), Cell::Str("W".into()), Cell::Str("W".into())],
            None,
        );
        let Value::Series(counts) = call_method(&s, "value_counts", &Args::default()).unwrap() else {
            panic!("expected series")
        };
        assert_eq!(counts.labels.as_ref().unwrap().values[0], Cell::Str("W".into()));
        assert_eq!(counts.cells().unwrap()[0], Cell::Int(2));
    }

    #[test]
    fn test_slice_positions() {
        assert_eq!(slice_positions(5, Some(1), Some(3), None).unwrap(), vec![1, 2]);
        assert_eq!(slice_positions(5, None, None, Some(-2)).unwrap(), vec![4, 2, 0]);
        assert_eq!(slice_positions(3, Some(-2), None, None).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_datetime_parts() {
        let s = SeriesValue::from_cells("date", &[Cell::Str("2024-03-15".into()), Cell::Null], None);
        let Value::Series(months) = datetime_attribute(&s, "month").unwrap() else {
            panic!("expected series")
        };
        assert_eq!(months.cells().unwrap(), vec![Cell::Int(3), Cell::Null]);
    }
}
