//! `pd` and `np` module functions

use super::cells::{cells_to_series, Cell};
use super::column::{self, parse_datetime, quantile_of, reduce, Reduction};
use super::table::{self, MergeSpec};
use super::{FrameValue, Labels, SeriesValue};
use crate::script::error::{ScriptError, ScriptResult};
use crate::script::value::{name_list, Args, Value};
use polars::prelude::*;

fn frames_arg(value: &Value) -> ScriptResult<Vec<FrameValue>> {
    value
        .iter_values()?
        .into_iter()
        .map(|v| match v {
            Value::Frame(f) => Ok(f),
            Value::Series(s) => column::to_frame(&s, None),
            other => Err(ScriptError::type_error(format!(
                "cannot concatenate object of type '{}'",
                other.type_name()
            ))),
        })
        .collect()
}

fn frame_from_dict(data: &Value, columns: Option<Vec<String>>) -> ScriptResult<FrameValue> {
    let Value::Dict(d) = data else {
        return Err(ScriptError::type_error("expected a dict of columns"));
    };
    let d = d.borrow();
    let mut series = Vec::with_capacity(d.len());
    let mut height: Option<usize> = None;
    for (key, values) in d.entries() {
        let name = key.to_display();
        if let Some(wanted) = &columns {
            if !wanted.contains(&name) {
                continue;
            }
        }
        let cells: Vec<Cell> = match values {
            Value::Series(s) => s.cells()?,
            Value::List(_) | Value::Tuple(_) => values
                .iter_values()?
                .iter()
                .map(Cell::from_value)
                .collect::<ScriptResult<_>>()?,
            scalar => vec![Cell::from_value(scalar)?],
        };
        match height {
            Some(h) if h != cells.len() => {
                return Err(ScriptError::value("All arrays must be of the same length"))
            }
            _ => height = Some(cells.len()),
        }
        series.push(cells_to_series(&name, &cells));
    }
    Ok(FrameValue::new(DataFrame::new(series)?))
}

fn frame_from_rows(rows: &[Value], columns: Option<Vec<String>>) -> ScriptResult<FrameValue> {
    // records: list of dicts
    if rows.iter().all(|r| matches!(r, Value::Dict(_))) {
        let mut names: Vec<String> = columns.clone().unwrap_or_default();
        if columns.is_none() {
            for row in rows {
                if let Value::Dict(d) = row {
                    for key in d.borrow().keys() {
                        let key = key.to_display();
                        if !names.contains(&key) {
                            names.push(key);
                        }
                    }
                }
            }
        }
        let mut series = Vec::with_capacity(names.len());
        for name in &names {
            let mut cells = Vec::with_capacity(rows.len());
            for row in rows {
                if let Value::Dict(d) = row {
                    cells.push(match d.borrow().get_str(name) {
                        Some(v) => Cell::from_value(v)?,
                        None => Cell::Null,
                    });
                }
            }
            series.push(cells_to_series(name, &cells));
        }
        return Ok(FrameValue::new(DataFrame::new(series)?));
    }

    // list of rows: needs column names
    let width = rows.first().map(|r| r.iter_values().map(|v| v.len())).transpose()?.unwrap_or(0);
    let names = columns.unwrap_or_else(|| (0..width).map(|i| i.to_string()).collect());
    let mut grid: Vec<Vec<Cell>> = vec![Vec::with_capacity(rows.len()); names.len()];
    for row in rows {
        let values = row.iter_values()?;
        if values.len() != names.len() {
            return Err(ScriptError::value(format!(
                "{} columns passed, passed data had {} columns",
                names.len(),
                values.len()
            )));
        }
        for (slot, v) in grid.iter_mut().zip(values.iter()) {
            slot.push(Cell::from_value(v)?);
        }
    }
    let series = names
        .iter()
        .zip(grid.iter())
        .map(|(n, cells)| cells_to_series(n, cells))
        .collect();
    Ok(FrameValue::new(DataFrame::new(series)?))
}

fn construct_frame(args: &Args) -> ScriptResult<Value> {
    let columns = args.kwarg("columns").and_then(name_list);
    match args.get(0, "data") {
        None | Some(Value::None) => {
            let names = columns.unwrap_or_default();
            let series = names
                .iter()
                .map(|n| cells_to_series(n, &[]))
                .collect();
            Ok(Value::Frame(FrameValue::new(DataFrame::new(series)?)))
        }
        Some(data @ Value::Dict(_)) => Ok(Value::Frame(frame_from_dict(data, columns)?)),
        Some(Value::Frame(f)) => Ok(Value::Frame(f.clone())),
        Some(data @ (Value::List(_) | Value::Tuple(_))) => {
            Ok(Value::Frame(frame_from_rows(&data.iter_values()?, columns)?))
        }
        Some(other) => Err(ScriptError::type_error(format!(
            "DataFrame constructor not properly called with '{}'",
            other.type_name()
        ))),
    }
}

fn construct_series(args: &Args) -> ScriptResult<Value> {
    let name = args.str_arg(99, "name").unwrap_or_default();
    let (cells, mut labels) = match args.get(0, "data") {
        None | Some(Value::None) => (Vec::new(), None),
        Some(Value::Dict(d)) => {
            let d = d.borrow();
            let labels = d
                .keys()
                .map(Cell::from_value)
                .collect::<ScriptResult<Vec<_>>>()?;
            let cells = d
                .values()
                .map(Cell::from_value)
                .collect::<ScriptResult<Vec<_>>>()?;
            (cells, Some(labels))
        }
        Some(Value::Series(s)) => (s.cells()?, s.labels.as_ref().map(|l| l.values.clone())),
        Some(data) => (
            data.iter_values()?
                .iter()
                .map(Cell::from_value)
                .collect::<ScriptResult<Vec<_>>>()?,
            None,
        ),
    };
    if let Some(index) = args.kwarg("index") {
        let index = index
            .iter_values()?
            .iter()
            .map(Cell::from_value)
            .collect::<ScriptResult<Vec<_>>>()?;
        if index.len() != cells.len() {
            return Err(ScriptError::value(format!(
                "Length of values ({}) does not match length of index ({})",
                cells.len(),
                index.len()
            )));
        }
        labels = Some(index);
    }
    let labels = labels.map(|values| Labels { name: None, values });
    Ok(Value::Series(SeriesValue::from_cells(&name, &cells, labels)))
}

fn canonical_datetime(text: &str) -> Option<String> {
    parse_datetime(text).map(|dt| {
        if dt.time() == chrono::NaiveTime::MIN {
            dt.format("%Y-%m-%d").to_string()
        } else {
            dt.format("%Y-%m-%d %H:%M:%S").to_string()
        }
    })
}

/// Dates stay strings in canonical form; `.dt` parses them on access
fn to_datetime(args: &Args) -> ScriptResult<Value> {
    let coerce = args.str_arg(99, "errors").as_deref() == Some("coerce");
    let convert = |cell: &Cell| -> ScriptResult<Cell> {
        match cell {
            Cell::Null => Ok(Cell::Null),
            other => match canonical_datetime(&other.label()) {
                Some(text) => Ok(Cell::Str(text)),
                None if coerce => Ok(Cell::Null),
                None => Err(ScriptError::value(format!(
                    "Unknown datetime string format, unable to parse: {}",
                    other.label()
                ))),
            },
        }
    };
    match args.require(0, "arg", "to_datetime")? {
        Value::Series(s) => {
            let cells = s
                .cells()?
                .iter()
                .map(convert)
                .collect::<ScriptResult<Vec<_>>>()?;
            Ok(Value::Series(s.derived_cells(&cells)))
        }
        Value::Str(text) => Ok(convert(&Cell::Str(text.clone()))?.to_value()),
        other => Err(ScriptError::type_error(format!(
            "to_datetime() does not accept '{}'",
            other.type_name()
        ))),
    }
}

fn to_numeric(args: &Args) -> ScriptResult<Value> {
    let coerce = args.str_arg(99, "errors").as_deref() == Some("coerce");
    let convert = |cell: &Cell| -> ScriptResult<Cell> {
        match cell {
            Cell::Str(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    Ok(Cell::Int(i))
                } else if let Ok(f) = s.parse::<f64>() {
                    Ok(Cell::float(f))
                } else if coerce {
                    Ok(Cell::Null)
                } else {
                    Err(ScriptError::value(format!("Unable to parse string \"{}\"", s)))
                }
            }
            other => Ok(other.clone()),
        }
    };
    match args.require(0, "arg", "to_numeric")? {
        Value::Series(s) => {
            let cells = s
                .cells()?
                .iter()
                .map(convert)
                .collect::<ScriptResult<Vec<_>>>()?;
            Ok(Value::Series(s.derived_cells(&cells)))
        }
        scalar => Ok(convert(&Cell::from_value(scalar)?)?.to_value()),
    }
}

fn missing_check(args: &Args, want_null: bool) -> ScriptResult<Value> {
    match args.require(0, "obj", "isna")? {
        Value::Series(s) => {
            let cells: Vec<Cell> = s
                .cells()?
                .iter()
                .map(|c| Cell::Bool(c.is_null() == want_null))
                .collect();
            Ok(Value::Series(s.derived_cells(&cells)))
        }
        Value::Frame(f) => table::call_method(f, if want_null { "isna" } else { "notna" }, &Args::default()),
        scalar => {
            let null = matches!(scalar, Value::None) || matches!(scalar, Value::Float(f) if f.is_nan());
            Ok(Value::Bool(null == want_null))
        }
    }
}

pub fn call_pandas(name: &str, args: &Args) -> ScriptResult<Value> {
    match name {
        "DataFrame" => construct_frame(args),
        "Series" => construct_series(args),
        "concat" => {
            let frames = frames_arg(args.require(0, "objs", "concat")?)?;
            if frames.is_empty() {
                return Err(ScriptError::value("No objects to concatenate"));
            }
            Ok(Value::Frame(table::concat(&frames)?))
        }
        "merge" => {
            let (left, right) = match (args.require(0, "left", "merge")?, args.require(1, "right", "merge")?) {
                (Value::Frame(l), Value::Frame(r)) => (l.clone(), r.clone()),
                _ => return Err(ScriptError::type_error("merge() expects two DataFrames")),
            };
            let spec = MergeSpec::from_args(&left, &right, args, 2)?;
            Ok(Value::Frame(table::merge(&left, &right, &spec)?))
        }
        "to_datetime" => to_datetime(args),
        "to_numeric" => to_numeric(args),
        "isna" | "isnull" => missing_check(args, true),
        "notna" | "notnull" => missing_check(args, false),
        other => Err(ScriptError::attribute(format!(
            "module 'pandas' has no attribute '{}'",
            other
        ))),
    }
}

pub fn pandas_attribute(name: &str) -> Option<Value> {
    match name {
        "NA" | "NaT" => Some(Value::None),
        _ => None,
    }
}

pub fn numpy_attribute(name: &str) -> Option<Value> {
    match name {
        "nan" | "NaN" => Some(Value::Float(f64::NAN)),
        "pi" => Some(Value::Float(std::f64::consts::PI)),
        "e" => Some(Value::Float(std::f64::consts::E)),
        "inf" => Some(Value::Float(f64::INFINITY)),
        _ => None,
    }
}

/// Cells of a numeric argument: a series, a list or a single number
fn operand_cells(value: &Value) -> ScriptResult<Vec<Cell>> {
    match value {
        Value::Series(s) => s.cells(),
        Value::List(_) | Value::Tuple(_) => value.iter_values()?.iter().map(Cell::from_value).collect(),
        scalar => Ok(vec![Cell::from_value(scalar)?]),
    }
}

fn map_numeric(value: &Value, f: impl Fn(f64) -> f64) -> ScriptResult<Value> {
    let apply = |cell: &Cell| -> ScriptResult<Cell> {
        match cell {
            Cell::Null => Ok(Cell::Null),
            other => other.as_f64().map(|v| Cell::float(f(v))).ok_or_else(|| {
                ScriptError::type_error(format!("ufunc not supported for input '{}'", other.label()))
            }),
        }
    };
    match value {
        Value::Series(s) => {
            let cells = s.cells()?.iter().map(apply).collect::<ScriptResult<Vec<_>>>()?;
            Ok(Value::Series(s.derived_cells(&cells)))
        }
        Value::List(_) | Value::Tuple(_) => Ok(Value::list(
            operand_cells(value)?
                .iter()
                .map(|c| apply(c).map(|c| c.to_value()))
                .collect::<ScriptResult<Vec<_>>>()?,
        )),
        scalar => {
            let x = scalar.as_f64().ok_or_else(|| {
                ScriptError::type_error(format!("ufunc not supported for type '{}'", scalar.type_name()))
            })?;
            Ok(Value::Float(f(x)))
        }
    }
}

fn population_std(cells: &[Cell]) -> Cell {
    let values: Vec<f64> = cells.iter().filter_map(|c| c.as_f64()).collect();
    if values.is_empty() {
        return Cell::Null;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Cell::float(var.sqrt())
}

pub fn call_numpy(name: &str, args: &Args, max_items: usize) -> ScriptResult<Value> {
    if let Some(op) = Reduction::from_name(name).filter(|op| {
        matches!(
            op,
            Reduction::Sum | Reduction::Mean | Reduction::Median | Reduction::Min | Reduction::Max
        )
    }) {
        let cells = operand_cells(args.require(0, "a", name)?)?;
        return Ok(reduce(&cells, op)?.to_value());
    }
    match name {
        "std" => {
            let cells = operand_cells(args.require(0, "a", name)?)?;
            Ok(population_std(&cells).to_value())
        }
        "percentile" | "quantile" => {
            let cells = operand_cells(args.require(0, "a", name)?)?;
            let q = args
                .require(1, "q", name)?
                .as_f64()
                .ok_or_else(|| ScriptError::type_error("q must be a number"))?;
            let q = if name == "percentile" { q / 100.0 } else { q };
            let mut values: Vec<f64> = cells.iter().filter_map(|c| c.as_f64()).collect();
            values.sort_by(|a, b| a.total_cmp(b));
            Ok(Value::Float(quantile_of(&values, q).unwrap_or(f64::NAN)))
        }
        "sqrt" => map_numeric(args.require(0, "x", name)?, f64::sqrt),
        "abs" | "absolute" => map_numeric(args.require(0, "x", name)?, f64::abs),
        "log" => map_numeric(args.require(0, "x", name)?, f64::ln),
        "log10" => map_numeric(args.require(0, "x", name)?, f64::log10),
        "exp" => map_numeric(args.require(0, "x", name)?, f64::exp),
        "floor" => map_numeric(args.require(0, "x", name)?, f64::floor),
        "ceil" => map_numeric(args.require(0, "x", name)?, f64::ceil),
        "round" => {
            let decimals = args.int_or(1, "decimals", 0)?;
            let factor = 10f64.powi(decimals as i32);
            map_numeric(args.require(0, "a", name)?, move |v| (v * factor).round() / factor)
        }
        "isnan" => match args.require(0, "x", name)? {
            Value::Series(s) => {
                let cells: Vec<Cell> = s.cells()?.iter().map(|c| Cell::Bool(c.is_null())).collect();
                Ok(Value::Series(s.derived_cells(&cells)))
            }
            scalar => Ok(Value::Bool(scalar.as_f64().map(f64::is_nan).unwrap_or(false))),
        },
        "arange" => {
            let nums: Vec<f64> = args
                .positional
                .iter()
                .map(|v| v.as_f64().ok_or_else(|| ScriptError::type_error("arange() expects numbers")))
                .collect::<ScriptResult<_>>()?;
            let (start, stop, step) = match nums.as_slice() {
                [stop] => (0.0, *stop, 1.0),
                [start, stop] => (*start, *stop, 1.0),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(ScriptError::type_error("arange() takes 1 to 3 arguments")),
            };
            if step == 0.0 {
                return Err(ScriptError::value("arange() step cannot be zero"));
            }
            let count = ((stop - start) / step).ceil().max(0.0) as usize;
            if count > max_items {
                return Err(ScriptError::new(
                    crate::script::error::Fault::MemoryLimit,
                    format!("arange() of {} items exceeds the collection limit", count),
                ));
            }
            let ints = args.positional.iter().all(|v| matches!(v, Value::Int(_)));
            let items = (0..count)
                .map(|i| {
                    let v = start + step * i as f64;
                    if ints {
                        Value::Int(v as i64)
                    } else {
                        Value::Float(v)
                    }
                })
                .collect();
            Ok(Value::list(items))
        }
        "array" => match args.require(0, "object", name)? {
            Value::Series(s) => Ok(Value::list(s.values()?)),
            other => Ok(Value::list(other.iter_values()?)),
        },
        "where" => {
            let cond = args.require(0, "condition", name)?;
            let mask = column::mask_of(cond)
                .ok_or_else(|| ScriptError::type_error("where() expects a boolean Series condition"))??;
            let pick = |value: &Value, i: usize| -> ScriptResult<Cell> {
                match value {
                    Value::Series(s) => Ok(s.cells()?.get(i).cloned().unwrap_or(Cell::Null)),
                    scalar => Cell::from_value(scalar),
                }
            };
            let (yes, no) = (args.require(1, "x", name)?, args.require(2, "y", name)?);
            let cells = (0..mask.len())
                .map(|i| if mask[i] { pick(yes, i) } else { pick(no, i) })
                .collect::<ScriptResult<Vec<_>>>()?;
            let Value::Series(base) = cond else {
                return Err(ScriptError::type_error("where() expects a boolean Series condition"));
            };
            Ok(Value::Series(base.derived_cells(&cells)))
        }
        other => Err(ScriptError::attribute(format!(
            "module 'numpy' has no attribute '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::value::Dict;

    #[test]
    fn test_frame_from_dict_of_lists() {
        let mut data = Dict::new();
        data.insert(
            Value::str("region"),
            Value::list(vec![Value::str("East"), Value::str("West")]),
        )
        .unwrap();
        data.insert(Value::str("sales"), Value::list(vec![Value::Int(1), Value::Int(2)]))
            .unwrap();
        let Value::Frame(frame) = call_pandas("DataFrame", &Args::positional(vec![Value::dict(data)])).unwrap()
        else {
            panic!("expected frame")
        };
        assert_eq!(frame.column_names(), vec!["region", "sales"]);
        assert_eq!(frame.height(), 2);
    }

    #[test]
    fn test_ragged_columns_are_rejected() {
        let mut data = Dict::new();
        data.insert(Value::str("a"), Value::list(vec![Value::Int(1)])).unwrap();
        data.insert(Value::str("b"), Value::list(vec![])).unwrap();
        let err = call_pandas("DataFrame", &Args::positional(vec![Value::dict(data)])).unwrap_err();
        assert_eq!(err.fault, crate::script::error::Fault::Value);
    }

    #[test]
    fn test_to_datetime_canonicalizes() {
        let out = call_pandas("to_datetime", &Args::positional(vec![Value::str("2024/03/05")])).unwrap();
        assert_eq!(out.to_display(), "2024-03-05");
    }

    #[test]
    fn test_numpy_reductions() {
        let values = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]);
        let mean = call_numpy("mean", &Args::positional(vec![values.clone()]), 100).unwrap();
        assert!(matches!(mean, Value::Float(f) if f == 2.5));
        let std = call_numpy("std", &Args::positional(vec![values]), 100).unwrap();
        assert!(matches!(std, Value::Float(f) if (f - 1.118033988749895).abs() < 1e-12));
    }

    #[test]
    fn test_arange_respects_limit() {
        let err = call_numpy("arange", &Args::positional(vec![Value::Int(1_000)]), 10).unwrap_err();
        assert_eq!(err.fault, crate::script::error::Fault::MemoryLimit);
        let ok = call_numpy("arange", &Args::positional(vec![Value::Int(3)]), 10).unwrap();
        assert_eq!(ok.repr(), "[0, 1, 2]");
    }
}
