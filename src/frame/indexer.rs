//! `.loc` and `.iloc` indexers

use super::cells::{cells_to_series, series_cells, Cell};
use super::column::{self, mask_of, select_positions, slice_positions};
use super::table::{self, require_columns, select};
use super::{FrameValue, Labels, SeriesValue};
use crate::script::error::{ScriptError, ScriptResult};
use crate::script::value::Value;
use std::rc::Rc;

enum Rows {
    One(usize),
    Many(Vec<usize>),
}

enum Cols {
    One(String),
    Many(Vec<String>),
}

fn position(len: usize, i: i64) -> ScriptResult<usize> {
    let idx = if i < 0 { i + len as i64 } else { i };
    if idx < 0 || idx as usize >= len {
        return Err(ScriptError::index("single positional indexer is out-of-bounds"));
    }
    Ok(idx as usize)
}

fn split_key(key: &Value) -> (Value, Option<Value>) {
    match key {
        Value::Tuple(parts) if parts.len() == 2 => (parts[0].clone(), Some(parts[1].clone())),
        other => (other.clone(), None),
    }
}

/// Column part of a `.loc[rows, cols]` key
pub fn column_key(key: &Value) -> Option<Value> {
    split_key(key).1
}

fn iloc_rows(len: usize, key: &Value) -> ScriptResult<Rows> {
    match key {
        Value::Int(i) => Ok(Rows::One(position(len, *i)?)),
        Value::Slice { lower, upper, step } => Ok(Rows::Many(slice_positions(len, *lower, *upper, *step)?)),
        Value::List(_) | Value::Tuple(_) => {
            let mut out = Vec::new();
            for item in key.iter_values()? {
                let i = item
                    .as_int()
                    .ok_or_else(|| ScriptError::index(".iloc requires integer positions"))?;
                out.push(position(len, i)?);
            }
            Ok(Rows::Many(out))
        }
        other => match mask_of(other) {
            Some(mask) => Ok(Rows::Many(mask_positions(mask?, len)?)),
            None => Err(ScriptError::index(format!(
                ".iloc cannot index with '{}'",
                other.type_name()
            ))),
        },
    }
}

fn mask_positions(mask: Vec<bool>, len: usize) -> ScriptResult<Vec<usize>> {
    if mask.len() != len {
        return Err(ScriptError::index(format!(
            "Boolean index has wrong length: {} instead of {}",
            mask.len(),
            len
        )));
    }
    Ok((0..len).filter(|&i| mask[i]).collect())
}

fn label_position(labels: &[Cell], key: &Value) -> ScriptResult<usize> {
    let wanted = Cell::from_value(key)?;
    labels
        .iter()
        .position(|l| *l == wanted)
        .ok_or_else(|| ScriptError::key(key.repr()))
}

/// Label slices include their upper bound
fn label_slice(labels: &[Cell], lower: Option<i64>, upper: Option<i64>) -> ScriptResult<Vec<usize>> {
    let find = |bound: i64| label_position(labels, &Value::Int(bound));
    let start = match lower {
        Some(b) => find(b)?,
        None => 0,
    };
    let stop = match upper {
        Some(b) => find(b)? + 1,
        None => labels.len(),
    };
    Ok((start..stop.max(start)).collect())
}

fn loc_rows(labels: &[Cell], key: &Value) -> ScriptResult<Rows> {
    if let Some(mask) = mask_of(key) {
        return Ok(Rows::Many(mask_positions(mask?, labels.len())?));
    }
    match key {
        Value::Slice { lower, upper, .. } => Ok(Rows::Many(label_slice(labels, *lower, *upper)?)),
        Value::List(_) | Value::Tuple(_) => {
            let mut out = Vec::new();
            for item in key.iter_values()? {
                out.push(label_position(labels, &item)?);
            }
            Ok(Rows::Many(out))
        }
        other => Ok(Rows::One(label_position(labels, other)?)),
    }
}

fn iloc_cols(frame: &FrameValue, key: &Value) -> ScriptResult<Cols> {
    let names = frame.column_names();
    match iloc_rows(names.len(), key)? {
        Rows::One(i) => Ok(Cols::One(names[i].clone())),
        Rows::Many(pos) => Ok(Cols::Many(pos.into_iter().map(|i| names[i].clone()).collect())),
    }
}

fn loc_cols(frame: &FrameValue, key: &Value) -> ScriptResult<Cols> {
    match key {
        Value::Str(name) => {
            require_columns(frame, &[name.clone()])?;
            Ok(Cols::One(name.clone()))
        }
        Value::Slice {
            lower: None,
            upper: None,
            ..
        } => Ok(Cols::Many(frame.column_names())),
        Value::List(_) | Value::Tuple(_) => {
            let names: Vec<String> = key
                .iter_values()?
                .iter()
                .map(|v| v.to_display())
                .collect();
            require_columns(frame, &names)?;
            Ok(Cols::Many(names))
        }
        other => Err(ScriptError::key(other.repr())),
    }
}

/// A single row as a series labelled by column name
fn row_at(frame: &FrameValue, names: &[String], row: usize) -> ScriptResult<SeriesValue> {
    let mut cells = Vec::with_capacity(names.len());
    for name in names {
        cells.push(Cell::from_any(frame.series(name)?.get(row)?));
    }
    let label = frame.row_labels()?[row].label();
    Ok(SeriesValue {
        data: cells_to_series(&label, &cells),
        labels: Some(Rc::new(Labels {
            name: None,
            values: names.iter().map(|n| Cell::Str(n.clone())).collect(),
        })),
        tracked: frame.tracked,
    })
}

fn assemble(frame: &FrameValue, rows: Rows, cols: Cols) -> ScriptResult<Value> {
    match (rows, cols) {
        (Rows::One(r), Cols::One(c)) => Ok(Cell::from_any(frame.series(&c)?.get(r)?).to_value()),
        (Rows::One(r), Cols::Many(names)) => Ok(Value::Series(row_at(frame, &names, r)?)),
        (Rows::Many(pos), Cols::One(c)) => {
            let picked = table::rows(frame, &pos)?;
            Ok(Value::Series(picked.column(&c)?))
        }
        (Rows::Many(pos), Cols::Many(names)) => {
            let picked = table::rows(frame, &pos)?;
            Ok(Value::Frame(select(&picked, &names)?))
        }
    }
}

fn series_rows(series: &SeriesValue, rows: Rows) -> ScriptResult<Value> {
    match rows {
        Rows::One(i) => Ok(series.cells()?[i].to_value()),
        Rows::Many(pos) => Ok(Value::Series(select_positions(series, &pos)?)),
    }
}

pub fn iloc_get(target: &Value, key: &Value) -> ScriptResult<Value> {
    match target {
        Value::Frame(frame) => {
            let (row_key, col_key) = split_key(key);
            let rows = iloc_rows(frame.height(), &row_key)?;
            let cols = match col_key {
                Some(k) => iloc_cols(frame, &k)?,
                None => Cols::Many(frame.column_names()),
            };
            assemble(frame, rows, cols)
        }
        Value::Series(series) => series_rows(series, iloc_rows(series.len(), key)?),
        other => Err(ScriptError::type_error(format!(
            "'{}' has no .iloc indexer",
            other.type_name()
        ))),
    }
}

pub fn loc_get(target: &Value, key: &Value) -> ScriptResult<Value> {
    match target {
        Value::Frame(frame) => {
            let (row_key, col_key) = split_key(key);
            let labels = frame.row_labels()?;
            let rows = loc_rows(&labels, &row_key)?;
            let cols = match col_key {
                Some(k) => loc_cols(frame, &k)?,
                None => Cols::Many(frame.column_names()),
            };
            assemble(frame, rows, cols)
        }
        Value::Series(series) => {
            if mask_of(key).is_some() {
                return column::subscript(series, key);
            }
            series_rows(series, loc_rows(&series.row_labels(), key)?)
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' has no .loc indexer",
            other.type_name()
        ))),
    }
}

/// `frame.loc[rows, column] = value`; returns the updated frame
pub fn loc_set(frame: &FrameValue, key: &Value, value: &Value) -> ScriptResult<FrameValue> {
    let (row_key, col_key) = split_key(key);
    let column = match col_key {
        Some(Value::Str(name)) => name,
        Some(other) => {
            return Err(ScriptError::unsupported(format!(
                ".loc assignment to '{}' columns is not supported",
                other.type_name()
            )))
        }
        None => return table::set_item(frame, &row_key, value),
    };
    let labels = frame.row_labels()?;
    let positions = match loc_rows(&labels, &row_key)? {
        Rows::One(r) => vec![r],
        Rows::Many(pos) => pos,
    };
    let height = frame.height();
    let mut cells = if frame.has_column(&column) {
        series_cells(frame.series(&column)?)?
    } else {
        vec![Cell::Null; height]
    };
    match value {
        Value::Series(s) => {
            let source = s.cells()?;
            for (n, &r) in positions.iter().enumerate() {
                let cell = if source.len() == height { &source[r] } else { source.get(n).unwrap_or(&Cell::Null) };
                cells[r] = cell.clone();
            }
        }
        scalar => {
            let cell = Cell::from_value(scalar)?;
            for &r in &positions {
                cells[r] = cell.clone();
            }
        }
    }
    let series = Value::Series(SeriesValue::new(cells_to_series(&column, &cells)));
    table::set_item(frame, &Value::str(column), &series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn sales() -> Value {
        let df = df!(
            "region" => &["East", "West", "North"],
            "sales" => &[100i64, 400, 50]
        )
        .unwrap();
        Value::Frame(FrameValue::new(df))
    }

    #[test]
    fn test_iloc_scalar_and_row() {
        let frame = sales();
        let cell = iloc_get(&frame, &Value::tuple(vec![Value::Int(1), Value::Int(1)])).unwrap();
        assert!(matches!(cell, Value::Int(400)));
        let last = iloc_get(&frame, &Value::Int(-1)).unwrap();
        match last {
            Value::Series(s) => assert_eq!(s.values().unwrap()[0].to_display(), "North"),
            other => panic!("expected series, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_loc_mask_with_column() {
        let frame = sales();
        let mask = match &frame {
            Value::Frame(f) => {
                let flags: Vec<Cell> = vec![Cell::Bool(true), Cell::Bool(false), Cell::Bool(true)];
                Value::Series(f.column("sales").unwrap().derived_cells(&flags))
            }
            _ => unreachable!(),
        };
        let key = Value::tuple(vec![mask, Value::str("region")]);
        match loc_get(&frame, &key).unwrap() {
            Value::Series(s) => assert_eq!(s.len(), 2),
            other => panic!("expected series, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_loc_set_creates_column() {
        let frame = match sales() {
            Value::Frame(f) => f,
            _ => unreachable!(),
        };
        let key = Value::tuple(vec![Value::Int(0), Value::str("flag")]);
        let updated = loc_set(&frame, &key, &Value::str("top")).unwrap();
        let cells = series_cells(updated.series("flag").unwrap()).unwrap();
        assert_eq!(cells, vec![Cell::Str("top".into()), Cell::Null, Cell::Null]);
    }
}
