//! Cell conversions
//!
//! Element-wise frame operations run over plain cells so that script semantics
//! (integer division, string concatenation, null propagation) stay in one place.

use crate::script::error::{ScriptError, ScriptResult};
use crate::script::value::Value;
use polars::prelude::*;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Cell {
    pub fn from_any(value: AnyValue) -> Cell {
        match value {
            AnyValue::Null => Cell::Null,
            AnyValue::Boolean(b) => Cell::Bool(b),
            AnyValue::Int8(v) => Cell::Int(v as i64),
            AnyValue::Int16(v) => Cell::Int(v as i64),
            AnyValue::Int32(v) => Cell::Int(v as i64),
            AnyValue::Int64(v) => Cell::Int(v),
            AnyValue::UInt8(v) => Cell::Int(v as i64),
            AnyValue::UInt16(v) => Cell::Int(v as i64),
            AnyValue::UInt32(v) => Cell::Int(v as i64),
            AnyValue::UInt64(v) => Cell::Int(v as i64),
            AnyValue::Float32(v) => Cell::float(v as f64),
            AnyValue::Float64(v) => Cell::float(v),
            AnyValue::String(s) => Cell::Str(s.to_string()),
            AnyValue::StringOwned(s) => Cell::Str(s.to_string()),
            other => Cell::Str(other.to_string()),
        }
    }

    /// NaN is folded into null, as pandas treats it as missing
    pub fn float(v: f64) -> Cell {
        if v.is_nan() {
            Cell::Null
        } else {
            Cell::Float(v)
        }
    }

    pub fn from_value(value: &Value) -> ScriptResult<Cell> {
        match value {
            Value::None => Ok(Cell::Null),
            Value::Bool(b) => Ok(Cell::Bool(*b)),
            Value::Int(i) => Ok(Cell::Int(*i)),
            Value::Float(f) => Ok(Cell::float(*f)),
            Value::Str(s) => Ok(Cell::Str(s.clone())),
            other => Err(ScriptError::type_error(format!(
                "cannot store '{}' in a column",
                other.type_name()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Cell::Null => Value::Float(f64::NAN),
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Int(i) => Value::Int(*i),
            Cell::Float(f) => Value::Float(*f),
            Cell::Str(s) => Value::Str(s.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Cell::Bool(_) | Cell::Int(_) | Cell::Float(_))
    }

    /// Total order used for sorting and group keys: nulls last, numbers before strings
    pub fn total_cmp(&self, other: &Cell) -> Ordering {
        fn rank(cell: &Cell) -> u8 {
            match cell {
                Cell::Bool(_) | Cell::Int(_) | Cell::Float(_) => 0,
                Cell::Str(_) => 1,
                Cell::Null => 2,
            }
        }
        match (self, other) {
            (Cell::Int(a), Cell::Int(b)) => a.cmp(b),
            (Cell::Str(a), Cell::Str(b)) => a.cmp(b),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                x.total_cmp(&y)
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    /// Text form used for labels and JSON object keys
    pub fn label(&self) -> String {
        match self {
            Cell::Null => "NaN".to_string(),
            Cell::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => format_float(*f),
            Cell::Str(s) => s.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Null => serde_json::Value::Null,
            Cell::Bool(b) => serde_json::Value::Bool(*b),
            Cell::Int(i) => serde_json::Value::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Cell::Str(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Key used for hashing rows (duplicates, membership)
    pub fn hash_key(&self) -> String {
        match self {
            Cell::Null => "\u{0}null".to_string(),
            Cell::Bool(b) => format!("b:{}", b),
            Cell::Int(i) => format!("n:{}", *i as f64),
            Cell::Float(f) => format!("n:{}", f),
            Cell::Str(s) => format!("s:{}", s),
        }
    }
}

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// Read every element of a series
pub fn series_cells(series: &Series) -> ScriptResult<Vec<Cell>> {
    let mut cells = Vec::with_capacity(series.len());
    for i in 0..series.len() {
        cells.push(Cell::from_any(series.get(i)?));
    }
    Ok(cells)
}

/// Build a series with the narrowest dtype that holds every cell
pub fn cells_to_series(name: &str, cells: &[Cell]) -> Series {
    let has_str = cells.iter().any(|c| matches!(c, Cell::Str(_)));
    let has_float = cells.iter().any(|c| matches!(c, Cell::Float(_)));
    let has_int = cells.iter().any(|c| matches!(c, Cell::Int(_)));
    let has_bool = cells.iter().any(|c| matches!(c, Cell::Bool(_)));

    if has_str {
        let values: Vec<Option<String>> = cells
            .iter()
            .map(|c| match c {
                Cell::Null => None,
                other => Some(other.label()),
            })
            .collect();
        Series::new(name, values)
    } else if has_float {
        let values: Vec<Option<f64>> = cells.iter().map(|c| c.as_f64()).collect();
        Series::new(name, values)
    } else if has_int {
        let values: Vec<Option<i64>> = cells
            .iter()
            .map(|c| match c {
                Cell::Int(i) => Some(*i),
                Cell::Bool(b) => Some(*b as i64),
                _ => None,
            })
            .collect();
        Series::new(name, values)
    } else if has_bool {
        let values: Vec<Option<bool>> = cells
            .iter()
            .map(|c| match c {
                Cell::Bool(b) => Some(*b),
                _ => None,
            })
            .collect();
        Series::new(name, values)
    } else {
        let values: Vec<Option<f64>> = vec![None; cells.len()];
        Series::new(name, values)
    }
}

/// Stable permutation ordering rows by the given key columns
pub fn sort_permutation(keys: &[Vec<Cell>], ascending: &[bool], len: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by(|&a, &b| {
        for (k, column) in keys.iter().enumerate() {
            let (x, y) = (&column[a], &column[b]);
            // nulls stay last in either direction
            let ord = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ => {
                    let ord = x.total_cmp(y);
                    if ascending.get(k).copied().unwrap_or(true) {
                        ord
                    } else {
                        ord.reverse()
                    }
                }
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    order
}

pub fn take_rows(df: &DataFrame, rows: &[usize]) -> ScriptResult<DataFrame> {
    let idx: Vec<IdxSize> = rows.iter().map(|&r| r as IdxSize).collect();
    Ok(df.take(&IdxCa::from_vec("idx", idx))?)
}

pub fn dtype_name(dtype: &DataType) -> String {
    match dtype {
        DataType::Boolean => "bool".to_string(),
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => "int64".to_string(),
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
            "int64".to_string()
        }
        DataType::Float32 | DataType::Float64 => "float64".to_string(),
        DataType::String => "object".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cells_to_series_widens() {
        let s = cells_to_series("x", &[Cell::Int(1), Cell::Float(2.5), Cell::Null]);
        assert_eq!(s.dtype(), &DataType::Float64);
        assert_eq!(s.null_count(), 1);

        let s = cells_to_series("y", &[Cell::Int(1), Cell::Str("a".into())]);
        assert_eq!(s.dtype(), &DataType::String);
    }

    #[test]
    fn test_series_round_trip_cells() {
        let s = Series::new("v", &[Some(3i64), None, Some(1)]);
        let cells = series_cells(&s).unwrap();
        assert_eq!(cells, vec![Cell::Int(3), Cell::Null, Cell::Int(1)]);
    }

    #[test]
    fn test_sort_permutation_nulls_last() {
        let keys = vec![vec![Cell::Int(2), Cell::Null, Cell::Int(1)]];
        assert_eq!(sort_permutation(&keys, &[true], 3), vec![2, 0, 1]);
        assert_eq!(sort_permutation(&keys, &[false], 3), vec![0, 2, 1]);
    }

    #[test]
    fn test_nan_is_null() {
        assert!(Cell::float(f64::NAN).is_null());
        assert_eq!(Cell::Float(2.0).label(), "2.0");
    }
}
