//! DataFrame operations

use super::cells::{cells_to_series, dtype_name, series_cells, sort_permutation, take_rows, Cell};
use super::column::{self, describe_cells, reduce, Reduction};
use super::{FrameValue, GroupByValue, Labels, SeriesValue};
use crate::script::error::{ScriptError, ScriptResult};
use crate::script::value::{name_list, Args, Dict, Value};
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

fn missing_columns(names: &[String]) -> ScriptError {
    ScriptError::key(format!("\"None of [{:?}] are in the [columns]\"", names))
}

/// Validate that every name is a column of the frame
pub fn require_columns(frame: &FrameValue, names: &[String]) -> ScriptResult<()> {
    let missing: Vec<String> = names
        .iter()
        .filter(|n| !frame.has_column(n))
        .cloned()
        .collect();
    match missing.len() {
        0 => Ok(()),
        1 => Err(ScriptError::key(format!("'{}'", missing[0]))),
        _ => Err(missing_columns(&missing)),
    }
}

fn columns_arg(value: &Value, what: &str) -> ScriptResult<Vec<String>> {
    name_list(value).ok_or_else(|| {
        ScriptError::type_error(format!(
            "{} must be a column name or a list of column names, not '{}'",
            what,
            value.type_name()
        ))
    })
}

/// Frame made of the named columns, keeping the index column in front
pub fn select(frame: &FrameValue, names: &[String]) -> ScriptResult<FrameValue> {
    require_columns(frame, names)?;
    let mut columns = Vec::with_capacity(names.len() + 1);
    if let Some(index) = &frame.index {
        if !names.contains(index) {
            columns.push(frame.series(index)?.clone());
        }
    }
    for name in names {
        columns.push(frame.series(name)?.clone());
    }
    Ok(frame.derived(DataFrame::new(columns)?))
}

pub fn filter_rows(frame: &FrameValue, mask: &[bool]) -> ScriptResult<FrameValue> {
    if mask.len() != frame.height() {
        return Err(ScriptError::index(format!(
            "Boolean index has wrong length: {} instead of {}",
            mask.len(),
            frame.height()
        )));
    }
    let mask = BooleanChunked::from_slice("mask", mask);
    Ok(frame.derived(frame.data.filter(&mask)?))
}

pub fn rows(frame: &FrameValue, positions: &[usize]) -> ScriptResult<FrameValue> {
    Ok(frame.derived(take_rows(&frame.data, positions)?))
}

pub fn subscript(frame: &FrameValue, key: &Value) -> ScriptResult<Value> {
    if let Some(mask) = column::mask_of(key) {
        return Ok(Value::Frame(filter_rows(frame, &mask?)?));
    }
    match key {
        Value::Str(name) => Ok(Value::Series(frame.column(name)?)),
        Value::List(_) | Value::Tuple(_) => {
            let names = columns_arg(key, "column selection")?;
            Ok(Value::Frame(select(frame, &names)?))
        }
        Value::Slice { lower, upper, step } => {
            let positions = column::slice_positions(frame.height(), *lower, *upper, *step)?;
            Ok(Value::Frame(rows(frame, &positions)?))
        }
        other => Err(ScriptError::key(other.repr())),
    }
}

/// `df[name] = value`; returns the updated frame
pub fn set_item(frame: &FrameValue, key: &Value, value: &Value) -> ScriptResult<FrameValue> {
    let name = key.as_str().ok_or_else(|| {
        ScriptError::type_error(format!(
            "column assignment requires a string name, not '{}'",
            key.type_name()
        ))
    })?;
    let height = frame.height();
    let mut series = match value {
        Value::Series(s) => {
            if s.len() != height && frame.data.width() > 0 {
                return Err(ScriptError::value(format!(
                    "Length of values ({}) does not match length of index ({})",
                    s.len(),
                    height
                )));
            }
            s.data.clone()
        }
        Value::List(_) | Value::Tuple(_) => {
            let cells = value
                .iter_values()?
                .iter()
                .map(Cell::from_value)
                .collect::<ScriptResult<Vec<_>>>()?;
            if cells.len() != height && frame.data.width() > 0 {
                return Err(ScriptError::value(format!(
                    "Length of values ({}) does not match length of index ({})",
                    cells.len(),
                    height
                )));
            }
            cells_to_series(name, &cells)
        }
        scalar => {
            let cell = Cell::from_value(scalar)?;
            cells_to_series(name, &vec![cell; height])
        }
    };
    series.rename(name);
    let mut data = frame.data.clone();
    data.with_column(series)?;
    Ok(FrameValue {
        data,
        index: frame.index.clone(),
        tracked: frame.tracked,
    })
}

pub fn attribute(frame: &FrameValue, name: &str) -> ScriptResult<Option<Value>> {
    let names = frame.column_names();
    Ok(Some(match name {
        "columns" => Value::list(names.into_iter().map(Value::Str).collect()),
        "shape" => Value::tuple(vec![
            Value::Int(frame.height() as i64),
            Value::Int(names.len() as i64),
        ]),
        "empty" => Value::Bool(frame.height() == 0 || names.is_empty()),
        "size" => Value::Int((frame.height() * names.len()) as i64),
        "index" => Value::list(frame.row_labels()?.iter().map(|c| c.to_value()).collect()),
        "dtypes" => {
            let cells: Vec<Cell> = names
                .iter()
                .map(|n| frame.series(n).map(|s| Cell::Str(dtype_name(s.dtype()))))
                .collect::<ScriptResult<_>>()?;
            let labels = Labels {
                name: None,
                values: names.iter().map(|n| Cell::Str(n.clone())).collect(),
            };
            Value::Series(SeriesValue::from_cells("dtypes", &cells, Some(labels)))
        }
        "values" => {
            let columns: Vec<Vec<Cell>> = names
                .iter()
                .map(|n| frame.series(n).and_then(series_cells))
                .collect::<ScriptResult<_>>()?;
            let rows = (0..frame.height())
                .map(|r| Value::list(columns.iter().map(|c| c[r].to_value()).collect()))
                .collect();
            Value::list(rows)
        }
        _ => return Ok(None),
    }))
}

fn reduce_frame(frame: &FrameValue, op: Reduction, args: &Args) -> ScriptResult<Value> {
    let axis = match args.get(99, "axis") {
        Some(Value::Str(s)) if s == "columns" => 1,
        Some(v) => v.as_int().unwrap_or(0),
        None => 0,
    };
    let names = frame.column_names();
    let mut included = Vec::new();
    let mut columns = Vec::new();
    for name in &names {
        let cells = series_cells(frame.series(name)?)?;
        let numeric = cells.iter().all(|c| c.is_null() || c.is_numeric());
        if op.numeric_only() && !numeric {
            continue;
        }
        if matches!(op, Reduction::Min | Reduction::Max) && axis == 1 && !numeric {
            continue;
        }
        included.push(name.clone());
        columns.push(cells);
    }

    if axis == 1 {
        let mut out = Vec::with_capacity(frame.height());
        for row in 0..frame.height() {
            let row_cells: Vec<Cell> = columns.iter().map(|c| c[row].clone()).collect();
            out.push(reduce(&row_cells, op)?);
        }
        let mut series = SeriesValue::from_cells(op.name(), &out, frame.labels()?);
        series.tracked = frame.tracked;
        return Ok(Value::Series(series));
    }

    let mut out = Vec::with_capacity(columns.len());
    for cells in &columns {
        out.push(reduce(cells, op)?);
    }
    let labels = Labels {
        name: None,
        values: included.into_iter().map(Cell::Str).collect(),
    };
    let mut series = SeriesValue::from_cells(op.name(), &out, Some(labels));
    series.tracked = frame.tracked;
    Ok(Value::Series(series))
}

fn sort_frame(frame: &FrameValue, by: &[String], ascending: &[bool]) -> ScriptResult<FrameValue> {
    require_columns(frame, by)?;
    let keys = by
        .iter()
        .map(|n| series_cells(frame.series(n)?))
        .collect::<ScriptResult<Vec<_>>>()?;
    let order = sort_permutation(&keys, ascending, frame.height());
    rows(frame, &order)
}

fn ascending_arg(args: &Args, index: usize, count: usize) -> ScriptResult<Vec<bool>> {
    match args.get(index, "ascending") {
        None => Ok(vec![true; count]),
        Some(Value::List(_)) | Some(Value::Tuple(_)) => args
            .get(index, "ascending")
            .map(|v| v.iter_values())
            .unwrap_or_else(|| Ok(Vec::new()))?
            .iter()
            .map(|v| v.truthy())
            .collect(),
        Some(v) => Ok(vec![v.truthy()?; count]),
    }
}

fn row_keys(frame: &FrameValue, names: &[String]) -> ScriptResult<Vec<String>> {
    let columns = names
        .iter()
        .map(|n| series_cells(frame.series(n)?))
        .collect::<ScriptResult<Vec<_>>>()?;
    Ok((0..frame.height())
        .map(|r| {
            columns
                .iter()
                .map(|c| c[r].hash_key())
                .collect::<Vec<_>>()
                .join("\u{1f}")
        })
        .collect())
}

fn rebuild(frame: &FrameValue, columns: Vec<Series>) -> ScriptResult<FrameValue> {
    Ok(frame.derived(DataFrame::new(columns)?))
}

fn map_cells(frame: &FrameValue, f: impl Fn(&str, &[Cell]) -> ScriptResult<Vec<Cell>>) -> ScriptResult<FrameValue> {
    let mut columns = Vec::with_capacity(frame.data.width());
    for series in frame.data.get_columns() {
        let name = series.name().to_string();
        if Some(&name) == frame.index.as_ref() {
            columns.push(series.clone());
            continue;
        }
        let cells = series_cells(series)?;
        columns.push(cells_to_series(&name, &f(&name, &cells)?));
    }
    rebuild(frame, columns)
}

pub struct MergeSpec {
    pub how: String,
    pub left_on: Vec<String>,
    pub right_on: Vec<String>,
}

impl MergeSpec {
    /// Read `on`, `left_on`, `right_on` and `how`; `how_slot` is its positional index
    pub fn from_args(left: &FrameValue, right: &FrameValue, args: &Args, how_slot: usize) -> ScriptResult<Self> {
        let how = args.str_arg(how_slot, "how").unwrap_or_else(|| "inner".to_string());
        let (left_on, right_on) = match (args.kwarg("on"), args.kwarg("left_on"), args.kwarg("right_on")) {
            (Some(on), _, _) => {
                let on = columns_arg(on, "on")?;
                (on.clone(), on)
            }
            (None, Some(l), Some(r)) => (columns_arg(l, "left_on")?, columns_arg(r, "right_on")?),
            _ => {
                let right_names: HashSet<String> = right.column_names().into_iter().collect();
                let common: Vec<String> = left
                    .column_names()
                    .into_iter()
                    .filter(|n| right_names.contains(n))
                    .collect();
                if common.is_empty() {
                    return Err(ScriptError::new(
                        crate::script::error::Fault::Frame,
                        "No common columns to perform merge on",
                    ));
                }
                (common.clone(), common)
            }
        };
        if left_on.len() != right_on.len() {
            return Err(ScriptError::value("len(right_on) must equal len(left_on)"));
        }
        Ok(Self {
            how,
            left_on,
            right_on,
        })
    }
}

pub fn merge(left: &FrameValue, right: &FrameValue, spec: &MergeSpec) -> ScriptResult<FrameValue> {
    require_columns(left, &spec.left_on)?;
    require_columns(right, &spec.right_on)?;
    let (l, r, l_on, r_on, join_type) = match spec.how.as_str() {
        "inner" => (left, right, &spec.left_on, &spec.right_on, JoinType::Inner),
        "left" => (left, right, &spec.left_on, &spec.right_on, JoinType::Left),
        "right" => (right, left, &spec.right_on, &spec.left_on, JoinType::Left),
        "outer" => (left, right, &spec.left_on, &spec.right_on, JoinType::Outer),
        other => {
            return Err(ScriptError::value(format!(
                "Invalid merge type '{}': expected inner, left, right or outer",
                other
            )))
        }
    };
    let l_exprs: Vec<Expr> = l_on.iter().map(|c| col(c.as_str())).collect();
    let r_exprs: Vec<Expr> = r_on.iter().map(|c| col(c.as_str())).collect();
    let joined = l
        .data
        .clone()
        .lazy()
        .join(r.data.clone().lazy(), l_exprs, r_exprs, JoinArgs::new(join_type))
        .collect()?;
    Ok(FrameValue {
        data: joined,
        index: None,
        tracked: left.tracked || right.tracked,
    })
}

/// Stack frames vertically, aligning columns by name
pub fn concat(frames: &[FrameValue]) -> ScriptResult<FrameValue> {
    let mut names: Vec<String> = Vec::new();
    for frame in frames {
        for name in frame.data.get_column_names() {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    let mut columns = Vec::with_capacity(names.len());
    for name in &names {
        let mut cells = Vec::new();
        for frame in frames {
            match frame.data.column(name) {
                Ok(series) => cells.extend(series_cells(series)?),
                Err(_) => cells.extend(std::iter::repeat(Cell::Null).take(frame.height())),
            }
        }
        columns.push(cells_to_series(name, &cells));
    }
    Ok(FrameValue {
        data: DataFrame::new(columns)?,
        index: None,
        tracked: frames.iter().any(|f| f.tracked),
    })
}

pub fn describe(frame: &FrameValue) -> ScriptResult<FrameValue> {
    let mut stat_names: Option<Vec<String>> = None;
    let mut columns = Vec::new();
    for name in frame.column_names() {
        let cells = series_cells(frame.series(&name)?)?;
        if !cells.iter().all(|c| c.is_null() || c.is_numeric()) {
            continue;
        }
        let stats = describe_cells(&cells)?;
        if stat_names.is_none() {
            stat_names = Some(stats.iter().map(|(k, _)| k.clone()).collect());
        }
        let values: Vec<Cell> = stats.into_iter().map(|(_, v)| v).collect();
        columns.push(cells_to_series(&name, &values));
    }
    let stat_names = stat_names.ok_or_else(|| ScriptError::value("describe() found no numeric columns"))?;
    let label_cells: Vec<Cell> = stat_names.into_iter().map(Cell::Str).collect();
    columns.insert(0, cells_to_series("statistic", &label_cells));
    let mut out = FrameValue::with_index(DataFrame::new(columns)?, Some("statistic".to_string()));
    out.tracked = frame.tracked;
    Ok(out)
}

fn pivot_table(frame: &FrameValue, args: &Args) -> ScriptResult<FrameValue> {
    let values = args
        .str_arg(0, "values")
        .ok_or_else(|| ScriptError::type_error("pivot_table() requires 'values' as a column name"))?;
    let index = args
        .str_arg(1, "index")
        .ok_or_else(|| ScriptError::type_error("pivot_table() requires 'index' as a column name"))?;
    let columns = args
        .str_arg(2, "columns")
        .ok_or_else(|| ScriptError::type_error("pivot_table() requires 'columns' as a column name"))?;
    let op = match args.str_arg(3, "aggfunc") {
        Some(name) => Reduction::from_name(&name)
            .ok_or_else(|| ScriptError::value(format!("unknown aggregation '{}'", name)))?,
        None => Reduction::Mean,
    };
    require_columns(frame, &[values.clone(), index.clone(), columns.clone()])?;

    let value_cells = series_cells(frame.series(&values)?)?;
    let index_cells = series_cells(frame.series(&index)?)?;
    let column_cells = series_cells(frame.series(&columns)?)?;

    let distinct = |cells: &[Cell]| {
        let mut seen = HashSet::new();
        let mut out: Vec<Cell> = cells
            .iter()
            .filter(|c| !c.is_null() && seen.insert(c.hash_key()))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.total_cmp(b));
        out
    };
    let rows_keys = distinct(&index_cells);
    let col_keys = distinct(&column_cells);

    let mut buckets: HashMap<(String, String), Vec<Cell>> = HashMap::new();
    for i in 0..frame.height() {
        buckets
            .entry((index_cells[i].hash_key(), column_cells[i].hash_key()))
            .or_default()
            .push(value_cells[i].clone());
    }

    let mut out_columns = vec![cells_to_series(&index, &rows_keys)];
    for ck in &col_keys {
        let mut cells = Vec::with_capacity(rows_keys.len());
        for rk in &rows_keys {
            cells.push(match buckets.get(&(rk.hash_key(), ck.hash_key())) {
                Some(group) => reduce(group, op)?,
                None => Cell::Null,
            });
        }
        out_columns.push(cells_to_series(&ck.label(), &cells));
    }
    let mut out = FrameValue::with_index(DataFrame::new(out_columns)?, Some(index));
    out.tracked = frame.tracked;
    Ok(out)
}

fn to_dict(frame: &FrameValue, orient: &str) -> ScriptResult<Value> {
    let names = frame.column_names();
    let labels = frame.row_labels()?;
    let columns: Vec<Vec<Cell>> = names
        .iter()
        .map(|n| series_cells(frame.series(n)?))
        .collect::<ScriptResult<_>>()?;
    match orient {
        "records" => {
            let mut records = Vec::with_capacity(frame.height());
            for r in 0..frame.height() {
                let mut d = Dict::new();
                for (name, cells) in names.iter().zip(columns.iter()) {
                    d.insert(Value::str(name.as_str()), cells[r].to_value())?;
                }
                records.push(Value::dict(d));
            }
            Ok(Value::list(records))
        }
        "list" => {
            let mut d = Dict::new();
            for (name, cells) in names.iter().zip(columns.iter()) {
                d.insert(
                    Value::str(name.as_str()),
                    Value::list(cells.iter().map(|c| c.to_value()).collect()),
                )?;
            }
            Ok(Value::dict(d))
        }
        "index" => {
            let mut d = Dict::new();
            for (r, label) in labels.iter().enumerate() {
                let mut row = Dict::new();
                for (name, cells) in names.iter().zip(columns.iter()) {
                    row.insert(Value::str(name.as_str()), cells[r].to_value())?;
                }
                d.insert(label.to_value(), Value::dict(row))?;
            }
            Ok(Value::dict(d))
        }
        "dict" => {
            let mut d = Dict::new();
            for (name, cells) in names.iter().zip(columns.iter()) {
                let mut inner = Dict::new();
                for (label, cell) in labels.iter().zip(cells.iter()) {
                    inner.insert(label.to_value(), cell.to_value())?;
                }
                d.insert(Value::str(name.as_str()), Value::dict(inner))?;
            }
            Ok(Value::dict(d))
        }
        other => Err(ScriptError::value(format!("orient '{}' not understood", other))),
    }
}

/// One labelled series per row, for `iterrows`
pub fn row_series(frame: &FrameValue) -> ScriptResult<Vec<(Cell, SeriesValue)>> {
    let names = frame.column_names();
    let columns: Vec<Vec<Cell>> = names
        .iter()
        .map(|n| series_cells(frame.series(n)?))
        .collect::<ScriptResult<_>>()?;
    let labels = Rc::new(Labels {
        name: None,
        values: names.iter().map(|n| Cell::Str(n.clone())).collect(),
    });
    let row_labels = frame.row_labels()?;
    let mut out = Vec::with_capacity(frame.height());
    for (r, label) in row_labels.into_iter().enumerate() {
        let cells: Vec<Cell> = columns.iter().map(|c| c[r].clone()).collect();
        out.push((
            label.clone(),
            SeriesValue {
                data: cells_to_series(&label.label(), &cells),
                labels: Some(labels.clone()),
                tracked: frame.tracked,
            },
        ));
    }
    Ok(out)
}

pub fn call_method(frame: &FrameValue, name: &str, args: &Args) -> ScriptResult<Value> {
    if let Some(op) = Reduction::from_name(name) {
        if op != Reduction::Size {
            return reduce_frame(frame, op, args);
        }
    }
    match name {
        "head" | "tail" => {
            let n = args.int_or(0, "n", 5)?.max(0) as usize;
            let data = if name == "head" {
                frame.data.head(Some(n))
            } else {
                frame.data.tail(Some(n))
            };
            Ok(Value::Frame(frame.derived(data)))
        }
        "groupby" => {
            let by = args.require(0, "by", "groupby")?;
            let keys = columns_arg(by, "by")?;
            require_columns(frame, &keys)?;
            let as_index = args.bool_or(99, "as_index", true)?;
            Ok(Value::GroupBy(GroupByValue {
                frame: frame.clone(),
                keys,
                selection: None,
                as_index,
                tracked: frame.tracked,
            }))
        }
        "sort_values" => {
            let by = columns_arg(args.require(0, "by", "sort_values")?, "by")?;
            let ascending = ascending_arg(args, 1, by.len())?;
            Ok(Value::Frame(sort_frame(frame, &by, &ascending)?))
        }
        "sort_index" => {
            let ascending = args.bool_or(99, "ascending", true)?;
            let labels = frame.row_labels()?;
            let order = sort_permutation(&[labels], &[ascending], frame.height());
            Ok(Value::Frame(rows(frame, &order)?))
        }
        "nlargest" | "nsmallest" => {
            let n = args.int_or(0, "n", 5)?.max(0) as usize;
            let by = columns_arg(args.require(1, "columns", name)?, "columns")?;
            let sorted = sort_frame(frame, &by, &vec![name == "nsmallest"; by.len()])?;
            Ok(Value::Frame(sorted.derived(sorted.data.head(Some(n)))))
        }
        "drop" => {
            let names = match (args.kwarg("columns"), args.get(0, "labels")) {
                (Some(cols), _) => columns_arg(cols, "columns")?,
                (None, Some(labels)) => {
                    let axis = args.get(1, "axis").cloned().unwrap_or(Value::Int(0));
                    let by_columns = matches!(&axis, Value::Int(1))
                        || matches!(&axis, Value::Str(s) if s == "columns");
                    if !by_columns {
                        return Err(ScriptError::unsupported(
                            "drop() supports columns only; pass columns=[...] or axis=1",
                        ));
                    }
                    columns_arg(labels, "labels")?
                }
                (None, None) => return Err(ScriptError::type_error("drop() requires columns")),
            };
            let missing: Vec<String> = names.iter().filter(|n| !frame.has_column(n)).cloned().collect();
            if !missing.is_empty() {
                return Err(ScriptError::key(format!("\"{:?} not found in axis\"", missing)));
            }
            let keep: Vec<Series> = frame
                .data
                .get_columns()
                .iter()
                .filter(|s| !names.iter().any(|n| n == s.name()))
                .cloned()
                .collect();
            Ok(Value::Frame(rebuild(frame, keep)?))
        }
        "rename" => {
            let mapping = match args.kwarg("columns").or_else(|| args.positional.first()) {
                Some(Value::Dict(d)) => d.borrow().clone(),
                Some(other) => {
                    return Err(ScriptError::type_error(format!(
                        "rename() expects a dict of column names, not '{}'",
                        other.type_name()
                    )))
                }
                None => return Ok(Value::Frame(frame.clone())),
            };
            let mut columns = Vec::with_capacity(frame.data.width());
            let mut index = frame.index.clone();
            for series in frame.data.get_columns() {
                let mut s = series.clone();
                if let Some(Value::Str(new_name)) = mapping.get_str(series.name()) {
                    if index.as_deref() == Some(series.name()) {
                        index = Some(new_name.clone());
                    }
                    s.rename(new_name);
                }
                columns.push(s);
            }
            Ok(Value::Frame(FrameValue {
                data: DataFrame::new(columns)?,
                index,
                tracked: frame.tracked,
            }))
        }
        "fillna" => {
            let fill = args.require(0, "value", "fillna")?;
            let out = map_cells(frame, |name, cells| {
                let replacement = match fill {
                    Value::Dict(d) => match d.borrow().get_str(name) {
                        Some(v) => Cell::from_value(v)?,
                        None => return Ok(cells.to_vec()),
                    },
                    scalar => Cell::from_value(scalar)?,
                };
                Ok(cells
                    .iter()
                    .map(|c| if c.is_null() { replacement.clone() } else { c.clone() })
                    .collect())
            })?;
            Ok(Value::Frame(out))
        }
        "dropna" => {
            let subset = match args.kwarg("subset") {
                Some(v) => columns_arg(v, "subset")?,
                None => frame.column_names(),
            };
            require_columns(frame, &subset)?;
            let how_all = args.str_arg(99, "how").as_deref() == Some("all");
            let columns = subset
                .iter()
                .map(|n| series_cells(frame.series(n)?))
                .collect::<ScriptResult<Vec<_>>>()?;
            let mask: Vec<bool> = (0..frame.height())
                .map(|r| {
                    let nulls = columns.iter().filter(|c| c[r].is_null()).count();
                    if how_all {
                        nulls < columns.len() || columns.is_empty()
                    } else {
                        nulls == 0
                    }
                })
                .collect();
            Ok(Value::Frame(filter_rows(frame, &mask)?))
        }
        "drop_duplicates" => {
            let subset = match args.get(0, "subset") {
                Some(v) => columns_arg(v, "subset")?,
                None => frame.column_names(),
            };
            require_columns(frame, &subset)?;
            let keep_last = args.str_arg(99, "keep").as_deref() == Some("last");
            let keys = row_keys(frame, &subset)?;
            let mut seen = HashSet::new();
            let mut positions: Vec<usize> = if keep_last {
                (0..keys.len()).rev().filter(|&r| seen.insert(keys[r].clone())).collect()
            } else {
                (0..keys.len()).filter(|&r| seen.insert(keys[r].clone())).collect()
            };
            positions.sort_unstable();
            Ok(Value::Frame(rows(frame, &positions)?))
        }
        "merge" => {
            let right = match args.require(0, "right", "merge")? {
                Value::Frame(f) => f.clone(),
                Value::Series(s) => column::to_frame(s, None)?,
                other => {
                    return Err(ScriptError::type_error(format!(
                        "Can only merge Series or DataFrame objects, a '{}' was passed",
                        other.type_name()
                    )))
                }
            };
            let spec = MergeSpec::from_args(frame, &right, args, 1)?;
            Ok(Value::Frame(merge(frame, &right, &spec)?))
        }
        "join" => {
            let right = match args.require(0, "other", "join")? {
                Value::Frame(f) => f.clone(),
                other => {
                    return Err(ScriptError::type_error(format!(
                        "join() expects a DataFrame, not '{}'",
                        other.type_name()
                    )))
                }
            };
            let how = args.str_arg(99, "how").unwrap_or_else(|| "left".to_string());
            let right_key = right
                .index
                .clone()
                .ok_or_else(|| ScriptError::value("join() requires the other frame to have an index; use merge()"))?;
            let left_key = match args.kwarg("on") {
                Some(on) => on
                    .as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| ScriptError::type_error("join(on=...) expects a column name"))?,
                None => frame
                    .index
                    .clone()
                    .ok_or_else(|| ScriptError::value("join() requires an index or on=<column>"))?,
            };
            let spec = MergeSpec {
                how,
                left_on: vec![left_key],
                right_on: vec![right_key],
            };
            let mut joined = merge(frame, &right, &spec)?;
            joined.index = frame.index.clone().filter(|i| joined.has_column(i));
            Ok(Value::Frame(joined))
        }
        "set_index" => {
            let key = args
                .str_arg(0, "keys")
                .ok_or_else(|| ScriptError::type_error("set_index() expects a column name"))?;
            require_columns(frame, &[key.clone()])?;
            let mut data = frame.data.clone();
            if let Some(old) = &frame.index {
                if *old != key {
                    data = data.drop(old)?;
                }
            }
            Ok(Value::Frame(FrameValue {
                data,
                index: Some(key),
                tracked: frame.tracked,
            }))
        }
        "reset_index" => {
            let drop = args.bool_or(99, "drop", false)?;
            let mut data = frame.data.clone();
            if drop {
                if let Some(old) = &frame.index {
                    data = data.drop(old)?;
                }
            }
            Ok(Value::Frame(FrameValue {
                data,
                index: None,
                tracked: frame.tracked,
            }))
        }
        "copy" => Ok(Value::Frame(frame.clone())),
        "describe" => Ok(Value::Frame(describe(frame)?)),
        "pivot_table" => Ok(Value::Frame(pivot_table(frame, args)?)),
        "isnull" | "isna" | "notnull" | "notna" => {
            let want_null = matches!(name, "isnull" | "isna");
            let out = map_cells(frame, |_, cells| {
                Ok(cells.iter().map(|c| Cell::Bool(c.is_null() == want_null)).collect())
            })?;
            Ok(Value::Frame(out))
        }
        "round" => {
            let decimals = args.int_or(0, "decimals", 0)?;
            let factor = 10f64.powi(decimals as i32);
            let out = map_cells(frame, |_, cells| {
                Ok(cells
                    .iter()
                    .map(|c| match c {
                        Cell::Float(f) => Cell::Float((f * factor).round() / factor),
                        other => other.clone(),
                    })
                    .collect())
            })?;
            Ok(Value::Frame(out))
        }
        "size" => Ok(Value::Int((frame.height() * frame.column_names().len()) as i64)),
        "to_dict" => {
            let orient = args.str_arg(0, "orient").unwrap_or_else(|| "dict".to_string());
            to_dict(frame, &orient)
        }
        "to_string" => Ok(Value::Str(super::render_frame(frame))),
        "iterrows" => {
            let items = row_series(frame)?
                .into_iter()
                .map(|(label, row)| Value::tuple(vec![label.to_value(), Value::Series(row)]))
                .collect();
            Ok(Value::list(items))
        }
        "value_counts" => {
            let names = frame.column_names();
            let keys = row_keys(frame, &names)?;
            let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
            for (r, k) in keys.iter().enumerate() {
                counts.entry(k.clone()).or_insert((r, 0)).1 += 1;
            }
            let mut ordered: Vec<(usize, usize)> = counts.into_values().collect();
            ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            let positions: Vec<usize> = ordered.iter().map(|(r, _)| *r).collect();
            let mut out = rows(frame, &positions)?;
            let count_cells: Vec<Cell> = ordered.iter().map(|(_, n)| Cell::Int(*n as i64)).collect();
            out.data.with_column(cells_to_series("count", &count_cells))?;
            Ok(Value::Frame(out))
        }
        other => {
            if frame.has_column(other) {
                return Err(ScriptError::type_error(format!("'Series' object is not callable ({})", other)));
            }
            Err(ScriptError::attribute(format!(
                "'DataFrame' object has no attribute '{}'",
                other
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales() -> FrameValue {
        let df = df!(
            "date" => &["2024-01-01", "2024-01-02", "2024-01-03", "2024-01-04"],
            "region" => &["West", "East", "West", "North"],
            "sales" => &[100i64, 200, 300, 50]
        )
        .unwrap();
        FrameValue::new(df)
    }

    #[test]
    fn test_missing_column_is_key_error() {
        let err = subscript(&sales(), &Value::str("profit")).unwrap_err();
        assert_eq!(err.fault, crate::script::error::Fault::Key);
        assert_eq!(err.message, "'profit'");
    }

    #[test]
    fn test_sort_values_descending() {
        let args = Args::new(
            vec![Value::str("sales")],
            vec![("ascending".to_string(), Value::Bool(false))],
        );
        let Value::Frame(sorted) = call_method(&sales(), "sort_values", &args).unwrap() else {
            panic!("expected frame")
        };
        let cells = series_cells(sorted.series("sales").unwrap()).unwrap();
        assert_eq!(cells[0], Cell::Int(300));
        assert_eq!(cells[3], Cell::Int(50));
    }

    #[test]
    fn test_set_item_keeps_caller_frame() {
        let original = sales();
        let updated = set_item(&original, &Value::str("bonus"), &Value::Int(1)).unwrap();
        assert_eq!(updated.column_names().len(), 4);
        assert_eq!(original.column_names().len(), 3);
    }

    #[test]
    fn test_drop_and_rename() {
        let args = Args::new(vec![], vec![("columns".to_string(), Value::list(vec![Value::str("date")]))]);
        let Value::Frame(dropped) = call_method(&sales(), "drop", &args).unwrap() else {
            panic!("expected frame")
        };
        assert_eq!(dropped.column_names(), vec!["region", "sales"]);

        let mut mapping = Dict::new();
        mapping.insert(Value::str("sales"), Value::str("revenue")).unwrap();
        let args = Args::new(vec![], vec![("columns".to_string(), Value::dict(mapping))]);
        let Value::Frame(renamed) = call_method(&dropped, "rename", &args).unwrap() else {
            panic!("expected frame")
        };
        assert_eq!(renamed.column_names(), vec!["region", "revenue"]);
    }

    #[test]
    fn test_merge_on_common_column() {
        let targets = FrameValue::new(
            df!("region" => &["East", "West"], "target" => &[150i64, 350]).unwrap(),
        );
        let spec = MergeSpec::from_args(&sales(), &targets, &Args::default(), 1).unwrap();
        let merged = merge(&sales(), &targets, &spec).unwrap();
        assert_eq!(merged.height(), 3);
        assert!(merged.has_column("target"));
    }

    #[test]
    fn test_concat_aligns_columns() {
        let a = FrameValue::new(df!("x" => &[1i64]).unwrap());
        let b = FrameValue::new(df!("x" => &[2.5f64], "y" => &["k"]).unwrap());
        let out = concat(&[a, b]).unwrap();
        assert_eq!(out.height(), 2);
        assert_eq!(series_cells(out.series("y").unwrap()).unwrap()[0], Cell::Null);
    }

    #[test]
    fn test_frame_sum_skips_text_columns() {
        let Value::Series(totals) = call_method(&sales(), "sum", &Args::default()).unwrap() else {
            panic!("expected series")
        };
        assert_eq!(totals.len(), 1);
        assert_eq!(totals.cells().unwrap()[0], Cell::Int(650));
    }
}
