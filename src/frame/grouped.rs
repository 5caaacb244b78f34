//! Grouped aggregation
//!
//! Aggregations run through polars `group_by().agg()`. Groups with a null key are
//! dropped and the output is sorted by key, matching what script authors expect
//! from a default groupby.

use super::cells::{cells_to_series, series_cells, sort_permutation, take_rows, Cell};
use super::column::{reduce, Reduction};
use super::table::require_columns;
use super::{FrameValue, GroupByValue, Labels, SeriesValue, Selection};
use crate::script::error::{ScriptError, ScriptResult};
use crate::script::value::{name_list, Args, Value};
use itertools::Itertools;
use polars::prelude::*;
use std::collections::HashMap;
use std::rc::Rc;

/// One output column of an aggregation
struct AggColumn {
    source: String,
    op: Reduction,
    alias: String,
}

impl GroupByValue {
    /// Columns aggregated when no explicit spec names them
    fn value_columns(&self) -> Vec<String> {
        match &self.selection {
            Some(Selection::One(name)) => vec![name.clone()],
            Some(Selection::Many(names)) => names.clone(),
            None => self
                .frame
                .column_names()
                .into_iter()
                .filter(|n| !self.keys.contains(n))
                .collect(),
        }
    }

    fn single_selection(&self) -> bool {
        matches!(self.selection, Some(Selection::One(_)))
    }
}

fn is_numeric(frame: &FrameValue, name: &str) -> ScriptResult<bool> {
    let dtype = frame.series(name)?.dtype().clone();
    Ok(dtype.is_numeric() || dtype == DataType::Boolean)
}

fn agg_expr(frame: &FrameValue, column: &AggColumn) -> ScriptResult<Expr> {
    if column.op == Reduction::Size {
        return Ok(len().alias(&column.alias));
    }
    let mut base = col(&column.source);
    if frame.series(&column.source)?.dtype() == &DataType::Boolean {
        base = base.cast(DataType::Int64);
    }
    let expr = match column.op {
        Reduction::Sum => base.sum(),
        Reduction::Mean => base.mean(),
        Reduction::Median => base.median(),
        Reduction::Min => base.min(),
        Reduction::Max => base.max(),
        Reduction::Count => base.count(),
        Reduction::Std => base.std(1),
        Reduction::Nunique => base.drop_nulls().n_unique(),
        Reduction::First => base.drop_nulls().first(),
        Reduction::Last => base.drop_nulls().last(),
        Reduction::Size => len(),
    };
    Ok(expr.alias(&column.alias))
}

fn check_numeric(group: &GroupByValue, column: &AggColumn) -> ScriptResult<()> {
    if column.op.numeric_only() && !is_numeric(&group.frame, &column.source)? {
        return Err(ScriptError::type_error(format!(
            "agg function failed [how->{},dtype->{}]: column '{}' is not numeric",
            column.op.name(),
            super::cells::dtype_name(group.frame.series(&column.source)?.dtype()),
            column.source
        )));
    }
    Ok(())
}

/// Run the aggregation and shape the result
fn aggregate(group: &GroupByValue, columns: Vec<AggColumn>, series_shape: bool) -> ScriptResult<Value> {
    require_columns(&group.frame, &group.keys)?;
    for column in &columns {
        if column.op != Reduction::Size {
            require_columns(&group.frame, &[column.source.clone()])?;
            check_numeric(group, column)?;
        }
    }
    let key_exprs: Vec<Expr> = group.keys.iter().map(|k| col(k.as_str())).collect();
    let aggs = columns
        .iter()
        .map(|c| agg_expr(&group.frame, c))
        .collect::<ScriptResult<Vec<_>>>()?;

    let out = group
        .frame
        .data
        .clone()
        .lazy()
        .group_by(key_exprs)
        .agg(aggs)
        .collect()?;
    let out = order_groups(&out, &group.keys)?;
    let value_names: Vec<String> = columns.into_iter().map(|c| c.alias).collect();
    shape(group, out, &value_names, series_shape)
}

/// Drop null-key groups and sort ascending by key
fn order_groups(out: &DataFrame, keys: &[String]) -> ScriptResult<DataFrame> {
    let key_cells = keys
        .iter()
        .map(|k| {
            out.column(k)
                .map_err(ScriptError::from)
                .and_then(series_cells)
        })
        .collect::<ScriptResult<Vec<_>>>()?;
    let order = sort_permutation(&key_cells, &vec![true; keys.len()], out.height());
    let kept: Vec<usize> = order
        .into_iter()
        .filter(|&r| key_cells.iter().all(|c| !c[r].is_null()))
        .collect();
    take_rows(out, &kept)
}

fn group_labels(out: &DataFrame, keys: &[String]) -> ScriptResult<Labels> {
    if keys.len() == 1 {
        return Ok(Labels {
            name: Some(keys[0].clone()),
            values: series_cells(out.column(&keys[0])?)?,
        });
    }
    let key_cells = keys
        .iter()
        .map(|k| series_cells(out.column(k)?))
        .collect::<ScriptResult<Vec<_>>>()?;
    let values = (0..out.height())
        .map(|r| {
            let parts: Vec<String> = key_cells.iter().map(|c| c[r].to_value().repr()).collect();
            Cell::Str(format!("({})", parts.join(", ")))
        })
        .collect();
    Ok(Labels { name: None, values })
}

fn shape(group: &GroupByValue, out: DataFrame, value_names: &[String], series_shape: bool) -> ScriptResult<Value> {
    if !group.as_index {
        let mut frame = FrameValue::new(out);
        frame.tracked = group.tracked;
        return Ok(Value::Frame(frame));
    }
    if series_shape && value_names.len() == 1 {
        let labels = group_labels(&out, &group.keys)?;
        let data = out.column(&value_names[0])?.clone();
        return Ok(Value::Series(SeriesValue {
            data,
            labels: Some(Rc::new(labels)),
            tracked: group.tracked,
        }));
    }
    let index = if group.keys.len() == 1 {
        Some(group.keys[0].clone())
    } else {
        None
    };
    let mut frame = FrameValue::with_index(out, index);
    frame.tracked = group.tracked;
    Ok(Value::Frame(frame))
}

fn reduction(group: &GroupByValue, op: Reduction) -> ScriptResult<Value> {
    if op == Reduction::Size {
        let columns = vec![AggColumn {
            source: String::new(),
            op,
            alias: "size".to_string(),
        }];
        return aggregate(group, columns, true);
    }
    let mut names = group.value_columns();
    // numeric reductions over a whole frame skip text columns
    if group.selection.is_none() && op.numeric_only() {
        let mut numeric = Vec::new();
        for name in names {
            if is_numeric(&group.frame, &name)? {
                numeric.push(name);
            }
        }
        names = numeric;
    }
    let columns = names
        .into_iter()
        .map(|n| AggColumn {
            alias: n.clone(),
            source: n,
            op,
        })
        .collect();
    aggregate(group, columns, group.single_selection())
}

fn reduction_named(name: &str) -> ScriptResult<Reduction> {
    Reduction::from_name(name)
        .ok_or_else(|| ScriptError::attribute(format!("'{}' is not a valid aggregation function", name)))
}

/// Function names from a string or list spec
fn function_names(value: &Value) -> ScriptResult<Vec<String>> {
    match value {
        Value::Builtin(name) => Ok(vec![name.rsplit('.').next().unwrap_or(name).to_string()]),
        other => name_list(other).ok_or_else(|| {
            ScriptError::type_error(format!(
                "aggregation must be a function name or list of names, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn agg(group: &GroupByValue, args: &Args) -> ScriptResult<Value> {
    // named aggregation: agg(total=('sales', 'sum'))
    if args.positional.is_empty() && !args.keywords.is_empty() {
        let mut columns = Vec::new();
        for (alias, spec) in &args.keywords {
            let parts = spec.iter_values()?;
            let (source, func) = match parts.as_slice() {
                [Value::Str(source), func] => (source.clone(), function_names(func)?),
                _ => {
                    return Err(ScriptError::type_error(format!(
                        "named aggregation '{}' must be a (column, function) pair",
                        alias
                    )))
                }
            };
            let func = func
                .first()
                .ok_or_else(|| ScriptError::type_error("empty aggregation spec"))?;
            columns.push(AggColumn {
                source,
                op: reduction_named(func)?,
                alias: alias.clone(),
            });
        }
        return aggregate(group, columns, false);
    }

    let spec = args.require(0, "func", "agg")?;
    match spec {
        Value::Dict(d) => {
            let mut columns = Vec::new();
            for (key, funcs) in d.borrow().entries() {
                let source = key
                    .as_str()
                    .ok_or_else(|| ScriptError::type_error("agg() dict keys must be column names"))?
                    .to_string();
                let names = function_names(funcs)?;
                let multiple = matches!(funcs, Value::List(_) | Value::Tuple(_));
                for func in names {
                    columns.push(AggColumn {
                        alias: if multiple {
                            format!("{}_{}", source, func)
                        } else {
                            source.clone()
                        },
                        source: source.clone(),
                        op: reduction_named(&func)?,
                    });
                }
            }
            aggregate(group, columns, false)
        }
        Value::Str(_) | Value::Builtin(_) => {
            let func = function_names(spec)?.remove(0);
            reduction(group, reduction_named(&func)?)
        }
        Value::List(_) | Value::Tuple(_) => {
            let funcs = function_names(spec)?;
            let sources = group.value_columns();
            let mut columns = Vec::new();
            for source in &sources {
                for func in &funcs {
                    columns.push(AggColumn {
                        alias: if group.single_selection() {
                            func.clone()
                        } else {
                            format!("{}_{}", source, func)
                        },
                        source: source.clone(),
                        op: reduction_named(func)?,
                    });
                }
            }
            aggregate(group, columns, false)
        }
        other => Err(ScriptError::type_error(format!(
            "agg() does not accept '{}'",
            other.type_name()
        ))),
    }
}

/// Row positions of each group, in sorted key order
fn group_rows(group: &GroupByValue) -> ScriptResult<Vec<(Vec<Cell>, Vec<usize>)>> {
    require_columns(&group.frame, &group.keys)?;
    let key_cells = group
        .keys
        .iter()
        .map(|k| series_cells(group.frame.series(k)?))
        .collect::<ScriptResult<Vec<_>>>()?;
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(Vec<Cell>, Vec<usize>)> = Vec::new();
    for row in 0..group.frame.height() {
        let key: Vec<Cell> = key_cells.iter().map(|c| c[row].clone()).collect();
        if key.iter().any(|c| c.is_null()) {
            continue;
        }
        let hash = key.iter().map(|c| c.hash_key()).collect::<Vec<_>>().join("\u{1f}");
        match slots.get(&hash) {
            Some(&slot) => groups[slot].1.push(row),
            None => {
                slots.insert(hash, groups.len());
                groups.push((key, vec![row]));
            }
        }
    }
    groups.sort_by(|a, b| {
        a.0.iter()
            .zip(b.0.iter())
            .map(|(x, y)| x.total_cmp(y))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(groups)
}

fn key_value(key: &[Cell]) -> Value {
    if key.len() == 1 {
        key[0].to_value()
    } else {
        Value::tuple(key.iter().map(|c| c.to_value()).collect())
    }
}

/// `(key, sub-frame)` pairs for iteration and `apply`
pub fn partitions(group: &GroupByValue) -> ScriptResult<Vec<(Value, FrameValue)>> {
    let mut out = Vec::new();
    for (key, rows) in group_rows(group)? {
        let data = take_rows(&group.frame.data, &rows)?;
        let mut frame = group.frame.derived(data);
        if let Some(Selection::Many(names)) = &group.selection {
            frame = super::table::select(&frame, names)?;
        }
        out.push((key_value(&key), frame));
    }
    Ok(out)
}

/// Selected column of each group, for `apply` over a single column
pub fn series_partitions(group: &GroupByValue) -> ScriptResult<Vec<(Value, SeriesValue)>> {
    let name = match &group.selection {
        Some(Selection::One(name)) => name.clone(),
        _ => return Err(ScriptError::value("expected a single selected column")),
    };
    partitions(group)?
        .into_iter()
        .map(|(key, frame)| Ok((key, frame.column(&name)?)))
        .collect()
}

/// Labels for per-group results, in partition order
pub fn partition_labels(group: &GroupByValue, keys: &[Value]) -> ScriptResult<Labels> {
    let name = if group.keys.len() == 1 {
        Some(group.keys[0].clone())
    } else {
        None
    };
    let values = keys
        .iter()
        .map(|k| match k {
            Value::Tuple(_) => Ok(Cell::Str(k.repr())),
            other => Cell::from_value(other),
        })
        .collect::<ScriptResult<Vec<_>>>()?;
    Ok(Labels { name, values })
}

/// `transform('sum')`: the group reduction broadcast back to every row
fn transform(group: &GroupByValue, op: Reduction) -> ScriptResult<Value> {
    let name = match &group.selection {
        Some(Selection::One(name)) => name.clone(),
        _ => {
            return Err(ScriptError::unsupported(
                "transform() is supported on a single selected column",
            ))
        }
    };
    let source = group.frame.column(&name)?;
    let cells = source.cells()?;
    let mut out = vec![Cell::Null; cells.len()];
    for (_, rows) in group_rows(group)? {
        let members: Vec<Cell> = rows.iter().map(|&r| cells[r].clone()).collect();
        let value = reduce(&members, op)?;
        for r in rows {
            out[r] = value.clone();
        }
    }
    let mut series = source.derived(cells_to_series(&name, &out));
    series.tracked = group.tracked;
    Ok(Value::Series(series))
}

pub fn subscript(group: &GroupByValue, key: &Value) -> ScriptResult<Value> {
    let selection = match key {
        Value::Str(name) => Selection::One(name.clone()),
        Value::List(_) | Value::Tuple(_) => Selection::Many(name_list(key).ok_or_else(|| {
            ScriptError::type_error("column selection must be a list of column names")
        })?),
        other => return Err(ScriptError::key(other.repr())),
    };
    let names = match &selection {
        Selection::One(name) => vec![name.clone()],
        Selection::Many(names) => names.clone(),
    };
    require_columns(&group.frame, &names).map_err(|_| {
        ScriptError::key(format!("\"Column not found: {}\"", names.join(", ")))
    })?;
    Ok(Value::GroupBy(GroupByValue {
        selection: Some(selection),
        ..group.clone()
    }))
}

pub fn call_method(group: &GroupByValue, name: &str, args: &Args) -> ScriptResult<Value> {
    if let Some(op) = Reduction::from_name(name) {
        return reduction(group, op);
    }
    match name {
        "agg" | "aggregate" => agg(group, args),
        "transform" => {
            let func = args
                .str_arg(0, "func")
                .ok_or_else(|| ScriptError::type_error("transform() expects an aggregation name"))?;
            transform(group, reduction_named(&func)?)
        }
        "head" | "tail" => {
            let n = args.int_or(0, "n", 5)?.max(0) as usize;
            let head = name == "head";
            let rows: Vec<usize> = group_rows(group)?
                .into_iter()
                .flat_map(|(_, members)| {
                    let skip = if head { 0 } else { members.len().saturating_sub(n) };
                    members.into_iter().skip(skip).take(n)
                })
                .sorted_unstable()
                .collect();
            let data = take_rows(&group.frame.data, &rows)?;
            Ok(Value::Frame(group.frame.derived(data)))
        }
        "ngroups" => Ok(Value::Int(group_rows(group)?.len() as i64)),
        other => Err(ScriptError::attribute(format!(
            "'DataFrameGroupBy' object has no attribute '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::table;

    fn sales() -> FrameValue {
        let df = df!(
            "region" => &[Some("West"), Some("East"), Some("West"), None, Some("North")],
            "product" => &["A", "B", "A", "B", "C"],
            "sales" => &[100i64, 200, 300, 75, 50]
        )
        .unwrap();
        FrameValue::new(df)
    }

    fn by_region() -> GroupByValue {
        let Value::GroupBy(g) = table::call_method(
            &sales(),
            "groupby",
            &Args::positional(vec![Value::str("region")]),
        )
        .unwrap() else {
            panic!("expected groupby")
        };
        g
    }

    #[test]
    fn test_selected_sum_is_labelled_series() {
        let Value::GroupBy(g) = subscript(&by_region(), &Value::str("sales")).unwrap() else {
            panic!("expected groupby")
        };
        let Value::Series(totals) = call_method(&g, "sum", &Args::default()).unwrap() else {
            panic!("expected series")
        };
        assert_eq!(
            super::super::series_to_json(&totals),
            serde_json::json!({"East": 200, "North": 50, "West": 400})
        );
    }

    #[test]
    fn test_unknown_selection_is_key_error() {
        let err = subscript(&by_region(), &Value::str("profit")).unwrap_err();
        assert_eq!(err.fault, crate::script::error::Fault::Key);
    }

    #[test]
    fn test_named_aggregation() {
        let args = Args::new(
            vec![],
            vec![(
                "total".to_string(),
                Value::tuple(vec![Value::str("sales"), Value::str("sum")]),
            )],
        );
        let Value::Frame(out) = call_method(&by_region(), "agg", &args).unwrap() else {
            panic!("expected frame")
        };
        assert_eq!(out.column_names(), vec!["total"]);
        assert_eq!(out.height(), 3);
    }

    #[test]
    fn test_partitions_skip_null_keys() {
        let parts = partitions(&by_region()).unwrap();
        let keys: Vec<String> = parts.iter().map(|(k, _)| k.to_display()).collect();
        assert_eq!(keys, vec!["East", "North", "West"]);
        assert_eq!(parts[2].1.height(), 2);
    }

    #[test]
    fn test_mean_rejects_text_selection() {
        let Value::GroupBy(g) = subscript(&by_region(), &Value::str("product")).unwrap() else {
            panic!("expected groupby")
        };
        let err = call_method(&g, "mean", &Args::default()).unwrap_err();
        assert_eq!(err.fault, crate::script::error::Fault::Type);
    }
}
