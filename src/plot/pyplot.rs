//! `plt`, figure, axes and `.plot` dispatch

use super::{Artist, FigureRegistry};
use crate::frame::cells::Cell;
use crate::frame::{FrameValue, SeriesValue};
use crate::script::error::{ScriptError, ScriptResult};
use crate::script::value::{name_list, Args, Value};
use tracing::warn;

/// Calls with no visible effect on a rasterized chart
const COSMETIC: &[&str] = &[
    "legend",
    "grid",
    "xticks",
    "yticks",
    "set_xticks",
    "set_yticks",
    "set_xticklabels",
    "set_yticklabels",
    "tick_params",
    "xlim",
    "ylim",
    "set_xlim",
    "set_ylim",
    "axhline",
    "axvline",
    "text",
    "annotate",
    "bar_label",
    "invert_yaxis",
    "set_axis_off",
    "axis",
    "margins",
    "tight_layout",
    "subplots_adjust",
    "autofmt_xdate",
    "set_facecolor",
];

fn numbers(value: &Value) -> ScriptResult<Vec<f64>> {
    let cells = match value {
        Value::Series(s) => s.cells()?,
        other => other
            .iter_values()?
            .iter()
            .map(Cell::from_value)
            .collect::<ScriptResult<_>>()?,
    };
    cells
        .iter()
        .map(|c| match c {
            Cell::Null => Ok(f64::NAN),
            other => other.as_f64().ok_or_else(|| {
                ScriptError::type_error(format!("could not convert '{}' to a number for plotting", other.label()))
            }),
        })
        .collect()
}

fn labels(value: &Value) -> ScriptResult<Vec<String>> {
    Ok(match value {
        Value::Series(s) => s.cells()?.iter().map(|c| c.label()).collect(),
        other => other.iter_values()?.iter().map(|v| v.to_display()).collect(),
    })
}

/// x positions: numeric values as-is, categories by position
fn positions(cells: &[Cell]) -> Vec<f64> {
    if cells.iter().all(|c| c.is_null() || c.is_numeric()) {
        cells.iter().map(|c| c.as_f64().unwrap_or(f64::NAN)).collect()
    } else {
        (0..cells.len()).map(|i| i as f64).collect()
    }
}

fn value_cells(value: &Value) -> ScriptResult<Vec<Cell>> {
    match value {
        Value::Series(s) => s.cells(),
        other => other.iter_values()?.iter().map(Cell::from_value).collect(),
    }
}

fn figsize(args: &Args) -> ScriptResult<Option<(f64, f64)>> {
    match args.kwarg("figsize") {
        None | Some(Value::None) => Ok(None),
        Some(v) => {
            let dims = numbers(v)?;
            match dims.as_slice() {
                [w, h] if *w > 0.0 && *h > 0.0 => Ok(Some((*w, *h))),
                _ => Err(ScriptError::value("figsize must be a (width, height) pair")),
            }
        }
    }
}

fn text_arg(args: &Args, name: &str) -> Option<String> {
    args.get(0, name).map(|v| v.to_display())
}

fn axes_value(figure: usize, index: usize) -> Value {
    Value::Axes { figure, index }
}

/// Artists and labels drawn on one axes
pub fn call_axes(reg: &mut FigureRegistry, figure: usize, index: usize, name: &str, args: &Args) -> ScriptResult<Value> {
    let artist = match name {
        "plot" => {
            let (xs, ys) = match (args.positional.first(), args.positional.get(1)) {
                (Some(x), Some(y)) if !matches!(y, Value::Str(_)) => (positions(&value_cells(x)?), numbers(y)?),
                (Some(Value::Series(s)), _) => (positions(&s.row_labels()), numbers(&Value::Series(s.clone()))?),
                (Some(y), _) => {
                    let ys = numbers(y)?;
                    ((0..ys.len()).map(|i| i as f64).collect(), ys)
                }
                (None, _) => return Err(ScriptError::type_error("plot() requires data")),
            };
            Some(Artist::Line { xs, ys })
        }
        "bar" | "barh" => {
            let x = args.require(0, if name == "bar" { "x" } else { "y" }, name)?;
            let h = args.require(1, if name == "bar" { "height" } else { "width" }, name)?;
            Some(Artist::Bars {
                labels: labels(x)?,
                heights: numbers(h)?,
                horizontal: name == "barh",
            })
        }
        "scatter" => {
            let xs = positions(&value_cells(args.require(0, "x", name)?)?);
            let ys = numbers(args.require(1, "y", name)?)?;
            Some(Artist::Scatter { xs, ys })
        }
        "hist" => Some(Artist::Histogram {
            values: numbers(args.require(0, "x", name)?)?,
            bins: args.int_or(1, "bins", 10)?.clamp(1, 1000) as usize,
        }),
        "pie" => {
            let values = numbers(args.require(0, "x", name)?)?;
            let names = match args.kwarg("labels") {
                Some(l) => labels(l)?,
                None => Vec::new(),
            };
            Some(Artist::Pie {
                values,
                labels: names,
            })
        }
        _ => None,
    };
    if let Some(artist) = artist {
        reg.axes_mut(figure, index)?.artists.push(artist);
        return Ok(Value::None);
    }

    let axes = reg.axes_mut(figure, index)?;
    match name {
        "set_title" | "title" => axes.title = text_arg(args, "label"),
        "set_xlabel" | "xlabel" => axes.xlabel = text_arg(args, "xlabel"),
        "set_ylabel" | "ylabel" => axes.ylabel = text_arg(args, "ylabel"),
        "set" => {
            if let Some(t) = args.kwarg("title") {
                axes.title = Some(t.to_display());
            }
            if let Some(x) = args.kwarg("xlabel") {
                axes.xlabel = Some(x.to_display());
            }
            if let Some(y) = args.kwarg("ylabel") {
                axes.ylabel = Some(y.to_display());
            }
        }
        other if COSMETIC.contains(&other) => {}
        other => {
            return Err(ScriptError::attribute(format!(
                "'Axes' object has no attribute '{}'",
                other
            )))
        }
    }
    Ok(Value::None)
}

pub fn call_figure(reg: &mut FigureRegistry, figure: usize, name: &str, args: &Args) -> ScriptResult<Value> {
    match name {
        "suptitle" => {
            reg.figure_mut(figure)?.title = text_arg(args, "t");
            Ok(Value::None)
        }
        "add_subplot" | "gca" => {
            let index = reg.figure_mut(figure)?.current_axes;
            reg.activate(figure, index)?;
            Ok(axes_value(figure, index))
        }
        "set_size_inches" => {
            let dims = numbers(&Value::list(args.positional.clone()))?;
            if let [w, h] = dims.as_slice() {
                reg.figure_mut(figure)?.size = (*w, *h);
            }
            Ok(Value::None)
        }
        "savefig" => {
            warn!("savefig ignored; figures are captured when the script ends");
            Ok(Value::None)
        }
        "show" => Ok(Value::None),
        other if COSMETIC.contains(&other) => Ok(Value::None),
        other => Err(ScriptError::attribute(format!(
            "'Figure' object has no attribute '{}'",
            other
        ))),
    }
}

fn subplots(reg: &mut FigureRegistry, args: &Args) -> ScriptResult<Value> {
    let rows = args.int_or(0, "nrows", 1)?.clamp(1, 8) as usize;
    let cols = args.int_or(1, "ncols", 1)?.clamp(1, 8) as usize;
    let id = reg.new_figure(figsize(args)?, rows, cols)?;
    let axes = if rows * cols == 1 {
        axes_value(id, 0)
    } else if rows == 1 || cols == 1 {
        Value::list((0..rows * cols).map(|i| axes_value(id, i)).collect())
    } else {
        Value::list(
            (0..rows)
                .map(|r| Value::list((0..cols).map(|c| axes_value(id, r * cols + c)).collect()))
                .collect(),
        )
    };
    Ok(Value::tuple(vec![Value::Figure(id), axes]))
}

pub fn call_pyplot(reg: &mut FigureRegistry, name: &str, args: &Args) -> ScriptResult<Value> {
    match name {
        "figure" => Ok(Value::Figure(reg.new_figure(figsize(args)?, 1, 1)?)),
        "subplots" => subplots(reg, args),
        "subplot" => {
            let rows = args.int_or(0, "nrows", 1)?.clamp(1, 8) as usize;
            let cols = args.int_or(1, "ncols", 1)?.clamp(1, 8) as usize;
            let index = (args.int_or(2, "index", 1)?.max(1) as usize - 1).min(rows * cols - 1);
            let figure = reg.current_figure()?;
            let fig = reg.figure_mut(figure)?;
            if fig.rows * fig.cols != rows * cols {
                let has_artists = fig.axes.iter().any(|a| !a.artists.is_empty());
                if has_artists {
                    let id = reg.new_figure(None, rows, cols)?;
                    reg.activate(id, index)?;
                    return Ok(axes_value(id, index));
                }
                fig.rows = rows;
                fig.cols = cols;
                fig.axes.resize(rows * cols, Default::default());
            }
            reg.activate(figure, index)?;
            Ok(axes_value(figure, index))
        }
        "gca" => {
            let (figure, index) = reg.current_axes()?;
            Ok(axes_value(figure, index))
        }
        "gcf" => Ok(Value::Figure(reg.current_figure()?)),
        "close" => {
            match args.positional.first() {
                Some(Value::Str(s)) if s == "all" => reg.clear_figures(),
                Some(Value::Figure(id)) => reg.close(Some(*id)),
                _ => reg.close(None),
            }
            Ok(Value::None)
        }
        "show" | "ion" | "ioff" | "clf" | "cla" => Ok(Value::None),
        "savefig" => {
            warn!("savefig ignored; figures are captured when the script ends");
            Ok(Value::None)
        }
        "suptitle" => {
            let figure = reg.current_figure()?;
            call_figure(reg, figure, name, args)
        }
        other => {
            let (figure, index) = reg.current_axes()?;
            call_axes(reg, figure, index, other, args).map_err(|e| {
                if e.fault == crate::script::error::Fault::Attribute {
                    ScriptError::attribute(format!(
                        "module 'matplotlib.pyplot' has no attribute '{}'",
                        other
                    ))
                } else {
                    e
                }
            })
        }
    }
}

/// Axes for a `.plot` call: the `ax=` argument, or a fresh figure
fn target_axes(reg: &mut FigureRegistry, args: &Args) -> ScriptResult<(usize, usize)> {
    match args.kwarg("ax") {
        Some(Value::Axes { figure, index }) => {
            reg.activate(*figure, *index)?;
            Ok((*figure, *index))
        }
        _ => {
            let id = reg.new_figure(figsize(args)?, 1, 1)?;
            Ok((id, 0))
        }
    }
}

fn series_artist(series: &SeriesValue, kind: &str) -> ScriptResult<Artist> {
    let values = numbers(&Value::Series(series.clone()))?;
    let row_labels = series.row_labels();
    Ok(match kind {
        "line" | "area" => Artist::Line {
            xs: positions(&row_labels),
            ys: values,
        },
        "bar" | "barh" => Artist::Bars {
            labels: row_labels.iter().map(|c| c.label()).collect(),
            heights: values,
            horizontal: kind == "barh",
        },
        "hist" => Artist::Histogram { values, bins: 10 },
        "pie" => Artist::Pie {
            values,
            labels: row_labels.iter().map(|c| c.label()).collect(),
        },
        other => {
            return Err(ScriptError::value(format!(
                "{} is not a valid plot kind for a Series",
                other
            )))
        }
    })
}

fn frame_artists(frame: &FrameValue, kind: &str, args: &Args) -> ScriptResult<Vec<Artist>> {
    let x = args.kwarg("x").and_then(|v| v.as_str().map(|s| s.to_string()));
    let ys: Vec<String> = match args.kwarg("y") {
        Some(y) => name_list(y).ok_or_else(|| ScriptError::type_error("y must be a column name or list of names"))?,
        None => {
            let mut numeric = Vec::new();
            for name in frame.column_names() {
                if Some(&name) == x.as_ref() {
                    continue;
                }
                let cells = frame.column(&name)?.cells()?;
                if cells.iter().all(|c| c.is_null() || c.is_numeric()) {
                    numeric.push(name);
                }
            }
            numeric
        }
    };
    let x_cells = match &x {
        Some(name) => frame.column(name)?.cells()?,
        None => frame.row_labels()?,
    };

    let mut artists = Vec::new();
    if kind == "scatter" {
        let y = ys
            .first()
            .ok_or_else(|| ScriptError::value("scatter plot requires x and y"))?;
        artists.push(Artist::Scatter {
            xs: positions(&x_cells),
            ys: numbers(&Value::Series(frame.column(y)?))?,
        });
        return Ok(artists);
    }
    for y in &ys {
        let values = numbers(&Value::Series(frame.column(y)?))?;
        artists.push(match kind {
            "line" | "area" => Artist::Line {
                xs: positions(&x_cells),
                ys: values,
            },
            "bar" | "barh" => Artist::Bars {
                labels: x_cells.iter().map(|c| c.label()).collect(),
                heights: values,
                horizontal: kind == "barh",
            },
            "hist" => Artist::Histogram { values, bins: 10 },
            "pie" => Artist::Pie {
                values,
                labels: x_cells.iter().map(|c| c.label()).collect(),
            },
            other => {
                return Err(ScriptError::value(format!(
                    "{} is not a valid plot kind",
                    other
                )))
            }
        });
    }
    Ok(artists)
}

/// `df.plot(kind=...)`, `series.plot.bar()` and friends
pub fn plot_accessor(reg: &mut FigureRegistry, target: &Value, kind: Option<&str>, args: &Args) -> ScriptResult<Value> {
    let kind = match kind {
        Some(k) => k.to_string(),
        None => args.str_arg(99, "kind").unwrap_or_else(|| "line".to_string()),
    };
    let artists = match target {
        Value::Series(s) => vec![series_artist(s, &kind)?],
        Value::Frame(f) => frame_artists(f, &kind, args)?,
        other => {
            return Err(ScriptError::attribute(format!(
                "'{}' object has no attribute 'plot'",
                other.type_name()
            )))
        }
    };
    let (figure, index) = target_axes(reg, args)?;
    let axes = reg.axes_mut(figure, index)?;
    axes.artists.extend(artists);
    if let Some(title) = args.kwarg("title") {
        axes.title = Some(title.to_display());
    }
    if let Some(label) = args.kwarg("xlabel") {
        axes.xlabel = Some(label.to_display());
    }
    if let Some(label) = args.kwarg("ylabel") {
        axes.ylabel = Some(label.to_display());
    }
    Ok(axes_value(figure, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn test_pyplot_draws_on_current_figure() {
        let mut reg = FigureRegistry::default();
        call_pyplot(&mut reg, "figure", &Args::default()).unwrap();
        let args = Args::positional(vec![
            Value::list(vec![Value::str("East"), Value::str("West")]),
            Value::list(vec![Value::Int(3), Value::Int(5)]),
        ]);
        call_pyplot(&mut reg, "bar", &args).unwrap();
        call_pyplot(&mut reg, "title", &Args::positional(vec![Value::str("Sales")])).unwrap();
        assert_eq!(reg.len(), 1);
        let fig = &reg.figures()[0];
        assert_eq!(fig.axes[0].artists.len(), 1);
        assert_eq!(fig.display_title().as_deref(), Some("Sales"));
    }

    #[test]
    fn test_subplots_grid() {
        let mut reg = FigureRegistry::default();
        let args = Args::positional(vec![Value::Int(2), Value::Int(2)]);
        let out = call_pyplot(&mut reg, "subplots", &args).unwrap();
        let Value::Tuple(parts) = out else { panic!("expected tuple") };
        let rows = parts[1].iter_values().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].iter_values().unwrap().len(), 2);
    }

    #[test]
    fn test_frame_plot_creates_new_figure_each_call() {
        let mut reg = FigureRegistry::default();
        let frame = FrameValue::new(df!("region" => &["East", "West"], "sales" => &[1i64, 2]).unwrap());
        let args = Args::new(
            vec![],
            vec![
                ("x".to_string(), Value::str("region")),
                ("y".to_string(), Value::str("sales")),
            ],
        );
        plot_accessor(&mut reg, &Value::Frame(frame.clone()), Some("bar"), &args).unwrap();
        plot_accessor(&mut reg, &Value::Frame(frame), None, &args).unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_unknown_pyplot_function() {
        let mut reg = FigureRegistry::default();
        let err = call_pyplot(&mut reg, "teleport", &Args::default()).unwrap_err();
        assert!(err.message.contains("matplotlib.pyplot"));
    }
}
