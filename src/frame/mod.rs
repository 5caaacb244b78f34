//! Frame capability set
//!
//! The pandas-like surface scripts see, backed by polars. A frame may promote one
//! of its columns to an index (after `set_index` or a grouping); the index column
//! stays in the polars frame but is hidden from `columns`.

pub mod cells;
pub mod column;
pub mod grouped;
pub mod indexer;
pub mod pandas;
pub mod table;

use crate::script::error::{ScriptError, ScriptResult};
use crate::script::value::Value;
use cells::{series_cells, Cell};
use polars::prelude::*;
use std::rc::Rc;

const DISPLAY_ROWS: usize = 20;

/// Row labels of a series or frame
#[derive(Debug, Clone)]
pub struct Labels {
    pub name: Option<String>,
    pub values: Vec<Cell>,
}

#[derive(Debug, Clone)]
pub struct FrameValue {
    pub data: DataFrame,
    /// Column acting as the row index
    pub index: Option<String>,
    /// Derived from the bound dataset
    pub tracked: bool,
}

impl FrameValue {
    pub fn new(data: DataFrame) -> Self {
        Self {
            data,
            index: None,
            tracked: false,
        }
    }

    pub fn with_index(data: DataFrame, index: Option<String>) -> Self {
        Self {
            data,
            index,
            tracked: false,
        }
    }

    /// Wrap a new frame computed from this one
    pub fn derived(&self, data: DataFrame) -> Self {
        let index = self
            .index
            .clone()
            .filter(|name| data.get_column_names().contains(&name.as_str()));
        Self {
            data,
            index,
            tracked: self.tracked,
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.data
            .get_column_names()
            .iter()
            .filter(|name| Some(**name) != self.index.as_deref())
            .map(|name| name.to_string())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.data.get_column_names().contains(&name)
    }

    pub fn height(&self) -> usize {
        self.data.height()
    }

    pub fn cell_count(&self) -> usize {
        self.data.height() * self.data.width()
    }

    pub fn series(&self, name: &str) -> ScriptResult<&Series> {
        self.data
            .column(name)
            .map_err(|_| ScriptError::key(format!("'{}'", name)))
    }

    /// Column as a script series, labelled by this frame's index
    pub fn column(&self, name: &str) -> ScriptResult<SeriesValue> {
        let data = self.series(name)?.clone();
        Ok(SeriesValue {
            data,
            labels: self.labels()?.map(Rc::new),
            tracked: self.tracked,
        })
    }

    pub fn labels(&self) -> ScriptResult<Option<Labels>> {
        match &self.index {
            Some(name) => Ok(Some(Labels {
                name: Some(name.clone()),
                values: series_cells(self.series(name)?)?,
            })),
            None => Ok(None),
        }
    }

    /// Row labels, falling back to positions
    pub fn row_labels(&self) -> ScriptResult<Vec<Cell>> {
        Ok(match self.labels()? {
            Some(labels) => labels.values,
            None => (0..self.height()).map(|i| Cell::Int(i as i64)).collect(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SeriesValue {
    pub data: Series,
    pub labels: Option<Rc<Labels>>,
    pub tracked: bool,
}

impl SeriesValue {
    pub fn new(data: Series) -> Self {
        Self {
            data,
            labels: None,
            tracked: false,
        }
    }

    pub fn from_cells(name: &str, cells: &[Cell], labels: Option<Labels>) -> Self {
        Self {
            data: cells::cells_to_series(name, cells),
            labels: labels.map(Rc::new),
            tracked: false,
        }
    }

    /// Same labels and tracking, new data of equal length
    pub fn derived(&self, data: Series) -> Self {
        let labels = self
            .labels
            .clone()
            .filter(|labels| labels.values.len() == data.len());
        Self {
            data,
            labels,
            tracked: self.tracked,
        }
    }

    pub fn derived_cells(&self, cells: &[Cell]) -> Self {
        self.derived(cells::cells_to_series(self.name(), cells))
    }

    pub fn name(&self) -> &str {
        self.data.name()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn cells(&self) -> ScriptResult<Vec<Cell>> {
        series_cells(&self.data)
    }

    pub fn values(&self) -> ScriptResult<Vec<Value>> {
        Ok(self.cells()?.iter().map(|c| c.to_value()).collect())
    }

    pub fn row_labels(&self) -> Vec<Cell> {
        match &self.labels {
            Some(labels) => labels.values.clone(),
            None => (0..self.len()).map(|i| Cell::Int(i as i64)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct GroupByValue {
    pub frame: FrameValue,
    pub keys: Vec<String>,
    pub selection: Option<Selection>,
    pub as_index: bool,
    pub tracked: bool,
}

/// Frame as a list of records, index column included
pub fn frame_to_json(frame: &FrameValue) -> serde_json::Value {
    let names: Vec<String> = frame
        .data
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let columns: Vec<Vec<Cell>> = frame
        .data
        .get_columns()
        .iter()
        .map(|s| series_cells(s).unwrap_or_default())
        .collect();

    let records = (0..frame.height())
        .map(|row| {
            let mut record = serde_json::Map::new();
            for (name, cells) in names.iter().zip(columns.iter()) {
                let value = cells.get(row).map(|c| c.to_json()).unwrap_or_default();
                record.insert(name.clone(), value);
            }
            serde_json::Value::Object(record)
        })
        .collect();
    serde_json::Value::Array(records)
}

/// Labelled series become `{label: value}`, unlabelled ones a plain array
pub fn series_to_json(series: &SeriesValue) -> serde_json::Value {
    let cells = series.cells().unwrap_or_default();
    match &series.labels {
        Some(labels) => {
            let mut map = serde_json::Map::new();
            for (label, cell) in labels.values.iter().zip(cells.iter()) {
                map.insert(label.label(), cell.to_json());
            }
            serde_json::Value::Object(map)
        }
        None => serde_json::Value::Array(cells.iter().map(|c| c.to_json()).collect()),
    }
}

fn display_rows(height: usize) -> Vec<Option<usize>> {
    if height <= DISPLAY_ROWS {
        (0..height).map(Some).collect()
    } else {
        let half = DISPLAY_ROWS / 2;
        (0..half)
            .map(Some)
            .chain(std::iter::once(None))
            .chain((height - half..height).map(Some))
            .collect()
    }
}

fn cell_text(cell: &Cell) -> String {
    match cell {
        Cell::Float(f) => {
            let text = format!("{:.6}", f);
            let text = text.trim_end_matches('0');
            if text.ends_with('.') {
                format!("{}0", text)
            } else {
                text.to_string()
            }
        }
        other => other.label(),
    }
}

/// Plain-text table in the layout script authors know from `print(df)`
pub fn render_frame(frame: &FrameValue) -> String {
    let names = frame.column_names();
    if names.is_empty() && frame.height() == 0 {
        return "Empty DataFrame".to_string();
    }
    let labels = frame.row_labels().unwrap_or_default();
    let columns: Vec<Vec<Cell>> = names
        .iter()
        .map(|n| {
            frame
                .series(n)
                .and_then(series_cells)
                .unwrap_or_default()
        })
        .collect();

    let rows = display_rows(frame.height());
    let mut grid: Vec<Vec<String>> = Vec::new();
    let mut header = vec![frame.index.clone().unwrap_or_default()];
    header.extend(names.iter().cloned());
    grid.push(header);
    for row in &rows {
        let mut line = Vec::new();
        match row {
            Some(r) => {
                line.push(labels.get(*r).map(|c| c.label()).unwrap_or_default());
                for cells in &columns {
                    line.push(cells.get(*r).map(cell_text).unwrap_or_default());
                }
            }
            None => {
                line.push("..".to_string());
                line.extend(columns.iter().map(|_| "...".to_string()));
            }
        }
        grid.push(line);
    }

    let widths: Vec<usize> = (0..grid[0].len())
        .map(|c| grid.iter().map(|r| r[c].chars().count()).max().unwrap_or(0))
        .collect();
    let mut out = grid
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(c, text)| {
                    if c == 0 {
                        format!("{:<width$}", text, width = widths[c])
                    } else {
                        format!("{:>width$}", text, width = widths[c])
                    }
                })
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n");
    if frame.height() > DISPLAY_ROWS {
        out.push_str(&format!("\n\n[{} rows x {} columns]", frame.height(), names.len()));
    }
    out
}

pub fn render_series(series: &SeriesValue) -> String {
    let cells = series.cells().unwrap_or_default();
    let labels = series.row_labels();
    let rows = display_rows(series.len());
    let label_width = rows
        .iter()
        .flatten()
        .map(|r| labels[*r].label().chars().count())
        .max()
        .unwrap_or(0);
    let value_width = rows
        .iter()
        .flatten()
        .map(|r| cell_text(&cells[*r]).chars().count())
        .max()
        .unwrap_or(0);

    let mut lines: Vec<String> = Vec::new();
    if let Some(name) = series.labels.as_ref().and_then(|l| l.name.clone()) {
        lines.push(name);
    }
    for row in rows {
        match row {
            Some(r) => lines.push(format!(
                "{:<lw$}    {:>vw$}",
                labels[r].label(),
                cell_text(&cells[r]),
                lw = label_width,
                vw = value_width
            )),
            None => lines.push("..".to_string()),
        }
    }
    lines.push(format!(
        "Name: {}, dtype: {}",
        series.name(),
        cells::dtype_name(series.data.dtype())
    ));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FrameValue {
        let df = df!(
            "region" => &["East", "West"],
            "sales" => &[100i64, 250]
        )
        .unwrap();
        FrameValue::with_index(df, Some("region".to_string()))
    }

    #[test]
    fn test_index_column_is_hidden() {
        let frame = sample();
        assert_eq!(frame.column_names(), vec!["sales".to_string()]);
        assert!(frame.has_column("region"));
    }

    #[test]
    fn test_indexed_series_serializes_as_mapping() {
        let series = sample().column("sales").unwrap();
        assert_eq!(
            series_to_json(&series),
            serde_json::json!({"East": 100, "West": 250})
        );
    }

    #[test]
    fn test_frame_serializes_as_records() {
        let json = frame_to_json(&sample());
        assert_eq!(json[1]["region"], "West");
        assert_eq!(json[1]["sales"], 250);
    }

    #[test]
    fn test_render_frame_layout() {
        let text = render_frame(&sample());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("region"));
        assert!(lines[2].contains("250"));
    }
}
