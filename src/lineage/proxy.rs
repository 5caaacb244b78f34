//! Tracked Proxy
//!
//! Wraps the dataset bound into a script namespace and records every column the
//! script references through it. The proxy does not evaluate anything itself: the
//! interpreter reports accesses and routes column-accepting calls through
//! [`TrackedProxy::intercept`], which observes the arguments before delegating.

use super::rules::LineageRules;
use crate::dataset::Dataset;
use crate::frame::FrameValue;
use crate::script::error::ScriptResult;
use crate::script::value::{Args, Value};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Columns observed during one execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnAccessLog {
    columns: BTreeSet<String>,
}

impl ColumnAccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &str) {
        if !self.columns.contains(name) {
            self.columns.insert(name.to_string());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Sorted column names
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().cloned().collect()
    }

    pub fn into_set(self) -> BTreeSet<String> {
        self.columns
    }
}

/// Dataset wrapper with an instance-scoped access log
#[derive(Debug)]
pub struct TrackedProxy {
    frame: FrameValue,
    columns: HashSet<String>,
    rules: LineageRules,
    log: ColumnAccessLog,
}

impl TrackedProxy {
    pub fn new(dataset: &Dataset, rules: LineageRules) -> Self {
        let mut frame = FrameValue::new(dataset.frame().clone());
        frame.tracked = true;
        let columns = dataset.column_names().into_iter().collect();
        Self {
            frame,
            columns,
            rules,
            log: ColumnAccessLog::new(),
        }
    }

    /// The tracked frame bound into the namespace
    pub fn value(&self) -> Value {
        Value::Frame(self.frame.clone())
    }

    pub fn rules(&self) -> &LineageRules {
        &self.rules
    }

    fn record(&mut self, name: &str) {
        if self.columns.contains(name) && !self.log.contains(name) {
            debug!(column = name, "column access observed");
            self.log.record(name);
        }
    }

    /// Record names carried by a string, a sequence of strings or a mapping's keys
    fn record_names(&mut self, value: &Value) {
        match value {
            Value::Str(name) => self.record(name),
            Value::List(_) | Value::Tuple(_) => {
                for item in value.iter_values().unwrap_or_default() {
                    if let Value::Str(name) = item {
                        self.record(&name);
                    }
                }
            }
            Value::Dict(d) => {
                let keys: Vec<Value> = d.borrow().keys().cloned().collect();
                for key in keys {
                    if let Value::Str(name) = key {
                        self.record(&name);
                    }
                }
            }
            _ => {}
        }
    }

    /// `target[key]` on a tracked value
    pub fn observe_access(&mut self, key: &Value) {
        match key {
            Value::Str(_) | Value::List(_) | Value::Tuple(_) => self.record_names(key),
            _ => {}
        }
    }

    /// `target.name` resolved to a column
    pub fn observe_attribute(&mut self, name: &str) {
        self.record(name);
    }

    /// Arguments of a call to a column-accepting operation
    pub fn observe_call(&mut self, method: &str, args: &Args) {
        if !self.rules.tracks_operation(method) {
            return;
        }
        for value in &args.positional {
            self.record_names(value);
        }
        let named_aggregations = self.rules.takes_named_aggregations(method);
        for (keyword, value) in &args.keywords {
            if self.rules.is_column_keyword(keyword) {
                self.record_names(value);
            } else if named_aggregations {
                if let Value::Tuple(_) | Value::List(_) = value {
                    if let Some(Value::Str(name)) = value.iter_values().unwrap_or_default().first() {
                        self.record(name);
                    }
                }
            }
        }
    }

    /// Observe a method call on `target`, then run it. Output derived from a tracked
    /// value stays tracked so chained accesses keep being observed.
    pub fn intercept<F>(&mut self, target: &Value, method: &str, args: &Args, delegate: F) -> ScriptResult<Value>
    where
        F: FnOnce() -> ScriptResult<Value>,
    {
        let tracked = target.is_tracked();
        if tracked {
            self.observe_call(method, args);
        }
        let output = delegate()?;
        Ok(if tracked { output.into_tracked() } else { output })
    }

    pub fn log(&self) -> &ColumnAccessLog {
        &self.log
    }

    pub fn into_log(self) -> ColumnAccessLog {
        self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn proxy() -> TrackedProxy {
        let df = df!(
            "date" => &["2024-01-01"],
            "region" => &["East"],
            "sales" => &[1i64]
        )
        .unwrap();
        TrackedProxy::new(&Dataset::new(df), LineageRules::default())
    }

    #[test]
    fn test_only_existing_columns_are_recorded() {
        let mut p = proxy();
        p.observe_access(&Value::str("sales"));
        p.observe_access(&Value::str("profit"));
        assert_eq!(p.log().names(), vec!["sales"]);
    }

    #[test]
    fn test_keyword_and_positional_names() {
        let mut p = proxy();
        let args = Args::new(
            vec![Value::list(vec![Value::str("region"), Value::str("date")])],
            vec![("ascending".to_string(), Value::str("sales"))],
        );
        p.observe_call("sort_values", &args);
        assert_eq!(p.log().names(), vec!["date", "region"]);
    }

    #[test]
    fn test_agg_mapping_and_named_aggregations() {
        let mut p = proxy();
        let spec = Value::from_json(&serde_json::json!({"sales": "sum"}));
        p.observe_call("agg", &Args::positional(vec![spec]));
        assert_eq!(p.log().names(), vec!["sales"]);

        let mut p = proxy();
        let named = Value::tuple(vec![Value::str("date"), Value::str("max")]);
        p.observe_call("aggregate", &Args::new(vec![], vec![("latest".to_string(), named)]));
        assert_eq!(p.log().names(), vec!["date"]);
    }

    #[test]
    fn test_untracked_operations_are_ignored() {
        let mut p = proxy();
        p.observe_call("head", &Args::positional(vec![Value::str("sales")]));
        assert!(p.log().is_empty());
    }

    #[test]
    fn test_intercept_keeps_output_tracked() {
        let mut p = proxy();
        let target = p.value();
        let args = Args::new(vec![], vec![("by".to_string(), Value::str("region"))]);
        let out = p
            .intercept(&target, "groupby", &args, || Ok(Value::Frame(FrameValue::new(DataFrame::empty()))))
            .unwrap();
        assert!(out.is_tracked());
        assert!(p.log().contains("region"));
    }

    #[test]
    fn test_log_is_idempotent() {
        let mut p = proxy();
        p.observe_attribute("sales");
        p.observe_attribute("sales");
        assert_eq!(p.log().len(), 1);
    }
}
