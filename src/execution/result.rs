//! Execution outcome types

use super::error_classifier::{ErrorInfo, ErrorKind};
use crate::lineage::LineageSource;
use crate::plot::Visualization;
use serde::{Deserialize, Serialize};

/// The designated output of a run. `Absent` means no result variable was bound,
/// which is not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ResolvedValue {
    Absent,
    Present(serde_json::Value),
}

impl ResolvedValue {
    pub fn is_present(&self) -> bool {
        matches!(self, ResolvedValue::Present(_))
    }

    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            ResolvedValue::Present(v) => Some(v),
            ResolvedValue::Absent => None,
        }
    }
}

/// Shape of the resolved value, for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    DataFrame,
    Series,
    List,
    Dict,
    Scalar,
    None,
    #[default]
    Absent,
}

/// Script plus optional values pre-bound in the namespace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub source_code: String,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl ExecutionRequest {
    pub fn new(source_code: impl Into<String>) -> Self {
        Self {
            source_code: source_code.into(),
            context: serde_json::Map::new(),
        }
    }

    pub fn with_context(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(name.into(), value);
        self
    }
}

/// Outcome of one execution. Built once by the sandbox and read through accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub(crate) success: bool,
    pub(crate) result_value: ResolvedValue,
    #[serde(default)]
    pub(crate) result_type: ValueKind,
    /// Name the result was found under
    #[serde(default)]
    pub(crate) result_name: Option<String>,
    #[serde(skip)]
    pub(crate) result_display: Option<String>,
    pub(crate) columns_used: Vec<String>,
    pub(crate) visualizations: Vec<Visualization>,
    pub(crate) error: Option<ErrorInfo>,
    pub(crate) output: String,
    pub(crate) lineage_source: LineageSource,
    pub(crate) execution_id: String,
    pub(crate) elapsed_ms: u64,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.success
    }

    pub fn result_value(&self) -> &ResolvedValue {
        &self.result_value
    }

    pub fn result_type(&self) -> ValueKind {
        self.result_type
    }

    pub fn result_name(&self) -> Option<&str> {
        self.result_name.as_deref()
    }

    /// Human-readable rendering of the result, when one was resolved
    pub fn result_display(&self) -> Option<&str> {
        self.result_display.as_deref()
    }

    /// Sorted, unique dataset columns the script consulted
    pub fn columns_used(&self) -> &[String] {
        &self.columns_used
    }

    pub fn visualizations(&self) -> &[Visualization] {
        &self.visualizations
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Captured `print` output
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn lineage_source(&self) -> LineageSource {
        self.lineage_source
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Result for a run that never reached the sandbox's own bookkeeping
    pub(crate) fn aborted(execution_id: String, error: ErrorInfo, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            result_value: ResolvedValue::Absent,
            result_type: ValueKind::Absent,
            result_name: None,
            result_display: None,
            columns_used: Vec::new(),
            visualizations: Vec::new(),
            error: Some(error),
            output: String::new(),
            lineage_source: LineageSource::None,
            execution_id,
            elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_value_wire_format() {
        let absent = serde_json::to_value(ResolvedValue::Absent).unwrap();
        assert_eq!(absent, serde_json::json!({"status": "absent"}));
        let present = serde_json::to_value(ResolvedValue::Present(serde_json::Value::Null)).unwrap();
        assert_eq!(present, serde_json::json!({"status": "present", "value": null}));
    }

    #[test]
    fn test_request_context_defaults_to_empty() {
        let request: ExecutionRequest =
            serde_json::from_str(r#"{"source_code": "result = 1"}"#).unwrap();
        assert!(request.context.is_empty());
        let request = request.with_context("threshold", serde_json::json!(10));
        assert_eq!(request.context.len(), 1);
    }
}
