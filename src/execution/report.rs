//! Execution Report
//!
//! Presentation summary of one execution for a caller that shows it to a user.

use super::error_classifier::ErrorInfo;
use super::result::{ExecutionResult, ValueKind};
use crate::plot::Visualization;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    #[serde(rename = "type")]
    pub kind: ValueKind,
    pub display: Option<String>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub query: Option<String>,
    pub code: String,
    pub success: bool,
    pub columns_used: Vec<String>,
    /// RFC 3339
    pub timestamp: String,
    pub result: ResultSummary,
    pub output: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub visualizations: Vec<Visualization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub execution_id: String,
    pub elapsed_ms: u64,
}

impl ExecutionReport {
    pub fn new(query: Option<&str>, code: &str, result: &ExecutionResult) -> Self {
        let summary = ResultSummary {
            kind: result.result_type(),
            display: result.result_display().map(|s| s.to_string()),
            data: result.result_value().value().cloned().unwrap_or(serde_json::Value::Null),
        };
        Self {
            query: query.map(|q| q.to_string()),
            code: code.to_string(),
            success: result.success(),
            columns_used: result.columns_used().to_vec(),
            timestamp: Utc::now().to_rfc3339(),
            result: summary,
            output: result.output().to_string(),
            visualizations: result.visualizations().to_vec(),
            error: result.error().cloned(),
            execution_id: result.execution_id().to_string(),
            elapsed_ms: result.elapsed_ms(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::error_classifier::ErrorKind;
    use crate::execution::result::ResolvedValue;
    use crate::lineage::LineageSource;

    #[test]
    fn test_report_of_failed_run() {
        let error = ErrorInfo {
            kind: ErrorKind::RuntimeFailure,
            message: ErrorKind::RuntimeFailure.user_message().to_string(),
            detail: "KeyError: 'profit'".to_string(),
            line: Some(1),
        };
        let result = ExecutionResult::aborted("exec-1".to_string(), error, 3);
        let report = ExecutionReport::new(Some("total profit"), "result = df['profit']", &result);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["result"]["type"], "absent");
        assert_eq!(json["error"]["kind"], "RuntimeFailure");
        assert!(json.get("visualizations").is_none());
        assert!(chrono::DateTime::parse_from_rfc3339(&report.timestamp).is_ok());
        assert_eq!(result.lineage_source(), LineageSource::None);
        assert_eq!(result.result_value(), &ResolvedValue::Absent);
    }
}
