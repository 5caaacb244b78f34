//! Execution History
//!
//! Bounded in-memory audit trail of executions. Host-side only; scripts never see it.

use super::error_classifier::ErrorKind;
use super::result::ExecutionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub execution_id: String,
    pub success: bool,
    pub columns_used: Vec<String>,
    pub error_kind: Option<ErrorKind>,
    pub elapsed_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_result(result: &ExecutionResult) -> Self {
        Self {
            execution_id: result.execution_id().to_string(),
            success: result.success(),
            columns_used: result.columns_used().to_vec(),
            error_kind: result.error_kind(),
            elapsed_ms: result.elapsed_ms(),
            recorded_at: Utc::now(),
        }
    }
}

/// Oldest entries are evicted once `limit` is reached
#[derive(Clone)]
pub struct ExecutionHistory {
    entries: Arc<RwLock<VecDeque<HistoryEntry>>>,
    limit: usize,
}

impl ExecutionHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(limit.min(1024)))),
            limit,
        }
    }

    pub fn record(&self, entry: HistoryEntry) {
        if self.limit == 0 {
            return;
        }
        if let Ok(mut entries) = self.entries.write() {
            while entries.len() >= self.limit {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Entries oldest first
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        if let Ok(entries) = self.entries.read() {
            entries.iter().cloned().collect()
        } else {
            Vec::new()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> HistoryEntry {
        HistoryEntry {
            execution_id: id.to_string(),
            success: true,
            columns_used: vec!["sales".to_string()],
            error_kind: None,
            elapsed_ms: 1,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_evicts_oldest() {
        let history = ExecutionHistory::new(2);
        history.record(entry("a"));
        history.record(entry("b"));
        history.record(entry("c"));
        let ids: Vec<String> = history.snapshot().into_iter().map(|e| e.execution_id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_zero_limit_keeps_nothing() {
        let history = ExecutionHistory::new(0);
        history.record(entry("a"));
        assert!(history.is_empty());
    }
}
