//! Async front door
//!
//! Executions are CPU-bound and synchronous, so they run on tokio's blocking pool.

use super::error_classifier::{ErrorInfo, ErrorKind};
use super::history::HistoryEntry;
use super::result::{ExecutionRequest, ExecutionResult};
use super::sandbox::ExecutionSandbox;
use crate::config::SandboxConfig;
use crate::dataset::Dataset;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

#[derive(Clone)]
pub struct AsyncSandbox {
    inner: Arc<ExecutionSandbox>,
}

impl AsyncSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            inner: Arc::new(ExecutionSandbox::new(config)),
        }
    }

    pub fn from_sandbox(sandbox: ExecutionSandbox) -> Self {
        Self {
            inner: Arc::new(sandbox),
        }
    }

    pub async fn execute(&self, source_code: impl Into<String>, dataset: Arc<Dataset>) -> ExecutionResult {
        self.execute_request(ExecutionRequest::new(source_code), dataset).await
    }

    pub async fn execute_request(&self, request: ExecutionRequest, dataset: Arc<Dataset>) -> ExecutionResult {
        let sandbox = Arc::clone(&self.inner);
        let task = tokio::task::spawn_blocking(move || sandbox.execute_request(&request, &dataset));
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Execution task failed: {}", e);
                let kind = ErrorKind::RuntimeFailure;
                let info = ErrorInfo {
                    kind,
                    message: kind.user_message().to_string(),
                    detail: format!("InternalError: execution task failed: {}", e),
                    line: None,
                };
                ExecutionResult::aborted(Uuid::new_v4().to_string(), info, 0)
            }
        }
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.history()
    }

    pub fn sandbox(&self) -> &ExecutionSandbox {
        &self.inner
    }
}

impl Default for AsyncSandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}
