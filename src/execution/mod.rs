//! Sandboxed execution
//!
//! The orchestrator and the components it calls after a run: result resolution,
//! error classification, pre-execution validation, reporting and history.

pub mod async_sandbox;
pub mod error_classifier;
pub mod history;
pub mod report;
pub mod resolver;
pub mod result;
pub mod sandbox;
pub mod validator;

pub use async_sandbox::AsyncSandbox;
pub use error_classifier::{ErrorClassifier, ErrorInfo, ErrorKind};
pub use history::{ExecutionHistory, HistoryEntry};
pub use report::ExecutionReport;
pub use resolver::{Resolution, ResultResolver};
pub use result::{ExecutionRequest, ExecutionResult, ResolvedValue, ValueKind};
pub use sandbox::ExecutionSandbox;
pub use validator::{CodeValidator, Rejection};
