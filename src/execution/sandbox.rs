//! Execution Sandbox
//!
//! Orchestrates one execution: validate, build a fresh namespace around a
//! [`TrackedProxy`], interpret the script on a dedicated thread, then resolve the
//! result, capture charts, settle lineage and classify any fault. Nothing a script
//! does escapes as an error; every outcome becomes an [`ExecutionResult`].

use super::error_classifier::{ErrorClassifier, ErrorInfo};
use super::history::{ExecutionHistory, HistoryEntry};
use super::resolver::{Resolution, ResultResolver};
use super::result::{ExecutionRequest, ExecutionResult};
use super::validator::CodeValidator;
use crate::config::{LineagePolicy, SandboxConfig};
use crate::dataset::Dataset;
use crate::lineage::{LineageSource, StaticLineageExtractor, TrackedProxy};
use crate::plot::{RegistryLease, Visualization};
use crate::script::error::{panic_message, Fault, ScriptError};
use crate::script::interpreter::Interpreter;
use crate::script::parser::parse;
use crate::script::value::{ModuleKind, Value};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Interpreter thread stack; deep expression nesting recurses on it
const EXECUTION_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Chart capture may run this far past the execution deadline so that charts
/// drawn before a timeout still come back
const CAPTURE_GRACE: Duration = Duration::from_millis(250);

/// What the execution thread hands back
struct RunOutcome {
    resolution: Resolution,
    observed: BTreeSet<String>,
    visualizations: Vec<Visualization>,
    fault: Option<ScriptError>,
    output: String,
    operations: u64,
}

impl RunOutcome {
    fn failed(fault: ScriptError) -> Self {
        Self {
            resolution: Resolution::absent(),
            observed: BTreeSet::new(),
            visualizations: Vec::new(),
            fault: Some(fault),
            output: String::new(),
            operations: 0,
        }
    }
}

pub struct ExecutionSandbox {
    config: SandboxConfig,
    validator: CodeValidator,
    extractor: StaticLineageExtractor,
    resolver: ResultResolver,
    classifier: ErrorClassifier,
    history: ExecutionHistory,
}

impl ExecutionSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            validator: CodeValidator::new(),
            extractor: StaticLineageExtractor::new(config.lineage_rules.clone()),
            resolver: ResultResolver::from_config(&config),
            classifier: ErrorClassifier::new(),
            history: ExecutionHistory::new(config.history_limit),
            config,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Snapshot of recent executions, oldest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.snapshot()
    }

    pub fn execute(&self, source_code: &str, dataset: &Dataset) -> ExecutionResult {
        self.execute_request(&ExecutionRequest::new(source_code), dataset)
    }

    pub fn execute_request(&self, request: &ExecutionRequest, dataset: &Dataset) -> ExecutionResult {
        let execution_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let source = request.source_code.as_str();
        debug!("Execution {} starting ({} bytes of source)", execution_id, source.len());

        let mut rejection = None;
        let outcome = match self.screen(source) {
            Err(info) => {
                warn!("Execution {} rejected by validator: {}", execution_id, info.detail);
                rejection = Some(info);
                RunOutcome::failed(ScriptError::new(Fault::Syntax, "rejected by validator"))
            }
            Ok(()) => self.run_isolated(source, dataset, &request.context),
        };

        let (columns_used, lineage_source) = self.settle_lineage(source, dataset, outcome.observed);
        let error = match rejection {
            Some(info) => Some(info),
            None => outcome.fault.as_ref().map(|fault| self.classifier.classify(fault)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = ExecutionResult {
            success: error.is_none(),
            result_value: outcome.resolution.value,
            result_type: outcome.resolution.kind,
            result_name: outcome.resolution.name,
            result_display: outcome.resolution.display,
            columns_used,
            visualizations: outcome.visualizations,
            error,
            output: outcome.output,
            lineage_source,
            execution_id,
            elapsed_ms,
        };

        match result.error() {
            None => info!(
                "Execution {} succeeded in {} ms: {} columns, {} charts, {} operations",
                result.execution_id(),
                elapsed_ms,
                result.columns_used().len(),
                result.visualizations().len(),
                outcome.operations
            ),
            Some(err) => info!(
                "Execution {} failed in {} ms: {}",
                result.execution_id(),
                elapsed_ms,
                err
            ),
        }
        self.history.record(HistoryEntry::from_result(&result));
        result
    }

    fn screen(&self, source: &str) -> Result<(), ErrorInfo> {
        if !self.config.validate_source {
            return Ok(());
        }
        self.validator
            .validate(source)
            .map_err(|rejection| self.classifier.classify_rejection(&rejection))
    }

    /// Run on a dedicated thread. The interpreter catches its own panics; one
    /// escaping outside it becomes an internal fault with nothing preserved.
    fn run_isolated(
        &self,
        source: &str,
        dataset: &Dataset,
        context: &serde_json::Map<String, serde_json::Value>,
    ) -> RunOutcome {
        std::thread::scope(|scope| {
            let spawned = std::thread::Builder::new()
                .name("sandbox-exec".to_string())
                .stack_size(EXECUTION_STACK_SIZE)
                .spawn_scoped(scope, || self.run(source, dataset, context));
            match spawned {
                Ok(handle) => handle.join().unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    warn!("Execution thread panicked: {}", message);
                    RunOutcome::failed(ScriptError::new(
                        Fault::Internal,
                        format!("internal error: {}", message),
                    ))
                }),
                Err(e) => RunOutcome::failed(ScriptError::new(
                    Fault::Internal,
                    format!("could not start execution thread: {}", e),
                )),
            }
        })
    }

    fn run(
        &self,
        source: &str,
        dataset: &Dataset,
        context: &serde_json::Map<String, serde_json::Value>,
    ) -> RunOutcome {
        let limits = &self.config.limits;
        let deadline = Instant::now() + limits.timeout;
        let lease = RegistryLease::acquire(limits.max_figures);
        let mut proxy = TrackedProxy::new(dataset, self.config.lineage_rules.clone());

        let (resolution, fault, output, operations) = match parse(source) {
            Err(fault) => (Resolution::absent(), Some(fault), String::new(), 0),
            Ok(program) => {
                let frame = proxy.value();
                let mut interpreter = Interpreter::new(&mut proxy, &lease, limits);
                for (name, value) in context {
                    interpreter.bind(name, Value::from_json(value));
                }
                interpreter.bind("pd", Value::Module(ModuleKind::Pandas));
                interpreter.bind("np", Value::Module(ModuleKind::Numpy));
                interpreter.bind("plt", Value::Module(ModuleKind::Pyplot));
                interpreter.bind(&self.config.dataset_ident, frame);

                let fault = interpreter.run(&program).err();
                let resolution = self.resolver.resolve(interpreter.globals());
                (
                    resolution,
                    fault,
                    interpreter.output().to_string(),
                    interpreter.operations(),
                )
            }
        };

        let visualizations = lease.capture(deadline.max(Instant::now() + CAPTURE_GRACE));
        debug!("Captured {} visualizations", visualizations.len());
        drop(lease);

        RunOutcome {
            resolution,
            observed: proxy.into_log().into_set(),
            visualizations,
            fault,
            output,
            operations,
        }
    }

    /// Combine proxy observations with static candidates according to the policy.
    /// Static candidates are always narrowed to real dataset columns.
    fn settle_lineage(
        &self,
        source: &str,
        dataset: &Dataset,
        observed: BTreeSet<String>,
    ) -> (Vec<String>, LineageSource) {
        let static_columns = || -> BTreeSet<String> {
            self.extractor
                .extract_candidates(source)
                .into_iter()
                .filter(|c| dataset.has_column(c))
                .collect()
        };

        let (columns, lineage_source) = match self.config.lineage_policy {
            LineagePolicy::PreferDynamic if !observed.is_empty() => (observed, LineageSource::Dynamic),
            LineagePolicy::PreferDynamic => {
                let fallback = static_columns();
                debug!("Proxy observed no columns; static fallback found {}", fallback.len());
                let source = if fallback.is_empty() {
                    LineageSource::None
                } else {
                    LineageSource::Static
                };
                (fallback, source)
            }
            LineagePolicy::Union => {
                let fallback = static_columns();
                let source = match (observed.is_empty(), fallback.is_empty()) {
                    (true, true) => LineageSource::None,
                    (false, true) => LineageSource::Dynamic,
                    (true, false) => LineageSource::Static,
                    (false, false) => LineageSource::Union,
                };
                (observed.union(&fallback).cloned().collect(), source)
            }
        };
        (columns.into_iter().collect(), lineage_source)
    }
}

impl Default for ExecutionSandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::error_classifier::ErrorKind;
    use crate::execution::result::{ResolvedValue, ValueKind};
    use polars::prelude::*;

    fn dataset() -> Dataset {
        Dataset::new(
            df!(
                "date" => &["2024-01-01", "2024-01-02", "2024-01-03"],
                "region" => &["East", "West", "East"],
                "sales" => &[100i64, 200, 300]
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_direct_read_records_one_column() {
        let sandbox = ExecutionSandbox::default();
        let result = sandbox.execute("result = df['sales'].sum()", &dataset());
        assert!(result.success());
        assert_eq!(result.columns_used(), &["sales".to_string()]);
        assert_eq!(result.lineage_source(), LineageSource::Dynamic);
        assert_eq!(result.result_value(), &ResolvedValue::Present(serde_json::json!(600)));
        assert_eq!(result.result_type(), ValueKind::Scalar);
    }

    #[test]
    fn test_validator_rejection_is_compile_failure() {
        let sandbox = ExecutionSandbox::default();
        let result = sandbox.execute("import os\nresult = df['sales']", &dataset());
        assert!(!result.success());
        assert_eq!(result.error_kind(), Some(ErrorKind::CompileFailure));
        assert_eq!(result.error().and_then(|e| e.line), Some(1));
    }

    #[test]
    fn test_static_fallback_when_nothing_observed() {
        let sandbox = ExecutionSandbox::default();
        // fails before touching the frame, but the source names real columns
        let source = "x = 1 / 0\nresult = df.groupby('region')['sales'].sum()\nother = df['profit']";
        let result = sandbox.execute(source, &dataset());
        assert_eq!(result.lineage_source(), LineageSource::Static);
        assert_eq!(result.columns_used(), &["region".to_string(), "sales".to_string()]);
        assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFailure));
    }

    #[test]
    fn test_union_policy_merges_sources() {
        let config = SandboxConfig {
            lineage_policy: LineagePolicy::Union,
            ..SandboxConfig::default()
        };
        let sandbox = ExecutionSandbox::new(config);
        let source = "result = df['sales'].sum()\nif False:\n    df['region']\n";
        let result = sandbox.execute(source, &dataset());
        assert_eq!(result.lineage_source(), LineageSource::Union);
        assert_eq!(result.columns_used(), &["region".to_string(), "sales".to_string()]);
    }

    #[test]
    fn test_context_and_output() {
        let sandbox = ExecutionSandbox::default();
        let request = ExecutionRequest::new("print('threshold', threshold)\nanswer = threshold * 2")
            .with_context("threshold", serde_json::json!(5));
        let result = sandbox.execute_request(&request, &dataset());
        assert!(result.success());
        assert_eq!(result.output(), "threshold 5\n");
        assert_eq!(result.result_name(), Some("answer"));
        assert_eq!(sandbox.history().len(), 1);
    }
}
