pub mod config;
pub mod dataset;
pub mod error;
pub mod execution;
pub mod frame;
pub mod lineage;
pub mod plot;
pub mod script;

pub use config::{ExecutionLimits, LineagePolicy, SandboxConfig};
pub use dataset::Dataset;
pub use error::{Result, SandboxError};
pub use execution::{
    AsyncSandbox, ErrorInfo, ErrorKind, ExecutionReport, ExecutionRequest, ExecutionResult,
    ExecutionSandbox, HistoryEntry, ResolvedValue, ValueKind,
};
pub use lineage::{LineageRules, LineageSource, StaticLineageExtractor, TrackedProxy};
pub use plot::Visualization;
