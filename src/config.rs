//! Sandbox Configuration
//!
//! Execution ceilings, namespace identifiers and lineage rules.
//! Defaults are overridable through `SANDBOX_*` environment variables.

use crate::error::{Result, SandboxError};
use crate::lineage::LineageRules;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Which lineage source wins when the proxy and the static extractor disagree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineagePolicy {
    /// Static extraction is consulted only when the proxy observed nothing
    PreferDynamic,
    /// Both sources are always merged
    Union,
}

impl FromStr for LineagePolicy {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "prefer_dynamic" | "dynamic" => Ok(LineagePolicy::PreferDynamic),
            "union" => Ok(LineagePolicy::Union),
            other => Err(SandboxError::Config(format!("Unknown lineage policy: {}", other))),
        }
    }
}

/// Resource ceilings applied to a single execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Wall-clock ceiling for one run
    pub timeout: Duration,
    /// Interpreter steps (statements, calls, loop iterations)
    pub max_operations: u64,
    /// rows * columns of any frame the script materializes
    pub max_frame_cells: usize,
    /// Length of lists, tuples, dicts and ranges
    pub max_collection_len: usize,
    pub max_string_len: usize,
    /// Nested user function calls
    pub max_call_depth: usize,
    /// Open figures at any point of the run
    pub max_figures: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_operations: 5_000_000,
            max_frame_cells: 20_000_000,
            max_collection_len: 1_000_000,
            max_string_len: 10_000_000,
            max_call_depth: 64,
            max_figures: 16,
        }
    }
}

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub limits: ExecutionLimits,

    /// Identifier the dataset is bound to inside the script namespace
    pub dataset_ident: String,

    /// Canonical result variable
    pub result_name: String,

    /// Checked in order when the canonical variable is unbound
    pub alternate_result_names: Vec<String>,

    pub lineage_rules: LineageRules,

    pub lineage_policy: LineagePolicy,

    /// Entries kept in the in-memory execution history
    pub history_limit: usize,

    /// Run the blocklist screen before executing
    pub validate_source: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            limits: ExecutionLimits::default(),
            dataset_ident: "df".to_string(),
            result_name: "result".to_string(),
            alternate_result_names: vec![
                "output".to_string(),
                "final_result".to_string(),
                "ans".to_string(),
                "answer".to_string(),
            ],
            lineage_rules: LineageRules::default(),
            lineage_policy: LineagePolicy::PreferDynamic,
            history_limit: 100,
            validate_source: true,
        }
    }
}

impl SandboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the process environment (and `.env`, if present)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, "SANDBOX_TIMEOUT_MS")? {
            config.limits.timeout = Duration::from_millis(ms);
        }
        if let Some(ops) = parse_var(&lookup, "SANDBOX_MAX_OPERATIONS")? {
            config.limits.max_operations = ops;
        }
        if let Some(cells) = parse_var(&lookup, "SANDBOX_MAX_FRAME_CELLS")? {
            config.limits.max_frame_cells = cells;
        }
        if let Some(len) = parse_var(&lookup, "SANDBOX_MAX_COLLECTION_LEN")? {
            config.limits.max_collection_len = len;
        }
        if let Some(depth) = parse_var(&lookup, "SANDBOX_MAX_CALL_DEPTH")? {
            config.limits.max_call_depth = depth;
        }
        if let Some(figures) = parse_var(&lookup, "SANDBOX_MAX_FIGURES")? {
            config.limits.max_figures = figures;
        }
        if let Some(limit) = parse_var(&lookup, "SANDBOX_HISTORY_LIMIT")? {
            config.history_limit = limit;
        }
        if let Some(policy) = parse_var(&lookup, "SANDBOX_LINEAGE_POLICY")? {
            config.lineage_policy = policy;
        }
        if let Some(ident) = lookup("SANDBOX_DATASET_IDENT") {
            config.dataset_ident = require_identifier("SANDBOX_DATASET_IDENT", ident)?;
        }
        if let Some(name) = lookup("SANDBOX_RESULT_NAME") {
            config.result_name = require_identifier("SANDBOX_RESULT_NAME", name)?;
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| SandboxError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(None),
    }
}

fn require_identifier(key: &str, value: String) -> Result<String> {
    let value = value.trim().to_string();
    let mut chars = value.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(value)
    } else {
        Err(SandboxError::Config(format!("{} is not a valid identifier: {:?}", key, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.dataset_ident, "df");
        assert_eq!(config.result_name, "result");
        assert_eq!(config.alternate_result_names[0], "output");
        assert_eq!(config.lineage_policy, LineagePolicy::PreferDynamic);
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = SandboxConfig::from_lookup(lookup_from(&[
            ("SANDBOX_TIMEOUT_MS", "250"),
            ("SANDBOX_MAX_FIGURES", "3"),
            ("SANDBOX_LINEAGE_POLICY", "union"),
            ("SANDBOX_DATASET_IDENT", "data"),
        ]))
        .unwrap();
        assert_eq!(config.limits.timeout, Duration::from_millis(250));
        assert_eq!(config.limits.max_figures, 3);
        assert_eq!(config.lineage_policy, LineagePolicy::Union);
        assert_eq!(config.dataset_ident, "data");
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        let err = SandboxConfig::from_lookup(lookup_from(&[("SANDBOX_TIMEOUT_MS", "soon")]));
        assert!(matches!(err, Err(SandboxError::Config(_))));

        let err = SandboxConfig::from_lookup(lookup_from(&[("SANDBOX_RESULT_NAME", "my result")]));
        assert!(matches!(err, Err(SandboxError::Config(_))));
    }
}
