//! Column lineage
//!
//! Runtime observation through [`TrackedProxy`] with a regex fallback in
//! [`StaticLineageExtractor`].

pub mod proxy;
pub mod rules;
pub mod static_extractor;

pub use proxy::{ColumnAccessLog, TrackedProxy};
pub use rules::LineageRules;
pub use static_extractor::StaticLineageExtractor;

use serde::{Deserialize, Serialize};

/// Where the reported columns came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageSource {
    Dynamic,
    Static,
    /// Proxy observations merged with static candidates
    Union,
    None,
}
