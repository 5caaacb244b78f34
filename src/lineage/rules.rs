//! Column-accepting operations and keywords

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const DEFAULT_OPERATIONS: &[&str] = &[
    "groupby",
    "sort_values",
    "drop",
    "rename",
    "fillna",
    "dropna",
    "merge",
    "join",
    "set_index",
    "drop_duplicates",
    "nlargest",
    "nsmallest",
    "pivot_table",
    "agg",
    "aggregate",
    "plot",
];

/// Operations taking named aggregations: `agg(total=('sales', 'sum'))`
const NAMED_AGGREGATIONS: &[&str] = &["agg", "aggregate"];

const DEFAULT_KEYWORDS: &[&str] = &[
    "by", "subset", "columns", "on", "left_on", "right_on", "keys", "index", "column", "values",
    "x", "y",
];

/// Which calls name dataset columns in their arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageRules {
    /// Operations whose arguments may name columns
    pub operations: BTreeSet<String>,

    /// Keyword arguments that carry column names
    pub keywords: BTreeSet<String>,
}

impl Default for LineageRules {
    fn default() -> Self {
        Self {
            operations: DEFAULT_OPERATIONS.iter().map(|s| s.to_string()).collect(),
            keywords: DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl LineageRules {
    pub fn tracks_operation(&self, name: &str) -> bool {
        self.operations.contains(name)
    }

    pub fn is_column_keyword(&self, name: &str) -> bool {
        self.keywords.contains(name)
    }

    /// Whether every keyword of this operation may carry a `(column, func)` pair
    pub fn takes_named_aggregations(&self, operation: &str) -> bool {
        self.tracks_operation(operation) && NAMED_AGGREGATIONS.contains(&operation)
    }
}
