//! Result Resolver

use super::result::{ResolvedValue, ValueKind};
use crate::config::SandboxConfig;
use crate::script::value::Value;
use std::collections::HashMap;

/// Longest display rendering kept on a result
const MAX_DISPLAY_LEN: usize = 10_000;

/// The resolved result in a form that can leave the execution thread
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub name: Option<String>,
    pub value: ResolvedValue,
    pub kind: ValueKind,
    pub display: Option<String>,
}

impl Resolution {
    pub fn absent() -> Self {
        Self {
            name: None,
            value: ResolvedValue::Absent,
            kind: ValueKind::Absent,
            display: None,
        }
    }
}

fn kind_of(value: &Value) -> ValueKind {
    match value {
        Value::Frame(_) => ValueKind::DataFrame,
        Value::Series(_) => ValueKind::Series,
        Value::List(_) | Value::Tuple(_) => ValueKind::List,
        Value::Dict(_) => ValueKind::Dict,
        Value::None => ValueKind::None,
        _ => ValueKind::Scalar,
    }
}

fn display_of(value: &Value) -> String {
    let text = value.to_display();
    if text.len() <= MAX_DISPLAY_LEN {
        return text;
    }
    let mut cut = MAX_DISPLAY_LEN;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

/// Looks the result up under the canonical name, then the alternates in order
#[derive(Debug, Clone)]
pub struct ResultResolver {
    names: Vec<String>,
}

impl ResultResolver {
    pub fn new(canonical: impl Into<String>, alternates: &[String]) -> Self {
        let mut names = vec![canonical.into()];
        names.extend(alternates.iter().cloned());
        Self { names }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(config.result_name.clone(), &config.alternate_result_names)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// A name bound to `None` is present with a null value; no bound name is `Absent`
    pub fn resolve(&self, namespace: &HashMap<String, Value>) -> Resolution {
        for name in &self.names {
            if let Some(value) = namespace.get(name) {
                return Resolution {
                    name: Some(name.clone()),
                    value: ResolvedValue::Present(value.to_json()),
                    kind: kind_of(value),
                    display: Some(display_of(value)),
                };
            }
        }
        Resolution::absent()
    }
}

impl Default for ResultResolver {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace(pairs: Vec<(&str, Value)>) -> HashMap<String, Value> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_canonical_name_wins() {
        let resolver = ResultResolver::default();
        let ns = namespace(vec![("answer", Value::Int(1)), ("result", Value::Int(2))]);
        let resolution = resolver.resolve(&ns);
        assert_eq!(resolution.name.as_deref(), Some("result"));
        assert_eq!(resolution.value, ResolvedValue::Present(serde_json::json!(2)));
        assert_eq!(resolution.kind, ValueKind::Scalar);
    }

    #[test]
    fn test_alternates_in_order() {
        let resolver = ResultResolver::default();
        let ns = namespace(vec![("answer", Value::Int(1)), ("ans", Value::str("x"))]);
        assert_eq!(resolver.resolve(&ns).name.as_deref(), Some("ans"));
    }

    #[test]
    fn test_none_is_present_and_missing_is_absent() {
        let resolver = ResultResolver::default();
        let bound_none = resolver.resolve(&namespace(vec![("result", Value::None)]));
        assert_eq!(bound_none.value, ResolvedValue::Present(serde_json::Value::Null));
        assert_eq!(bound_none.kind, ValueKind::None);

        let unbound = resolver.resolve(&namespace(vec![("total", Value::Int(3))]));
        assert_eq!(unbound, Resolution::absent());
    }
}
