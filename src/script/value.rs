//! Runtime values
//!
//! Everything a script can hold in a variable. Lists and dicts are shared
//! references so aliasing behaves the way script authors expect; frames and
//! series are copy-on-write polars structures.

use super::ast::Param;
use super::ast::Stmt;
use super::error::{Fault, ScriptError, ScriptResult};
use crate::frame::cells::format_float;
use crate::frame::{self, FrameValue, GroupByValue, SeriesValue};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictRef = Rc<RefCell<Dict>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Pandas,
    Numpy,
    Pyplot,
    Matplotlib,
}

impl ModuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModuleKind::Pandas => "pandas",
            ModuleKind::Numpy => "numpy",
            ModuleKind::Pyplot => "matplotlib.pyplot",
            ModuleKind::Matplotlib => "matplotlib",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    Plot,
    Str,
    Dt,
    /// Label-based indexer
    Loc,
    /// Position-based indexer
    Iloc,
}

/// User-defined function
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    /// Defaults are evaluated once, when the `def` runs
    pub defaults: Vec<Option<Value>>,
    pub body: Vec<Stmt>,
}

/// Insertion-ordered mapping with script equality on keys
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.equals(key))
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| matches!(k, Value::Str(s) if s == key))
            .map(|(_, v)| v)
    }

    pub fn contains(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: Value, value: Value) -> ScriptResult<()> {
        if !key.is_hashable() {
            return Err(ScriptError::type_error(format!(
                "unhashable type: '{}'",
                key.type_name()
            )));
        }
        match self.entries.iter_mut().find(|(k, _)| k.equals(&key)) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k.equals(key))?;
        Some(self.entries.remove(pos).1)
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(ListRef),
    Tuple(Rc<Vec<Value>>),
    Dict(DictRef),
    Slice {
        lower: Option<i64>,
        upper: Option<i64>,
        step: Option<i64>,
    },
    Frame(FrameValue),
    Series(SeriesValue),
    GroupBy(GroupByValue),
    /// `.plot`, `.str`, `.dt`, `.loc` and `.iloc` of frames and series
    Accessor {
        kind: AccessorKind,
        target: Box<Value>,
    },
    Module(ModuleKind),
    Function(Rc<Function>),
    Builtin(&'static str),
    ExceptionType(Fault),
    Exception {
        fault: Fault,
        message: String,
    },
    Figure(usize),
    Axes {
        figure: usize,
        index: usize,
    },
    /// `plt.rcParams`; writes are accepted and ignored
    Settings,
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Slice { .. } => "slice",
            Value::Frame(_) => "DataFrame",
            Value::Series(_) => "Series",
            Value::GroupBy(_) => "DataFrameGroupBy",
            Value::Accessor { .. } => "Accessor",
            Value::Module(_) => "module",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::ExceptionType(_) => "type",
            Value::Exception { .. } => "Exception",
            Value::Figure(_) => "Figure",
            Value::Axes { .. } => "Axes",
            Value::Settings => "RcParams",
        }
    }

    /// Values derived from the bound dataset
    pub fn is_tracked(&self) -> bool {
        match self {
            Value::Frame(f) => f.tracked,
            Value::Series(s) => s.tracked,
            Value::GroupBy(g) => g.tracked,
            Value::Accessor { target, .. } => target.is_tracked(),
            _ => false,
        }
    }

    /// Mark a derived value as dataset-derived
    pub fn into_tracked(self) -> Value {
        match self {
            Value::Frame(mut f) => {
                f.tracked = true;
                Value::Frame(f)
            }
            Value::Series(mut s) => {
                s.tracked = true;
                Value::Series(s)
            }
            Value::GroupBy(mut g) => {
                g.tracked = true;
                Value::GroupBy(g)
            }
            Value::Accessor { kind, target } => Value::Accessor {
                kind,
                target: Box::new(target.into_tracked()),
            },
            other => other,
        }
    }

    pub fn truthy(&self) -> ScriptResult<bool> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Frame(_) | Value::Series(_) => {
                return Err(ScriptError::value(format!(
                    "The truth value of a {} is ambiguous. Use a.empty, a.any() or a.all().",
                    self.type_name()
                )))
            }
            _ => true,
        })
    }

    pub fn is_hashable(&self) -> bool {
        match self {
            Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => true,
            Value::Tuple(items) => items.iter().all(|v| v.is_hashable()),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Float(_))
    }

    /// Script `==`
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => a.as_f64() == b.as_f64(),
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.entries()
                        .iter()
                        .all(|(k, v)| b.get(k).map(|w| w.equals(v)).unwrap_or(false))
            }
            (Value::ExceptionType(a), Value::ExceptionType(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => a == b,
            (Value::Figure(a), Value::Figure(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Script `is`
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Int(_), Value::Int(_)) | (Value::Str(_), Value::Str(_)) => self.equals(other),
            _ => false,
        }
    }

    /// Ordering for `<`, `sorted`, `min` and `max`
    pub fn compare(&self, other: &Value) -> ScriptResult<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (a, b) if a.is_number() && b.is_number() => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal))
            }
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Tuple(a), Value::Tuple(b)) => compare_sequences(a, b),
            (Value::List(a), Value::List(b)) => compare_sequences(&a.borrow(), &b.borrow()),
            (a, b) => Err(ScriptError::type_error(format!(
                "'<' not supported between instances of '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    /// `str(value)`
    pub fn to_display(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Exception { message, .. } => message.clone(),
            other => other.repr(),
        }
    }

    /// `repr(value)`
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => quote(s),
            Value::List(items) => format!("[{}]", join_repr(&items.borrow())),
            Value::Tuple(items) => {
                if items.len() == 1 {
                    format!("({},)", items[0].repr())
                } else {
                    format!("({})", join_repr(items))
                }
            }
            Value::Dict(d) => {
                let d = d.borrow();
                let body = d
                    .entries()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{}}}", body)
            }
            Value::Slice { lower, upper, step } => {
                let show = |v: &Option<i64>| v.map(|i| i.to_string()).unwrap_or_else(|| "None".into());
                format!("slice({}, {}, {})", show(lower), show(upper), show(step))
            }
            Value::Frame(f) => frame::render_frame(f),
            Value::Series(s) => frame::render_series(s),
            Value::GroupBy(g) => format!("<DataFrameGroupBy by {:?}>", g.keys),
            Value::Accessor { kind, .. } => format!("<{:?}Accessor>", kind),
            Value::Module(m) => format!("<module '{}'>", m.name()),
            Value::Function(f) => format!("<function {}>", f.name),
            Value::Builtin(name) => format!("<built-in function {}>", name),
            Value::ExceptionType(fault) => format!("<class '{}'>", fault.name()),
            Value::Exception { fault, message } => format!("{}({})", fault.name(), quote(message)),
            Value::Figure(id) => format!("<Figure {}>", id),
            Value::Axes { figure, index } => format!("<Axes {}:{}>", figure, index),
            Value::Settings => "RcParams({})".to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::None => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::Str(s) => J::String(s.clone()),
            Value::List(items) => J::Array(items.borrow().iter().map(|v| v.to_json()).collect()),
            Value::Tuple(items) => J::Array(items.iter().map(|v| v.to_json()).collect()),
            Value::Dict(d) => {
                let mut map = serde_json::Map::new();
                for (k, v) in d.borrow().entries() {
                    map.insert(k.to_display(), v.to_json());
                }
                J::Object(map)
            }
            Value::Frame(f) => frame::frame_to_json(f),
            Value::Series(s) => frame::series_to_json(s),
            other => J::String(other.repr()),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as J;
        match json {
            J::Null => Value::None,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => Value::Str(s.clone()),
            J::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            J::Object(map) => {
                let mut dict = Dict::new();
                for (k, v) in map {
                    dict.entries.push((Value::Str(k.clone()), Value::from_json(v)));
                }
                Value::dict(dict)
            }
        }
    }

    /// Elements of an iterable value
    pub fn iter_values(&self) -> ScriptResult<Vec<Value>> {
        match self {
            Value::List(items) => Ok(items.borrow().clone()),
            Value::Tuple(items) => Ok(items.as_ref().clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Dict(d) => Ok(d.borrow().keys().cloned().collect()),
            Value::Frame(f) => Ok(f
                .column_names()
                .into_iter()
                .map(Value::Str)
                .collect()),
            Value::Series(s) => s.values(),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }
}

fn compare_sequences(a: &[Value], b: &[Value]) -> ScriptResult<Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = x.compare(y)?;
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

fn join_repr(items: &[Value]) -> String {
    items.iter().map(|v| v.repr()).collect::<Vec<_>>().join(", ")
}

fn quote(s: &str) -> String {
    if s.contains('\'') && !s.contains('"') {
        format!("\"{}\"", s)
    } else {
        format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'").replace('\n', "\\n"))
    }
}

/// Positional and keyword arguments of a call
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            positional,
            keywords,
        }
    }

    pub fn positional(positional: Vec<Value>) -> Self {
        Self::new(positional, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Positional slot `index`, or keyword `name`
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| self.kwarg(name))
    }

    pub fn require(&self, index: usize, name: &str, func: &str) -> ScriptResult<&Value> {
        self.get(index, name).ok_or_else(|| {
            ScriptError::type_error(format!(
                "{}() missing required argument: '{}'",
                func, name
            ))
        })
    }

    pub fn bool_or(&self, index: usize, name: &str, default: bool) -> ScriptResult<bool> {
        match self.get(index, name) {
            Some(v) => v.truthy(),
            None => Ok(default),
        }
    }

    pub fn int_or(&self, index: usize, name: &str, default: i64) -> ScriptResult<i64> {
        match self.get(index, name) {
            None | Some(Value::None) => Ok(default),
            Some(v) => v.as_int().ok_or_else(|| {
                ScriptError::type_error(format!(
                    "'{}' must be an integer, not '{}'",
                    name,
                    v.type_name()
                ))
            }),
        }
    }

    pub fn str_arg(&self, index: usize, name: &str) -> Option<String> {
        self.get(index, name)
            .and_then(|v| v.as_str().map(|s| s.to_string()))
    }

    pub fn max_positional(&self, func: &str, max: usize) -> ScriptResult<()> {
        if self.positional.len() > max {
            return Err(ScriptError::type_error(format!(
                "{}() takes at most {} positional arguments ({} given)",
                func,
                max,
                self.positional.len()
            )));
        }
        Ok(())
    }
}

/// Column names from a string or a list/tuple of strings
pub fn name_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Str(s) => Some(vec![s.clone()]),
        Value::List(_) | Value::Tuple(_) => {
            let items = value.iter_values().ok()?;
            items
                .iter()
                .map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_matches_script_conventions() {
        let v = Value::list(vec![Value::Int(1), Value::str("a"), Value::Float(2.0), Value::None]);
        assert_eq!(v.repr(), "[1, 'a', 2.0, None]");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
    }

    #[test]
    fn test_dict_keys_use_script_equality() {
        let mut d = Dict::new();
        d.insert(Value::Int(1), Value::str("one")).unwrap();
        d.insert(Value::Float(1.0), Value::str("uno")).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d.get(&Value::Int(1)).unwrap().to_display(), "uno");
        assert!(d.insert(Value::list(vec![]), Value::None).is_err());
    }

    #[test]
    fn test_lists_alias() {
        let a = Value::list(vec![]);
        let b = a.clone();
        if let Value::List(items) = &b {
            items.borrow_mut().push(Value::Int(7));
        }
        assert_eq!(a.repr(), "[7]");
        assert!(a.identical(&b));
    }

    #[test]
    fn test_json_round_trip_of_context() {
        let json = serde_json::json!({"threshold": 10, "regions": ["East", "West"]});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_compare_rejects_mixed_types() {
        assert!(Value::Int(1).compare(&Value::str("a")).is_err());
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)).unwrap(), Ordering::Less);
    }
}
