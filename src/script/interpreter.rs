//! Tree-walking interpreter
//!
//! Runs a parsed [`Program`] against a namespace holding the tracked dataset.
//! Every statement, loop iteration, call and subscript draws from a [`Budget`];
//! a breach raises a fault that `except` clauses cannot catch, which is how the
//! execution deadline is enforced.

use super::ast::*;
use super::builtins::{self, extremum_candidates};
use super::error::{panic_message, Fault, ScriptError, ScriptResult};
use super::format::format_value;
use super::methods::{self, list_index, sort_values};
use super::ops::{binary_scalar, compare_scalar, unary_scalar};
use super::value::{name_list, AccessorKind, Args, Dict, Function, ListRef, ModuleKind, Value};
use crate::config::ExecutionLimits;
use crate::frame::cells::Cell;
use crate::frame::column::{self, slice_positions};
use crate::frame::{grouped, indexer, pandas, table, FrameValue, GroupByValue, Labels, SeriesValue};
use crate::lineage::TrackedProxy;
use crate::plot::{pyplot, RegistryLease};
use polars::prelude::DataFrame;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Instant;

const PANDAS_FUNCTIONS: &[&str] = &[
    "pandas.DataFrame",
    "pandas.Series",
    "pandas.concat",
    "pandas.merge",
    "pandas.to_datetime",
    "pandas.to_numeric",
    "pandas.isna",
    "pandas.isnull",
    "pandas.notna",
    "pandas.notnull",
];

const NUMPY_FUNCTIONS: &[&str] = &[
    "numpy.sum",
    "numpy.mean",
    "numpy.median",
    "numpy.min",
    "numpy.max",
    "numpy.std",
    "numpy.percentile",
    "numpy.quantile",
    "numpy.sqrt",
    "numpy.abs",
    "numpy.absolute",
    "numpy.log",
    "numpy.log10",
    "numpy.exp",
    "numpy.floor",
    "numpy.ceil",
    "numpy.round",
    "numpy.isnan",
    "numpy.arange",
    "numpy.array",
    "numpy.where",
];

const PYPLOT_FUNCTIONS: &[&str] = &[
    "matplotlib.pyplot.figure",
    "matplotlib.pyplot.subplots",
    "matplotlib.pyplot.subplot",
    "matplotlib.pyplot.gca",
    "matplotlib.pyplot.gcf",
    "matplotlib.pyplot.close",
    "matplotlib.pyplot.show",
    "matplotlib.pyplot.savefig",
    "matplotlib.pyplot.suptitle",
    "matplotlib.pyplot.plot",
    "matplotlib.pyplot.bar",
    "matplotlib.pyplot.barh",
    "matplotlib.pyplot.scatter",
    "matplotlib.pyplot.hist",
    "matplotlib.pyplot.pie",
    "matplotlib.pyplot.title",
    "matplotlib.pyplot.xlabel",
    "matplotlib.pyplot.ylabel",
    "matplotlib.pyplot.legend",
    "matplotlib.pyplot.grid",
    "matplotlib.pyplot.tight_layout",
];

fn qualified(table: &'static [&'static str], module: &str, name: &str) -> Option<Value> {
    table
        .iter()
        .copied()
        .find(|q| q.strip_prefix(module).and_then(|rest| rest.strip_prefix('.')) == Some(name))
        .map(Value::Builtin)
}

fn module_kind(path: &str) -> Option<ModuleKind> {
    match path {
        "pandas" => Some(ModuleKind::Pandas),
        "numpy" => Some(ModuleKind::Numpy),
        "matplotlib.pyplot" => Some(ModuleKind::Pyplot),
        "matplotlib" => Some(ModuleKind::Matplotlib),
        _ => None,
    }
}

fn import_error(module: &str) -> ScriptError {
    ScriptError::new(
        Fault::Import,
        format!("No module named '{}' (allowed: pandas, numpy, matplotlib)", module),
    )
}

/// Ceilings drawn down while a script runs
#[derive(Debug)]
pub struct Budget {
    limits: ExecutionLimits,
    started: Instant,
    operations: u64,
    depth: usize,
}

impl Budget {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self {
            limits,
            started: Instant::now(),
            operations: 0,
            depth: 0,
        }
    }

    /// One interpreter step; checks the operation count and the deadline
    pub fn tick(&mut self) -> ScriptResult<()> {
        self.operations += 1;
        if self.operations > self.limits.max_operations {
            return Err(ScriptError::new(
                Fault::OperationLimit,
                format!("more than {} operations", self.limits.max_operations),
            ));
        }
        if self.started.elapsed() > self.limits.timeout {
            return Err(ScriptError::new(
                Fault::Timeout,
                format!(
                    "execution exceeded {} ms",
                    self.limits.timeout.as_millis()
                ),
            ));
        }
        Ok(())
    }

    fn enter(&mut self) -> ScriptResult<()> {
        if self.depth >= self.limits.max_call_depth {
            return Err(ScriptError::new(
                Fault::RecursionLimit,
                "maximum recursion depth exceeded",
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn memory(&self, what: &str, size: usize, limit: usize) -> ScriptResult<()> {
        if size > limit {
            return Err(ScriptError::new(
                Fault::MemoryLimit,
                format!("{} of size {} exceeds the limit of {}", what, size, limit),
            ));
        }
        Ok(())
    }

    /// Size ceilings on a freshly produced value
    pub fn check_value(&self, value: &Value) -> ScriptResult<()> {
        match value {
            Value::Frame(f) => self.memory("frame", f.cell_count(), self.limits.max_frame_cells),
            Value::List(items) => self.memory("list", items.borrow().len(), self.limits.max_collection_len),
            Value::Tuple(items) => self.memory("tuple", items.len(), self.limits.max_collection_len),
            Value::Dict(d) => self.memory("dict", d.borrow().len(), self.limits.max_collection_len),
            Value::Str(s) => self.memory("string", s.len(), self.limits.max_string_len),
            _ => Ok(()),
        }
    }

    /// `seq * n` is checked before the repetition is materialized
    fn check_repeat(&self, op: BinOp, left: &Value, right: &Value) -> ScriptResult<()> {
        if op != BinOp::Mul {
            return Ok(());
        }
        let (seq, count) = match (left, right) {
            (seq, Value::Int(n)) | (Value::Int(n), seq) => (seq, (*n).max(0) as usize),
            _ => return Ok(()),
        };
        match seq {
            Value::Str(s) => self.memory("string", s.len().saturating_mul(count), self.limits.max_string_len),
            Value::List(items) => self.memory(
                "list",
                items.borrow().len().saturating_mul(count),
                self.limits.max_collection_len,
            ),
            _ => Ok(()),
        }
    }

    pub fn operations(&self) -> u64 {
        self.operations
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub struct Interpreter<'a> {
    globals: HashMap<String, Value>,
    frames: Vec<HashMap<String, Value>>,
    budget: Budget,
    output: String,
    proxy: &'a mut TrackedProxy,
    charts: &'a RegistryLease,
    /// Faults being handled by enclosing `except` blocks, for bare `raise`
    handling: Vec<ScriptError>,
    line: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(proxy: &'a mut TrackedProxy, charts: &'a RegistryLease, limits: &ExecutionLimits) -> Self {
        let mut globals = HashMap::new();
        globals.insert("__name__".to_string(), Value::str("__main__"));
        Self {
            globals,
            frames: Vec::new(),
            budget: Budget::new(limits.clone()),
            output: String::new(),
            proxy,
            charts,
            handling: Vec::new(),
            line: 0,
        }
    }

    pub fn bind(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    /// Run the program to completion or to its first uncaught fault. The
    /// namespace, output and proxy log keep whatever was produced before the
    /// fault, including when an engine call panics.
    pub fn run(&mut self, program: &Program) -> ScriptResult<()> {
        self.guarded(|interp| interp.exec_block(&program.body).map(|_| ()))
    }

    /// Run `step`, turning a panic into an internal fault at the current line
    /// while keeping everything recorded so far
    fn guarded<T>(&mut self, step: impl FnOnce(&mut Self) -> ScriptResult<T>) -> ScriptResult<T> {
        match panic::catch_unwind(AssertUnwindSafe(|| step(self))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                self.frames.clear();
                Err(ScriptError::new(
                    Fault::Internal,
                    format!("internal error: {}", panic_message(payload.as_ref())),
                )
                .at_line(self.line))
            }
        }
    }

    pub fn globals(&self) -> &HashMap<String, Value> {
        &self.globals
    }

    /// Captured `print` output
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn operations(&self) -> u64 {
        self.budget.operations()
    }

    /* ---------- names ---------- */

    fn lookup(&self, name: &str) -> ScriptResult<Value> {
        for frame in self.frames.iter().rev() {
            if let Some(v) = frame.get(name) {
                return Ok(v.clone());
            }
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        if let Some(b) = builtins::lookup(name) {
            return Ok(Value::Builtin(b));
        }
        if let Some(fault) = Fault::from_name(name) {
            return Ok(Value::ExceptionType(fault));
        }
        Err(ScriptError::name(format!("name '{}' is not defined", name)))
    }

    fn store(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) => frame.insert(name.to_string(), value),
            None => self.globals.insert(name.to_string(), value),
        };
    }

    /* ---------- statements ---------- */

    fn exec_block(&mut self, body: &[Stmt]) -> ScriptResult<Flow> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> ScriptResult<Flow> {
        let line = stmt.span.line;
        self.line = line;
        self.budget.tick().map_err(|e| e.at_line(line))?;
        self.exec_kind(&stmt.kind).map_err(|e| e.at_line(line))
    }

    fn exec_kind(&mut self, kind: &StmtKind) -> ScriptResult<Flow> {
        match kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval_target(target)?;
                let rhs = self.eval(value)?;
                let updated = self.binary(*op, &current, &rhs)?;
                self.assign(target, updated)?;
            }
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test)?.truthy()? {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter)?;
                for item in self.iterate(&iterable)? {
                    self.budget.tick()?;
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
            }
            StmtKind::While { test, body } => loop {
                self.budget.tick()?;
                if !self.eval(test)?.truthy()? {
                    break;
                }
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Normal | Flow::Continue => {}
                    ret @ Flow::Return(_) => return Ok(ret),
                }
            },
            StmtKind::FunctionDef { name, params, body } => {
                let defaults = self.eval_defaults(params)?;
                let function = Function {
                    name: name.clone(),
                    params: params.clone(),
                    defaults,
                    body: body.clone(),
                };
                self.store(name, Value::Function(Rc::new(function)));
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Try {
                body,
                handlers,
                finally,
            } => {
                let outcome = match self.exec_block(body) {
                    Err(err) if err.fault.is_catchable() => self.handle(err, handlers),
                    other => other,
                };
                if !finally.is_empty() {
                    match self.exec_block(finally)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                return outcome;
            }
            StmtKind::Raise(None) => {
                return Err(self.handling.last().cloned().unwrap_or_else(|| {
                    ScriptError::new(Fault::Exception, "No active exception to reraise")
                }))
            }
            StmtKind::Raise(Some(expr)) => {
                return Err(match self.eval(expr)? {
                    Value::Exception { fault, message } => ScriptError::new(fault, message),
                    Value::ExceptionType(fault) => ScriptError::new(fault, ""),
                    other => ScriptError::type_error(format!(
                        "exceptions must derive from BaseException, not '{}'",
                        other.type_name()
                    )),
                })
            }
            StmtKind::Import { module, alias } => {
                let kind = module_kind(module).ok_or_else(|| import_error(module))?;
                match alias {
                    Some(alias) => self.store(alias, Value::Module(kind)),
                    None => {
                        let root = module.split('.').next().unwrap_or(module);
                        let root_kind = module_kind(root).ok_or_else(|| import_error(root))?;
                        self.store(root, Value::Module(root_kind));
                    }
                }
            }
            StmtKind::FromImport { module, names } => {
                let kind = module_kind(module).ok_or_else(|| import_error(module))?;
                for (name, alias) in names {
                    let value = self
                        .module_attribute(kind, name)
                        .map_err(|_| {
                            ScriptError::new(
                                Fault::Import,
                                format!("cannot import name '{}' from '{}'", name, module),
                            )
                        })?;
                    self.store(alias.as_deref().unwrap_or(name), value);
                }
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn handle(&mut self, err: ScriptError, handlers: &[ExceptHandler]) -> ScriptResult<Flow> {
        let handler = handlers.iter().find(|h| match &h.fault {
            None => true,
            Some(name) => {
                let short = name.rsplit('.').next().unwrap_or(name);
                err.fault.matches_handler(short)
            }
        });
        let handler = match handler {
            Some(h) => h,
            None => return Err(err),
        };
        if let Some(alias) = &handler.alias {
            let bound = Value::Exception {
                fault: err.fault,
                message: err.message.clone(),
            };
            self.store(alias, bound);
        }
        self.handling.push(err);
        let outcome = self.exec_block(&handler.body);
        self.handling.pop();
        outcome
    }

    fn eval_defaults(&mut self, params: &[Param]) -> ScriptResult<Vec<Option<Value>>> {
        params
            .iter()
            .map(|p| p.default.as_ref().map(|e| self.eval(e)).transpose())
            .collect()
    }

    /* ---------- assignment ---------- */

    fn eval_target(&mut self, target: &Target) -> ScriptResult<Value> {
        match target {
            Target::Name(name) => self.lookup(name),
            Target::Subscript { object, key } => {
                let container = self.eval(object)?;
                let key = self.eval(key)?;
                self.subscript(&container, &key)
            }
            Target::Attribute { object, name } => {
                let target = self.eval(object)?;
                self.get_attr(&target, name)
            }
            Target::Tuple(_) => Err(ScriptError::syntax(
                "illegal expression for augmented assignment",
                self.line,
            )),
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> ScriptResult<()> {
        match target {
            Target::Name(name) => {
                self.store(name, value);
                Ok(())
            }
            Target::Tuple(targets) => {
                let items = self.iterate(&value)?;
                if items.len() != targets.len() {
                    let message = if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    };
                    return Err(ScriptError::value(message));
                }
                for (t, v) in targets.iter().zip(items) {
                    self.assign(t, v)?;
                }
                Ok(())
            }
            Target::Subscript { object, key } => {
                let key = self.eval(key)?;
                self.assign_subscript(object, key, value)
            }
            Target::Attribute { object, name } => self.assign_attribute(object, name, value),
        }
    }

    /// Rebind the place `object` names after a copy-on-write update
    fn write_back(&mut self, object: &Expr, updated: Value) -> ScriptResult<()> {
        match object {
            Expr::Name(name) => {
                self.store(name, updated);
                Ok(())
            }
            Expr::Subscript { object: base, key } => {
                let key = self.eval(key)?;
                self.assign_subscript(base, key, updated)
            }
            _ => Err(ScriptError::unsupported(
                "in-place updates require a named frame or column",
            )),
        }
    }

    fn assign_subscript(&mut self, object: &Expr, key: Value, value: Value) -> ScriptResult<()> {
        self.budget.tick()?;
        let container = self.eval(object)?;
        match &container {
            Value::Dict(d) => {
                d.borrow_mut().insert(key, value)?;
                self.budget.check_value(&container)
            }
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let idx = list_index(items.len(), &key)?;
                items[idx] = value;
                Ok(())
            }
            Value::Settings => Ok(()),
            Value::Frame(frame) => {
                let updated = Value::Frame(table::set_item(frame, &key, &value)?);
                self.budget.check_value(&updated)?;
                self.write_back(object, updated)
            }
            Value::Accessor {
                kind: AccessorKind::Loc,
                target,
            } => {
                let frame = match target.as_ref() {
                    Value::Frame(f) => f,
                    other => {
                        return Err(ScriptError::unsupported(format!(
                            ".loc assignment on '{}' is not supported",
                            other.type_name()
                        )))
                    }
                };
                let updated = Value::Frame(indexer::loc_set(frame, &key, &value)?);
                match object {
                    Expr::Attribute { object: base, .. } => self.write_back(base, updated),
                    _ => Err(ScriptError::unsupported(".loc assignment requires a named frame")),
                }
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn assign_attribute(&mut self, object: &Expr, name: &str, value: Value) -> ScriptResult<()> {
        let target = self.eval(object)?;
        match (&target, name) {
            (Value::Frame(frame), "columns") => {
                let names = name_list(&value)
                    .ok_or_else(|| ScriptError::type_error("columns must be a list of names"))?;
                let current = frame.column_names();
                if names.len() != current.len() {
                    return Err(ScriptError::value(format!(
                        "Length mismatch: Expected axis has {} elements, new values have {} elements",
                        current.len(),
                        names.len()
                    )));
                }
                let mut data = frame.data.clone();
                for (old, new) in current.iter().zip(&names) {
                    if old != new {
                        data.rename(old, new)?;
                    }
                }
                self.write_back(object, Value::Frame(frame.derived(data)))
            }
            (Value::Series(series), "name") => {
                let mut data = series.data.clone();
                data.rename(&value.to_display());
                self.write_back(object, Value::Series(series.derived(data)))
            }
            (Value::Settings, _) => Ok(()),
            (other, _) => Err(ScriptError::attribute(format!(
                "cannot set attribute '{}' on '{}' object",
                name,
                other.type_name()
            ))),
        }
    }

    /* ---------- expressions ---------- */

    fn eval_all(&mut self, exprs: &[Expr]) -> ScriptResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn slice_bound(&mut self, bound: &Option<Box<Expr>>) -> ScriptResult<Option<i64>> {
        match bound {
            None => Ok(None),
            Some(expr) => match self.eval(expr)? {
                Value::None => Ok(None),
                v => v.as_int().map(Some).ok_or_else(|| {
                    ScriptError::type_error(format!(
                        "slice indices must be integers or None, not '{}'",
                        v.type_name()
                    ))
                }),
            },
        }
    }

    fn eval(&mut self, expr: &Expr) -> ScriptResult<Value> {
        match expr {
            Expr::None => Ok(Value::None),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Expr { expr, spec } => {
                            let value = self.eval(expr)?;
                            out.push_str(&format_value(&value, spec.as_deref().unwrap_or(""))?);
                        }
                    }
                }
                self.checked(Value::Str(out))
            }
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => {
                let items = self.eval_all(items)?;
                self.checked(Value::list(items))
            }
            Expr::Tuple(items) => {
                let items = self.eval_all(items)?;
                Ok(Value::tuple(items))
            }
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (k, v) in pairs {
                    let key = self.eval(k)?;
                    let value = self.eval(v)?;
                    dict.insert(key, value)?;
                }
                self.checked(Value::dict(dict))
            }
            Expr::Attribute { object, name } => {
                let target = self.eval(object)?;
                self.get_attr(&target, name)
            }
            Expr::Subscript { object, key } => {
                let target = self.eval(object)?;
                let key = self.eval(key)?;
                self.subscript(&target, &key)
            }
            Expr::Slice { lower, upper, step } => Ok(Value::Slice {
                lower: self.slice_bound(lower)?,
                upper: self.slice_bound(upper)?,
                step: self.slice_bound(step)?,
            }),
            Expr::Call {
                callee,
                args,
                kwargs,
            } => self.eval_call(callee, args, kwargs),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match &value {
                    Value::Series(s) => column::unary(*op, s),
                    _ => unary_scalar(*op, &value),
                }
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                self.binary(*op, &l, &r)
            }
            Expr::Compare { left, ops } => self.compare_chain(left, ops),
            Expr::BoolOp { op, left, right } => {
                let l = self.eval(left)?;
                let short_circuit = match op {
                    BoolOp::And => !l.truthy()?,
                    BoolOp::Or => l.truthy()?,
                };
                if short_circuit {
                    Ok(l)
                } else {
                    self.eval(right)
                }
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy()? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Lambda { params, body } => {
                let defaults = self.eval_defaults(params)?;
                let body = vec![Stmt {
                    kind: StmtKind::Return(Some((**body).clone())),
                    span: Span::new(self.line, 0),
                }];
                Ok(Value::Function(Rc::new(Function {
                    name: "<lambda>".to_string(),
                    params: params.clone(),
                    defaults,
                    body,
                })))
            }
            Expr::ListComp {
                element,
                target,
                iter,
                condition,
            } => {
                let iterable = self.eval(iter)?;
                let mut out = Vec::new();
                for item in self.iterate(&iterable)? {
                    self.budget.tick()?;
                    self.assign(target, item)?;
                    if let Some(cond) = condition {
                        if !self.eval(cond)?.truthy()? {
                            continue;
                        }
                    }
                    out.push(self.eval(element)?);
                }
                self.checked(Value::list(out))
            }
        }
    }

    fn checked(&self, value: Value) -> ScriptResult<Value> {
        self.budget.check_value(&value)?;
        Ok(value)
    }

    fn binary(&self, op: BinOp, left: &Value, right: &Value) -> ScriptResult<Value> {
        self.budget.check_repeat(op, left, right)?;
        let out = if matches!(left, Value::Series(_)) || matches!(right, Value::Series(_)) {
            column::binary(op, left, right)?
        } else {
            binary_scalar(op, left, right)?
        };
        self.checked(out)
    }

    fn compare_pair(&self, op: CmpOp, left: &Value, right: &Value) -> ScriptResult<Value> {
        let membership = matches!(op, CmpOp::In | CmpOp::NotIn);
        if matches!(left, Value::Series(_)) || (matches!(right, Value::Series(_)) && !membership) {
            column::compare(op, left, right)
        } else {
            Ok(Value::Bool(compare_scalar(op, left, right)?))
        }
    }

    fn compare_chain(&mut self, left: &Expr, ops: &[(CmpOp, Expr)]) -> ScriptResult<Value> {
        let mut current = self.eval(left)?;
        if let [(op, right)] = ops {
            let rhs = self.eval(right)?;
            return self.compare_pair(*op, &current, &rhs);
        }
        for (op, right) in ops {
            let rhs = self.eval(right)?;
            if !self.compare_pair(*op, &current, &rhs)?.truthy()? {
                return Ok(Value::Bool(false));
            }
            current = rhs;
        }
        Ok(Value::Bool(true))
    }

    /// Values produced by iterating `value` in a `for` or a comprehension
    fn iterate(&self, value: &Value) -> ScriptResult<Vec<Value>> {
        match value {
            Value::GroupBy(group) => Ok(grouped::partitions(group)?
                .into_iter()
                .map(|(key, frame)| Value::tuple(vec![key, Value::Frame(frame)]))
                .collect()),
            other => other.iter_values(),
        }
    }

    /* ---------- subscripts and attributes ---------- */

    fn subscript(&mut self, target: &Value, key: &Value) -> ScriptResult<Value> {
        self.budget.tick()?;
        let out = match target {
            Value::Frame(frame) => {
                if frame.tracked {
                    self.proxy.observe_access(key);
                }
                table::subscript(frame, key)?
            }
            Value::Series(series) => {
                // row labels of a tracked row are column names
                if series.tracked && matches!(key, Value::Str(_)) {
                    self.proxy.observe_access(key);
                }
                column::subscript(series, key)?
            }
            Value::GroupBy(group) => {
                if group.tracked {
                    self.proxy.observe_access(key);
                }
                grouped::subscript(group, key)?
            }
            Value::Accessor { kind, target: inner } => match kind {
                AccessorKind::Loc => {
                    if inner.is_tracked() {
                        if let Some(columns) = indexer::column_key(key) {
                            self.proxy.observe_access(&columns);
                        }
                    }
                    indexer::loc_get(inner, key)?
                }
                AccessorKind::Iloc => indexer::iloc_get(inner, key)?,
                other => {
                    return Err(ScriptError::type_error(format!(
                        "'{:?}Accessor' object is not subscriptable",
                        other
                    )))
                }
            },
            Value::List(items) => index_sequence(&items.borrow(), key, false)?,
            Value::Tuple(items) => index_sequence(items, key, true)?,
            Value::Str(s) => index_string(s, key)?,
            Value::Dict(d) => d
                .borrow()
                .get(key)
                .cloned()
                .ok_or_else(|| ScriptError::key(key.repr()))?,
            Value::Settings => Value::None,
            other => {
                return Err(ScriptError::type_error(format!(
                    "'{}' object is not subscriptable",
                    other.type_name()
                )))
            }
        };
        self.checked(out)
    }

    fn accessor(kind: AccessorKind, target: &Value) -> Value {
        Value::Accessor {
            kind,
            target: Box::new(target.clone()),
        }
    }

    fn module_attribute(&self, kind: ModuleKind, name: &str) -> ScriptResult<Value> {
        let found = match kind {
            ModuleKind::Pandas => {
                pandas::pandas_attribute(name).or_else(|| qualified(PANDAS_FUNCTIONS, "pandas", name))
            }
            ModuleKind::Numpy => {
                pandas::numpy_attribute(name).or_else(|| qualified(NUMPY_FUNCTIONS, "numpy", name))
            }
            ModuleKind::Pyplot => match name {
                "rcParams" | "style" => Some(Value::Settings),
                _ => qualified(PYPLOT_FUNCTIONS, "matplotlib.pyplot", name),
            },
            ModuleKind::Matplotlib => match name {
                "pyplot" => Some(Value::Module(ModuleKind::Pyplot)),
                "rcParams" | "style" => Some(Value::Settings),
                _ => None,
            },
        };
        found.ok_or_else(|| {
            ScriptError::attribute(format!("module '{}' has no attribute '{}'", kind.name(), name))
        })
    }

    fn get_attr(&mut self, target: &Value, name: &str) -> ScriptResult<Value> {
        let found = match target {
            Value::Module(kind) => return self.module_attribute(*kind, name),
            Value::Frame(frame) => match name {
                "plot" => Some(Self::accessor(AccessorKind::Plot, target)),
                "loc" => Some(Self::accessor(AccessorKind::Loc, target)),
                "iloc" => Some(Self::accessor(AccessorKind::Iloc, target)),
                _ => match table::attribute(frame, name)? {
                    Some(value) => Some(value),
                    None if frame.column_names().iter().any(|c| c == name) => {
                        if frame.tracked {
                            self.proxy.observe_attribute(name);
                        }
                        Some(Value::Series(frame.column(name)?))
                    }
                    None => None,
                },
            },
            Value::Series(series) => match name {
                "str" => Some(Self::accessor(AccessorKind::Str, target)),
                "dt" => Some(Self::accessor(AccessorKind::Dt, target)),
                "plot" => Some(Self::accessor(AccessorKind::Plot, target)),
                "loc" => Some(Self::accessor(AccessorKind::Loc, target)),
                "iloc" => Some(Self::accessor(AccessorKind::Iloc, target)),
                _ => column::attribute(series, name)?,
            },
            Value::Accessor {
                kind: AccessorKind::Dt,
                target: inner,
            } => match inner.as_ref() {
                Value::Series(series) => Some(column::datetime_attribute(series, name)?),
                _ => None,
            },
            Value::GroupBy(group) => {
                if group.frame.has_column(name) {
                    if group.tracked {
                        self.proxy.observe_attribute(name);
                    }
                    Some(grouped::subscript(group, &Value::str(name))?)
                } else if name == "ngroups" {
                    Some(grouped::call_method(group, name, &Args::default())?)
                } else {
                    None
                }
            }
            Value::Exception { message, .. } if name == "args" => {
                Some(Value::tuple(vec![Value::str(message.clone())]))
            }
            Value::Settings => Some(Value::Settings),
            _ => None,
        };
        found.ok_or_else(|| {
            ScriptError::attribute(format!(
                "'{}' object has no attribute '{}'",
                target.type_name(),
                name
            ))
        })
    }

    /* ---------- calls ---------- */

    fn eval_args(&mut self, args: &[Expr], kwargs: &[(String, Expr)]) -> ScriptResult<Args> {
        let positional = self.eval_all(args)?;
        let mut keywords = Vec::with_capacity(kwargs.len());
        for (name, expr) in kwargs {
            keywords.push((name.clone(), self.eval(expr)?));
        }
        Ok(Args::new(positional, keywords))
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], kwargs: &[(String, Expr)]) -> ScriptResult<Value> {
        self.budget.tick()?;
        let result = match callee {
            Expr::Attribute { object, name } => {
                let target = self.eval(object)?;
                let mut args = self.eval_args(args, kwargs)?;
                if take_inplace(&mut args)? {
                    let updated = self.call_method(&target, name, args)?;
                    self.budget.check_value(&updated)?;
                    self.write_back(object, updated)?;
                    Value::None
                } else {
                    self.call_method(&target, name, args)?
                }
            }
            other => {
                let func = self.eval(other)?;
                let args = self.eval_args(args, kwargs)?;
                self.call_value(&func, args)?
            }
        };
        self.checked(result)
    }

    fn call_value(&mut self, func: &Value, args: Args) -> ScriptResult<Value> {
        match func {
            Value::Function(f) => self.call_function(f, args),
            Value::Builtin(name) => self.call_builtin(name, args),
            Value::ExceptionType(fault) => Ok(Value::Exception {
                fault: *fault,
                message: args
                    .positional
                    .first()
                    .map(|v| v.to_display())
                    .unwrap_or_default(),
            }),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_one(&mut self, func: &Value, arg: Value) -> ScriptResult<Value> {
        self.call_value(func, Args::positional(vec![arg]))
    }

    fn call_function(&mut self, func: &Rc<Function>, args: Args) -> ScriptResult<Value> {
        self.budget.enter()?;
        let outcome = self.invoke(func, args);
        self.budget.leave();
        outcome
    }

    fn invoke(&mut self, func: &Function, args: Args) -> ScriptResult<Value> {
        let Args {
            positional,
            keywords,
        } = args;
        if positional.len() > func.params.len() {
            return Err(ScriptError::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                func.name,
                func.params.len(),
                positional.len()
            )));
        }
        if let Some((unknown, _)) = keywords
            .iter()
            .find(|(k, _)| !func.params.iter().any(|p| &p.name == k))
        {
            return Err(ScriptError::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                func.name, unknown
            )));
        }
        let mut scope = HashMap::with_capacity(func.params.len());
        let mut positional = positional.into_iter();
        for (i, param) in func.params.iter().enumerate() {
            let value = match positional.next() {
                Some(v) => v,
                None => match keywords.iter().find(|(k, _)| k == &param.name) {
                    Some((_, v)) => v.clone(),
                    None => match func.defaults.get(i) {
                        Some(Some(default)) => default.clone(),
                        _ => {
                            return Err(ScriptError::type_error(format!(
                                "{}() missing required argument: '{}'",
                                func.name, param.name
                            )))
                        }
                    },
                },
            };
            scope.insert(param.name.clone(), value);
        }
        self.frames.push(scope);
        let flow = self.exec_block(&func.body);
        self.frames.pop();
        match flow? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn call_builtin(&mut self, name: &str, args: Args) -> ScriptResult<Value> {
        if let Some((module, func)) = name.rsplit_once('.') {
            let kind = module_kind(module).ok_or_else(|| import_error(module))?;
            return self.call_module(kind, func, args);
        }
        match name {
            "print" => self.print(&args),
            "sorted" if args.kwarg("key").is_some() => {
                let items = args.require(0, "iterable", name)?.iter_values()?;
                let key = args.kwarg("key").cloned().unwrap_or(Value::None);
                let reverse = args.bool_or(99, "reverse", false)?;
                Ok(Value::list(self.sort_by_key(items, &key, reverse)?))
            }
            "min" | "max" if args.kwarg("key").is_some() => self.extremum_by_key(name, &args),
            "map" => {
                let func = args.require(0, "func", name)?.clone();
                let items = args.require(1, "iterable", name)?.iter_values()?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.call_one(&func, item)?);
                }
                Ok(Value::list(out))
            }
            "filter" => {
                let func = args.require(0, "function", name)?.clone();
                let items = args.require(1, "iterable", name)?.iter_values()?;
                let mut out = Vec::new();
                for item in items {
                    let keep = match func {
                        Value::None => item.truthy()?,
                        _ => self.call_one(&func, item.clone())?.truthy()?,
                    };
                    if keep {
                        out.push(item);
                    }
                }
                Ok(Value::list(out))
            }
            _ => builtins::call_builtin(name, &args, self.budget.limits.max_collection_len),
        }
    }

    fn print(&mut self, args: &Args) -> ScriptResult<Value> {
        let text_kw = |name: &str, default: &str| match args.kwarg(name) {
            None | Some(Value::None) => default.to_string(),
            Some(v) => v.to_display(),
        };
        let sep = text_kw("sep", " ");
        let end = text_kw("end", "\n");
        let line = args
            .positional
            .iter()
            .map(|v| v.to_display())
            .collect::<Vec<_>>()
            .join(&sep);
        self.output.push_str(&line);
        self.output.push_str(&end);
        self.budget
            .memory("printed output", self.output.len(), self.budget.limits.max_string_len)?;
        Ok(Value::None)
    }

    fn sort_by_key(&mut self, items: Vec<Value>, key: &Value, reverse: bool) -> ScriptResult<Vec<Value>> {
        if matches!(key, Value::None) {
            let mut items = items;
            sort_values(&mut items, reverse)?;
            return Ok(items);
        }
        let mut keys = Vec::with_capacity(items.len());
        for item in &items {
            keys.push(self.call_one(key, item.clone())?);
        }
        let mut order: Vec<usize> = (0..items.len()).collect();
        let mut failure = None;
        order.sort_by(|&a, &b| match keys[a].compare(&keys[b]) {
            Ok(ord) if reverse => ord.reverse(),
            Ok(ord) => ord,
            Err(e) => {
                failure.get_or_insert(e);
                Ordering::Equal
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(order.into_iter().map(|i| items[i].clone()).collect())
    }

    fn extremum_by_key(&mut self, name: &str, args: &Args) -> ScriptResult<Value> {
        let key = args.kwarg("key").cloned().unwrap_or(Value::None);
        let positional = Args::new(
            args.positional.clone(),
            args.keywords
                .iter()
                .filter(|(k, _)| k == "default")
                .cloned()
                .collect(),
        );
        let items = extremum_candidates(&positional, name)?;
        let mut best = 0;
        let mut best_key = self.call_one(&key, items[0].clone())?;
        for (i, item) in items.iter().enumerate().skip(1) {
            let k = self.call_one(&key, item.clone())?;
            let ord = k.compare(&best_key)?;
            if (name == "max" && ord.is_gt()) || (name == "min" && ord.is_lt()) {
                best = i;
                best_key = k;
            }
        }
        Ok(items[best].clone())
    }

    fn call_module(&mut self, kind: ModuleKind, name: &str, args: Args) -> ScriptResult<Value> {
        match kind {
            ModuleKind::Pandas => {
                let tracked = args
                    .positional
                    .iter()
                    .chain(args.keywords.iter().map(|(_, v)| v))
                    .any(|v| v.is_tracked());
                if tracked {
                    self.proxy.observe_call(name, &args);
                }
                let out = pandas::call_pandas(name, &args)?;
                Ok(if tracked { out.into_tracked() } else { out })
            }
            ModuleKind::Numpy => pandas::call_numpy(name, &args, self.budget.limits.max_collection_len),
            ModuleKind::Pyplot => self.charts.with(|reg| pyplot::call_pyplot(reg, name, &args)),
            ModuleKind::Matplotlib => match name {
                "use" => Ok(Value::None),
                other => Err(ScriptError::attribute(format!(
                    "module 'matplotlib' has no attribute '{}'",
                    other
                ))),
            },
        }
    }

    fn call_method(&mut self, target: &Value, name: &str, args: Args) -> ScriptResult<Value> {
        match target {
            Value::Module(kind) => self.call_module(*kind, name, args),
            Value::Frame(frame) => self.frame_method(target, frame, name, args),
            Value::Series(series) => self.series_method(target, series, name, args),
            Value::GroupBy(group) => self.group_method(target, group, name, args),
            Value::Accessor { kind, target: inner } => self.accessor_method(*kind, inner, name, args),
            Value::Str(s) => methods::str_method(s, name, &args),
            Value::List(list) if name == "sort" && args.kwarg("key").is_some() => self.sort_list(list, &args),
            Value::List(list) => methods::list_method(list, name, &args),
            Value::Tuple(items) => methods::tuple_method(items, name, &args),
            Value::Dict(d) => methods::dict_method(d, name, &args),
            Value::Figure(id) => self.charts.with(|reg| pyplot::call_figure(reg, *id, name, &args)),
            Value::Axes { figure, index } => self
                .charts
                .with(|reg| pyplot::call_axes(reg, *figure, *index, name, &args)),
            Value::Settings => Ok(Value::None),
            Value::Float(f) if name == "is_integer" => Ok(Value::Bool(f.fract() == 0.0)),
            other => Err(ScriptError::attribute(format!(
                "'{}' object has no attribute '{}'",
                other.type_name(),
                name
            ))),
        }
    }

    fn sort_list(&mut self, list: &ListRef, args: &Args) -> ScriptResult<Value> {
        let key = args.kwarg("key").cloned().unwrap_or(Value::None);
        let reverse = args.bool_or(99, "reverse", false)?;
        let items = list.borrow().clone();
        let sorted = self.sort_by_key(items, &key, reverse)?;
        *list.borrow_mut() = sorted;
        Ok(Value::None)
    }

    fn plot(&mut self, target: &Value, kind: Option<&str>, args: &Args) -> ScriptResult<Value> {
        let charts = self.charts;
        self.proxy.intercept(target, "plot", args, || {
            charts.with(|reg| pyplot::plot_accessor(reg, target, kind, args))
        })
    }

    fn frame_method(&mut self, target: &Value, frame: &FrameValue, name: &str, args: Args) -> ScriptResult<Value> {
        match name {
            "apply" => {
                let func = args.require(0, "func", name)?.clone();
                let axis = axis_arg(&args)?;
                let out = self.frame_apply(frame, &func, axis)?;
                Ok(if frame.tracked { out.into_tracked() } else { out })
            }
            "assign" => {
                let mut current = frame.clone();
                for (column, value) in &args.keywords {
                    let value = match value {
                        Value::Function(_) => self.call_one(value, Value::Frame(current.clone()))?,
                        other => other.clone(),
                    };
                    current = table::set_item(&current, &Value::str(column.clone()), &value)?;
                }
                Ok(Value::Frame(current))
            }
            "pipe" => {
                let func = args.require(0, "func", name)?.clone();
                let mut positional = vec![target.clone()];
                positional.extend(args.positional.iter().skip(1).cloned());
                self.call_value(&func, Args::new(positional, args.keywords.clone()))
            }
            "plot" => self.plot(target, None, &args),
            _ => self
                .proxy
                .intercept(target, name, &args, || table::call_method(frame, name, &args)),
        }
    }

    fn frame_apply(&mut self, frame: &FrameValue, func: &Value, axis: i64) -> ScriptResult<Value> {
        if axis == 1 {
            let mut cells = Vec::with_capacity(frame.height());
            for (_, row) in table::row_series(frame)? {
                let out = self.call_one(func, Value::Series(row))?;
                cells.push(Cell::from_value(&out)?);
            }
            return Ok(Value::Series(SeriesValue::from_cells("", &cells, frame.labels()?)));
        }
        let names = frame.column_names();
        let mut results = Vec::with_capacity(names.len());
        for name in &names {
            results.push(self.call_one(func, Value::Series(frame.column(name)?))?);
        }
        if results.iter().all(|r| matches!(r, Value::Series(_))) && !results.is_empty() {
            let columns = results
                .into_iter()
                .zip(&names)
                .filter_map(|(r, name)| match r {
                    Value::Series(mut s) => {
                        s.data.rename(name);
                        Some(s.data)
                    }
                    _ => None,
                })
                .collect::<Vec<_>>();
            let data = DataFrame::new(columns)?;
            return Ok(Value::Frame(FrameValue::new(data)));
        }
        let cells = results
            .iter()
            .map(Cell::from_value)
            .collect::<ScriptResult<Vec<_>>>()?;
        let labels = Labels {
            name: None,
            values: names.into_iter().map(Cell::Str).collect(),
        };
        Ok(Value::Series(SeriesValue::from_cells("", &cells, Some(labels))))
    }

    fn series_method(&mut self, target: &Value, series: &SeriesValue, name: &str, args: Args) -> ScriptResult<Value> {
        let callable = matches!(
            args.positional.first(),
            Some(Value::Function(_)) | Some(Value::Builtin(_))
        );
        match name {
            "apply" | "map" if callable => {
                let func = args.positional[0].clone();
                let mut out = Vec::with_capacity(series.len());
                for cell in series.cells()? {
                    let value = self.call_one(&func, cell.to_value())?;
                    out.push(Cell::from_value(&value)?);
                }
                Ok(Value::Series(series.derived_cells(&out)))
            }
            "plot" => self.plot(target, None, &args),
            _ => self
                .proxy
                .intercept(target, name, &args, || column::call_method(series, name, &args)),
        }
    }

    fn group_method(&mut self, target: &Value, group: &GroupByValue, name: &str, args: Args) -> ScriptResult<Value> {
        match name {
            "apply" => {
                let func = args.require(0, "func", name)?.clone();
                let out = self.group_apply(group, &func)?;
                Ok(if group.tracked { out.into_tracked() } else { out })
            }
            "filter" => {
                let func = args.require(0, "func", name)?.clone();
                let mut kept = Vec::new();
                for (_, frame) in grouped::partitions(group)? {
                    if self.call_one(&func, Value::Frame(frame.clone()))?.truthy()? {
                        kept.push(frame);
                    }
                }
                if kept.is_empty() {
                    return Ok(Value::Frame(group.frame.derived(group.frame.data.head(Some(0)))));
                }
                Ok(Value::Frame(table::concat(&kept)?))
            }
            "transform" => match args.positional.first() {
                Some(Value::Builtin(func)) => {
                    let short = func.rsplit('.').next().unwrap_or(func);
                    let args = Args::positional(vec![Value::str(short)]);
                    grouped::call_method(group, name, &args)
                }
                Some(Value::Function(_)) => Err(ScriptError::unsupported(
                    "transform() with a custom function is not supported; use an aggregation name",
                )),
                _ => self
                    .proxy
                    .intercept(target, name, &args, || grouped::call_method(group, name, &args)),
            },
            _ => self
                .proxy
                .intercept(target, name, &args, || grouped::call_method(group, name, &args)),
        }
    }

    fn group_apply(&mut self, group: &GroupByValue, func: &Value) -> ScriptResult<Value> {
        let mut keys = Vec::new();
        let mut results = Vec::new();
        if matches!(group.selection, Some(crate::frame::Selection::One(_))) {
            for (key, series) in grouped::series_partitions(group)? {
                keys.push(key);
                results.push(self.call_one(func, Value::Series(series))?);
            }
        } else {
            for (key, frame) in grouped::partitions(group)? {
                keys.push(key);
                results.push(self.call_one(func, Value::Frame(frame))?);
            }
        }
        if results.iter().all(|r| matches!(r, Value::Frame(_))) && !results.is_empty() {
            let frames: Vec<FrameValue> = results
                .into_iter()
                .filter_map(|r| match r {
                    Value::Frame(f) => Some(f),
                    _ => None,
                })
                .collect();
            return Ok(Value::Frame(table::concat(&frames)?));
        }
        if results.iter().any(|r| matches!(r, Value::Frame(_) | Value::Series(_))) {
            return Err(ScriptError::unsupported(
                "groupby apply must return a scalar or a DataFrame for every group",
            ));
        }
        let cells = results
            .iter()
            .map(Cell::from_value)
            .collect::<ScriptResult<Vec<_>>>()?;
        let labels = grouped::partition_labels(group, &keys)?;
        let name = match &group.selection {
            Some(crate::frame::Selection::One(n)) => n.clone(),
            _ => String::new(),
        };
        Ok(Value::Series(SeriesValue::from_cells(&name, &cells, Some(labels))))
    }

    fn accessor_method(&mut self, kind: AccessorKind, inner: &Value, name: &str, args: Args) -> ScriptResult<Value> {
        match (kind, inner) {
            (AccessorKind::Plot, _) => self.plot(inner, Some(name), &args),
            (AccessorKind::Str, Value::Series(series)) => column::string_method(series, name, &args),
            (AccessorKind::Dt, Value::Series(series)) => column::datetime_method(series, name, &args),
            (kind, _) => Err(ScriptError::attribute(format!(
                "'{:?}Accessor' object has no attribute '{}'",
                kind, name
            ))),
        }
    }
}

/// Strip `inplace=` from the arguments, returning its value
fn take_inplace(args: &mut Args) -> ScriptResult<bool> {
    match args.keywords.iter().position(|(k, _)| k == "inplace") {
        Some(pos) => {
            let (_, value) = args.keywords.remove(pos);
            value.truthy()
        }
        None => Ok(false),
    }
}

fn axis_arg(args: &Args) -> ScriptResult<i64> {
    match args.get(1, "axis") {
        None => Ok(0),
        Some(Value::Str(s)) if s == "columns" => Ok(1),
        Some(Value::Str(s)) if s == "index" => Ok(0),
        Some(v) => v
            .as_int()
            .ok_or_else(|| ScriptError::value(format!("No axis named {}", v.repr()))),
    }
}

fn index_sequence(items: &[Value], key: &Value, tuple: bool) -> ScriptResult<Value> {
    let kind = if tuple { "tuple" } else { "list" };
    match key {
        Value::Slice { lower, upper, step } => {
            let picked: Vec<Value> = slice_positions(items.len(), *lower, *upper, *step)?
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(if tuple { Value::tuple(picked) } else { Value::list(picked) })
        }
        // axes[0, 1] on a grid of axes
        Value::Tuple(parts) => {
            let mut current = Value::tuple(items.to_vec());
            for part in parts.iter() {
                let inner = current.iter_values()?;
                current = index_sequence(&inner, part, false)?;
            }
            Ok(current)
        }
        other => {
            let idx = list_index(items.len(), other).map_err(|e| {
                if e.fault == Fault::Index {
                    ScriptError::index(format!("{} index out of range", kind))
                } else {
                    ScriptError::type_error(format!(
                        "{} indices must be integers or slices, not {}",
                        kind,
                        other.type_name()
                    ))
                }
            })?;
            Ok(items[idx].clone())
        }
    }
}

fn index_string(s: &str, key: &Value) -> ScriptResult<Value> {
    let chars: Vec<char> = s.chars().collect();
    match key {
        Value::Slice { lower, upper, step } => Ok(Value::str(
            slice_positions(chars.len(), *lower, *upper, *step)?
                .into_iter()
                .map(|i| chars[i])
                .collect::<String>(),
        )),
        other => {
            let idx = list_index(chars.len(), other)
                .map_err(|_| ScriptError::index("string index out of range"))?;
            Ok(Value::str(chars[idx].to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::lineage::LineageRules;
    use crate::script::parser::parse;
    use polars::prelude::*;
    use std::time::Duration;

    fn dataset() -> Dataset {
        Dataset::new(
            df!(
                "region" => &["East", "West", "East", "North"],
                "sales" => &[100i64, 400, 100, 50],
                "units" => &[1i64, 4, 2, 1]
            )
            .unwrap(),
        )
    }

    fn limits() -> ExecutionLimits {
        ExecutionLimits {
            timeout: Duration::from_secs(5),
            ..ExecutionLimits::default()
        }
    }

    /// Run a script and return (namespace value of `name`, print output, columns observed)
    fn run_script(source: &str, name: &str) -> (ScriptResult<Option<Value>>, String, Vec<String>) {
        run_with(source, name, limits())
    }

    fn run_with(source: &str, name: &str, limits: ExecutionLimits) -> (ScriptResult<Option<Value>>, String, Vec<String>) {
        let data = dataset();
        let mut proxy = TrackedProxy::new(&data, LineageRules::default());
        let lease = RegistryLease::acquire(8);
        let program = parse(source).unwrap();
        let frame = proxy.value();
        let (outcome, output) = {
            let mut interp = Interpreter::new(&mut proxy, &lease, &limits);
            interp.bind("df", frame);
            let outcome = interp.run(&program).map(|_| interp.globals().get(name).cloned());
            (outcome, interp.output().to_string())
        };
        (outcome, output, proxy.log().names())
    }

    #[test]
    fn test_panic_keeps_output_and_lineage() {
        let data = dataset();
        let mut proxy = TrackedProxy::new(&data, LineageRules::default());
        let lease = RegistryLease::acquire(8);
        let program = parse("total = df['sales'].sum()\nprint('before')\n").unwrap();
        let frame = proxy.value();
        let (err, output) = {
            let mut interp = Interpreter::new(&mut proxy, &lease, &limits());
            interp.bind("df", frame);
            interp.run(&program).unwrap();
            let err = interp
                .guarded(|_| -> ScriptResult<()> { panic!("engine invariant broken") })
                .unwrap_err();
            assert!(interp.globals().contains_key("total"));
            (err, interp.output().to_string())
        };
        assert_eq!(err.fault, Fault::Internal);
        assert_eq!(err.line, Some(2));
        assert!(err.message.contains("engine invariant broken"));
        assert_eq!(output, "before\n");
        assert_eq!(proxy.log().names(), vec!["sales"]);
    }

    #[test]
    fn test_integer_overflow_edges() {
        let source = "\
low = -9223372036854775807 - 1
a = low % -1
b = low // -1
c = -low
d = abs(low)
e = list(range(0, 10, low))
f = list(range(9223372036854775806, 9223372036854775807 + 0))
";
        let (a, _, _) = run_script(source, "a");
        assert!(matches!(a.unwrap(), Some(Value::Int(0))));
        for name in ["b", "c", "d"] {
            let (v, _, _) = run_script(source, name);
            match v.unwrap() {
                Some(Value::Float(f)) => assert_eq!(f, 9.223372036854775808e18),
                other => panic!("{}: {:?}", name, other),
            }
        }
        let (e, _, _) = run_script(source, "e");
        assert_eq!(e.unwrap().map(|v| v.repr()), Some("[]".to_string()));
        let (f, _, _) = run_script(source, "f");
        assert_eq!(f.unwrap().map(|v| v.repr()), Some("[9223372036854775806]".to_string()));

        let (huge, _, _) = run_script("r = range(-9223372036854775807, 9223372036854775807)", "r");
        assert_eq!(huge.unwrap_err().fault, Fault::MemoryLimit);
    }

    #[test]
    fn test_groupby_sum_records_columns() {
        let (value, _, columns) = run_script("result = df.groupby('region')['sales'].sum()", "result");
        let value = value.unwrap().unwrap();
        assert_eq!(
            value.to_json(),
            serde_json::json!({"East": 200, "North": 50, "West": 400})
        );
        assert_eq!(columns, vec!["region", "sales"]);
    }

    #[test]
    fn test_functions_loops_and_print() {
        let source = "\
def total(xs, start=0):
    acc = start
    for x in xs:
        if x > 2:
            continue
        acc += x
    return acc

result = total([1, 2, 3, 4], start=10)
print(f'total={result:.1f}')
";
        let (value, output, _) = run_script(source, "result");
        assert!(matches!(value.unwrap().unwrap(), Value::Int(13)));
        assert_eq!(output, "total=13.0\n");
    }

    #[test]
    fn test_try_except_catches_key_error() {
        let source = "\
try:
    x = df['profit']
except KeyError as e:
    result = 'missing ' + str(e)
finally:
    done = True
";
        let (value, _, columns) = run_script(source, "result");
        assert_eq!(value.unwrap().unwrap().to_display(), "missing 'profit'");
        assert!(columns.is_empty());
    }

    #[test]
    fn test_uncaught_fault_carries_line() {
        let (value, _, _) = run_script("a = 1\nb = df['profit']\n", "a");
        let err = value.unwrap_err();
        assert_eq!(err.fault, Fault::Key);
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn test_infinite_loop_hits_budget() {
        let data = dataset();
        let mut proxy = TrackedProxy::new(&data, LineageRules::default());
        let lease = RegistryLease::acquire(8);
        let limits = ExecutionLimits {
            timeout: Duration::from_millis(50),
            ..ExecutionLimits::default()
        };
        let program = parse("while True:\n    try:\n        pass\n    except Exception:\n        pass\n").unwrap();
        let mut interp = Interpreter::new(&mut proxy, &lease, &limits);
        let err = interp.run(&program).unwrap_err();
        assert!(matches!(err.fault, Fault::Timeout | Fault::OperationLimit));
    }

    #[test]
    fn test_recursion_limit() {
        let shallow = ExecutionLimits {
            max_call_depth: 8,
            ..limits()
        };
        let (value, _, _) = run_with("def f(n):\n    return f(n + 1)\nresult = f(0)\n", "result", shallow);
        assert_eq!(value.unwrap_err().fault, Fault::RecursionLimit);
    }

    #[test]
    fn test_column_assignment_rebinds_frame() {
        let source = "\
df['revenue'] = df['sales'] * df['units']
df.dropna(inplace=True)
result = df['revenue'].max()
";
        let (value, _, columns) = run_script(source, "result");
        assert!(matches!(value.unwrap().unwrap(), Value::Int(1600)));
        assert_eq!(columns, vec!["sales", "units"]);
    }

    #[test]
    fn test_attribute_access_and_lambda() {
        let source = "\
top = sorted(df.region.unique().tolist(), key=lambda r: len(r), reverse=True)
result = top[0]
";
        let (value, _, columns) = run_script(source, "result");
        assert_eq!(value.unwrap().unwrap().to_display(), "North");
        assert_eq!(columns, vec!["region"]);
    }

    #[test]
    fn test_disallowed_import() {
        let (value, _, _) = run_script("import socket\n", "x");
        assert_eq!(value.unwrap_err().fault, Fault::Import);
    }

    #[test]
    fn test_plotting_creates_figures() {
        let source = "\
import matplotlib.pyplot as plt
fig, ax = plt.subplots()
ax.bar(df['region'], df['sales'])
ax.set_title('Sales')
";
        let (value, _, columns) = run_script(source, "fig");
        assert!(matches!(value.unwrap().unwrap(), Value::Figure(_)));
        assert_eq!(columns, vec!["region", "sales"]);
    }

    #[test]
    fn test_loc_with_mask() {
        let source = "result = df.loc[df['sales'] > 90, 'region'].tolist()";
        let (value, _, columns) = run_script(source, "result");
        assert_eq!(value.unwrap().unwrap().repr(), "['East', 'West', 'East']");
        assert_eq!(columns, vec!["region", "sales"]);
    }
}
