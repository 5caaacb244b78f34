//! Analysis script runtime
//!
//! Lexer, parser and tree-walking interpreter for the dynamic scripting dialect
//! that analysis code is written in. Only the constructs analysis scripts use are
//! understood; the module allow-list is pandas, numpy and matplotlib.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod format;
pub mod interpreter;
pub mod lexer;
pub mod methods;
pub mod ops;
pub mod parser;
pub mod value;

pub use error::{Fault, ScriptError, ScriptResult};
pub use interpreter::{Budget, Interpreter};
pub use parser::parse;
pub use value::Value;
