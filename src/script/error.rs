//! Script faults
//!
//! Faults raised while parsing or running a script. Names follow the conventions
//! script authors expect (`KeyError`, `TypeError`, ...); budget breaches are separate
//! variants so the classifier can tell them apart and `except` cannot swallow them.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Syntax,
    Name,
    Key,
    Type,
    Value,
    Index,
    ZeroDivision,
    Attribute,
    Import,
    NotImplemented,
    /// Raised by the dataframe engine
    Frame,
    /// Generic `raise Exception(...)`
    Exception,
    /// Rust panic caught at the sandbox boundary
    Internal,
    Timeout,
    OperationLimit,
    MemoryLimit,
    RecursionLimit,
    FigureLimit,
}

impl Fault {
    pub fn name(&self) -> &'static str {
        match self {
            Fault::Syntax => "SyntaxError",
            Fault::Name => "NameError",
            Fault::Key => "KeyError",
            Fault::Type => "TypeError",
            Fault::Value => "ValueError",
            Fault::Index => "IndexError",
            Fault::ZeroDivision => "ZeroDivisionError",
            Fault::Attribute => "AttributeError",
            Fault::Import => "ImportError",
            Fault::NotImplemented => "NotImplementedError",
            Fault::Frame => "ComputeError",
            Fault::Exception => "Exception",
            Fault::Internal => "InternalError",
            Fault::Timeout => "TimeoutError",
            Fault::OperationLimit => "OperationLimitExceeded",
            Fault::MemoryLimit => "MemoryError",
            Fault::RecursionLimit => "RecursionError",
            Fault::FigureLimit => "FigureLimitExceeded",
        }
    }

    /// Resolve a name used in `raise X(...)` or `except X:`
    pub fn from_name(name: &str) -> Option<Fault> {
        let fault = match name {
            "SyntaxError" => Fault::Syntax,
            "NameError" => Fault::Name,
            "KeyError" => Fault::Key,
            "TypeError" => Fault::Type,
            "ValueError" => Fault::Value,
            "IndexError" => Fault::Index,
            "ZeroDivisionError" | "ArithmeticError" => Fault::ZeroDivision,
            "AttributeError" => Fault::Attribute,
            "ImportError" | "ModuleNotFoundError" => Fault::Import,
            "NotImplementedError" => Fault::NotImplemented,
            "ComputeError" => Fault::Frame,
            "Exception" | "RuntimeError" => Fault::Exception,
            _ => return None,
        };
        Some(fault)
    }

    /// Budget breaches terminate the run; scripts cannot catch them
    pub fn is_catchable(&self) -> bool {
        !matches!(
            self,
            Fault::Timeout
                | Fault::OperationLimit
                | Fault::MemoryLimit
                | Fault::RecursionLimit
                | Fault::FigureLimit
                | Fault::Internal
        )
    }

    /// Whether an `except <handler>` clause catches this fault
    pub fn matches_handler(&self, handler: &str) -> bool {
        match handler {
            "Exception" | "BaseException" => self.is_catchable(),
            "LookupError" => matches!(self, Fault::Key | Fault::Index),
            other => Fault::from_name(other) == Some(*self),
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("{}: {}", .fault.name(), .message)]
pub struct ScriptError {
    pub fault: Fault,
    pub message: String,
    /// 1-based script line, attached by the interpreter
    pub line: Option<usize>,
}

/// Text of a caught panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl ScriptError {
    pub fn new(fault: Fault, message: impl Into<String>) -> Self {
        Self {
            fault,
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self::new(Fault::Syntax, message).at_line(line)
    }

    pub fn name(message: impl Into<String>) -> Self {
        Self::new(Fault::Name, message)
    }

    pub fn key(message: impl Into<String>) -> Self {
        Self::new(Fault::Key, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(Fault::Type, message)
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(Fault::Value, message)
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::new(Fault::Index, message)
    }

    pub fn attribute(message: impl Into<String>) -> Self {
        Self::new(Fault::Attribute, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(Fault::NotImplemented, message)
    }
}

impl From<polars::prelude::PolarsError> for ScriptError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        let text = err.to_string();
        let lowered = text.to_lowercase();
        if lowered.contains("not found") && (lowered.contains("column") || lowered.contains("name")) {
            ScriptError::key(text)
        } else if lowered.contains("out of memory") || lowered.contains("capacity overflow") {
            ScriptError::new(Fault::MemoryLimit, text)
        } else {
            ScriptError::new(Fault::Frame, text)
        }
    }
}

pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_fault_name() {
        let err = ScriptError::key("'profit'").at_line(3);
        assert_eq!(err.to_string(), "KeyError: 'profit'");
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn test_first_line_wins() {
        let err = ScriptError::value("bad").at_line(2).at_line(9);
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn test_budget_faults_are_not_catchable() {
        assert!(!Fault::Timeout.matches_handler("Exception"));
        assert!(Fault::Key.matches_handler("Exception"));
        assert!(Fault::Key.matches_handler("LookupError"));
        assert!(!Fault::Type.matches_handler("KeyError"));
    }
}
