//! Error Classifier
//!
//! Maps script faults into the small taxonomy callers act on, with a short
//! user-facing message per kind and a redacted detail string.

use super::validator::Rejection;
use crate::script::error::{Fault, ScriptError};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_DETAIL_LEN: usize = 500;

lazy_static! {
    static ref UNIX_PATH: Regex = Regex::new(r"(?:/[A-Za-z0-9._\-]+){2,}/?").unwrap();
    static ref WINDOWS_PATH: Regex = Regex::new(r"[A-Za-z]:\\(?:[^\\\s'\x22]+\\?)+").unwrap();
}

/// Failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    CompileFailure,
    RuntimeFailure,
    Timeout,
    ResourceExhaustion,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::CompileFailure => write!(f, "CompileFailure"),
            ErrorKind::RuntimeFailure => write!(f, "RuntimeFailure"),
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::ResourceExhaustion => write!(f, "ResourceExhaustion"),
        }
    }
}

impl ErrorKind {
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::CompileFailure => "The analysis code could not be compiled.",
            ErrorKind::RuntimeFailure => "The analysis code failed while running.",
            ErrorKind::Timeout => "The analysis took too long and was stopped.",
            ErrorKind::ResourceExhaustion => "The analysis exceeded its resource limits.",
        }
    }

    /// Timeouts and exhausted budgets end the request
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::ResourceExhaustion)
    }
}

/// Fault description attached to an execution result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    /// Fault name and redacted description
    pub detail: String,
    /// 1-based script line, when known
    pub line: Option<usize>,
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} (line {}): {}", self.kind, line, self.detail),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}

/// Strip host paths from a fault description and bound its length
pub fn redact(message: &str) -> String {
    let without_unix = UNIX_PATH.replace_all(message, "<path>");
    let redacted = WINDOWS_PATH.replace_all(&without_unix, "<path>");
    let mut out: String = redacted.chars().take(MAX_DETAIL_LEN).collect();
    if redacted.chars().count() > MAX_DETAIL_LEN {
        out.push_str("...");
    }
    out
}

/// Error classifier
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn kind_of(&self, fault: Fault) -> ErrorKind {
        match fault {
            Fault::Syntax => ErrorKind::CompileFailure,
            Fault::Timeout => ErrorKind::Timeout,
            Fault::OperationLimit | Fault::MemoryLimit | Fault::RecursionLimit | Fault::FigureLimit => {
                ErrorKind::ResourceExhaustion
            }
            _ => ErrorKind::RuntimeFailure,
        }
    }

    /// Classify a fault raised while parsing or running a script
    pub fn classify(&self, error: &ScriptError) -> ErrorInfo {
        let kind = self.kind_of(error.fault);
        let detail = if error.message.is_empty() {
            error.fault.name().to_string()
        } else {
            format!("{}: {}", error.fault.name(), redact(&error.message))
        };
        ErrorInfo {
            kind,
            message: kind.user_message().to_string(),
            detail,
            line: error.line,
        }
    }

    /// Validator rejections are compile failures
    pub fn classify_rejection(&self, rejection: &Rejection) -> ErrorInfo {
        match rejection {
            Rejection::Syntax(error) => self.classify(error),
            Rejection::Blocked { line, .. } => ErrorInfo {
                kind: ErrorKind::CompileFailure,
                message: ErrorKind::CompileFailure.user_message().to_string(),
                detail: redact(&rejection.to_string()),
                line: Some(*line),
            },
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_missing_column() {
        let classifier = ErrorClassifier::new();
        let error = ScriptError::key("'profit'").at_line(3);
        let info = classifier.classify(&error);
        assert_eq!(info.kind, ErrorKind::RuntimeFailure);
        assert_eq!(info.detail, "KeyError: 'profit'");
        assert_eq!(info.line, Some(3));
    }

    #[test]
    fn test_classify_budget_faults() {
        let classifier = ErrorClassifier::new();
        let timeout = ScriptError::new(Fault::Timeout, "execution exceeded 100 ms");
        assert_eq!(classifier.classify(&timeout).kind, ErrorKind::Timeout);
        let memory = ScriptError::new(Fault::MemoryLimit, "list too large");
        assert_eq!(classifier.classify(&memory).kind, ErrorKind::ResourceExhaustion);
        assert!(ErrorKind::ResourceExhaustion.is_fatal());
        let syntax = ScriptError::syntax("invalid syntax", 1);
        assert_eq!(classifier.classify(&syntax).kind, ErrorKind::CompileFailure);
    }

    #[test]
    fn test_redact_host_paths() {
        let redacted = redact("cannot read /home/alice/data/secret.csv or C:\\Users\\bob\\x.csv");
        assert!(!redacted.contains("alice"));
        assert!(!redacted.contains("bob"));
        assert!(redacted.contains("<path>"));
    }
}
