//! Code Validator
//!
//! Pre-execution screen: a case-insensitive blocklist of host-escape idioms, then a
//! parse check. A pass does not make a script safe; the interpreter's module
//! allow-list and budgets are the real boundary.

use crate::script::error::ScriptError;
use crate::script::parser::parse;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref BLOCKLIST: Vec<(&'static str, Regex)> = [
        ("import os", r"(?i)\bimport\s+os\b"),
        ("import sys", r"(?i)\bimport\s+sys\b"),
        ("import subprocess", r"(?i)\bimport\s+subprocess\b"),
        ("from os/sys/subprocess import", r"(?i)\bfrom\s+(?:os|sys|subprocess)\b"),
        ("__import__", r"(?i)__import__"),
        ("eval(", r"(?i)\beval\s*\("),
        ("exec(", r"(?i)\bexec\s*\("),
        ("compile(", r"(?i)\bcompile\s*\("),
        ("open(", r"(?i)\bopen\s*\("),
        ("file(", r"(?i)\bfile\s*\("),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).unwrap()))
    .collect();
}

#[derive(Error, Debug, Clone)]
pub enum Rejection {
    #[error("Dangerous operation detected: {pattern}")]
    Blocked { pattern: &'static str, line: usize },

    #[error("{0}")]
    Syntax(ScriptError),
}

#[derive(Debug, Clone, Default)]
pub struct CodeValidator;

impl CodeValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, source: &str) -> Result<(), Rejection> {
        for (pattern, regex) in BLOCKLIST.iter() {
            if let Some(m) = regex.find(source) {
                let line = source[..m.start()].matches('\n').count() + 1;
                return Err(Rejection::Blocked {
                    pattern: *pattern,
                    line,
                });
            }
        }
        parse(source).map_err(Rejection::Syntax)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_analysis_code() {
        let validator = CodeValidator::new();
        let source = "import pandas as pd\nresult = df.groupby('region')['sales'].sum()\n";
        assert!(validator.validate(source).is_ok());
    }

    #[test]
    fn test_rejects_blocked_patterns() {
        let validator = CodeValidator::new();
        match validator.validate("x = 1\nIMPORT OS\n") {
            Err(Rejection::Blocked { pattern, line }) => {
                assert_eq!(pattern, "import os");
                assert_eq!(line, 2);
            }
            other => panic!("expected a blocklist rejection, got {:?}", other),
        }
        assert!(validator.validate("data = open('/etc/passwd')").is_err());
        // longer identifiers ending in a blocked name are fine
        assert!(validator.validate("result = profile(x)").is_ok());
    }

    #[test]
    fn test_rejects_syntax_errors() {
        let validator = CodeValidator::new();
        assert!(matches!(
            validator.validate("result = (1 +"),
            Err(Rejection::Syntax(_))
        ));
    }
}
