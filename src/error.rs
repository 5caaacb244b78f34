use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::prelude::PolarsError> for SandboxError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        SandboxError::Polars(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SandboxError::Config("SANDBOX_TIMEOUT_MS must be a number".to_string());
        assert_eq!(err.to_string(), "Configuration error: SANDBOX_TIMEOUT_MS must be a number");

        let err: SandboxError = std::io::Error::new(std::io::ErrorKind::NotFound, "sales.csv").into();
        assert!(matches!(err, SandboxError::Io(_)));
    }
}
