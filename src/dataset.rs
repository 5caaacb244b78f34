//! Dataset handed to a sandboxed execution

use crate::error::{Result, SandboxError};
use polars::prelude::*;
use std::path::Path;

/// Ordered named columns over ordered rows, owned by the caller
#[derive(Debug, Clone)]
pub struct Dataset {
    frame: DataFrame,
}

impl Dataset {
    pub fn new(frame: DataFrame) -> Self {
        Self { frame }
    }

    /// Load a CSV file with a header row
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SandboxError::Dataset(format!(
                "CSV file not found: {}",
                path.display()
            )));
        }
        let frame = LazyCsvReader::new(path)
            .with_has_header(true)
            .with_infer_schema_length(Some(1000))
            .finish()
            .map_err(|e| SandboxError::Dataset(format!("Failed to read CSV: {}", e)))?
            .collect()
            .map_err(|e| SandboxError::Dataset(format!("Failed to collect: {}", e)))?;
        Ok(Self { frame })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.get_column_names().contains(&name)
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }
}

impl From<DataFrame> for Dataset {
    fn from(frame: DataFrame) -> Self {
        Self::new(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "region,sales\nEast,10\nWest,20").unwrap();
        let dataset = Dataset::from_csv(file.path()).unwrap();
        assert_eq!(dataset.column_names(), vec!["region", "sales"]);
        assert_eq!(dataset.height(), 2);
        assert!(dataset.has_column("sales"));
    }

    #[test]
    fn test_missing_file() {
        let err = Dataset::from_csv("/nonexistent/data.csv").unwrap_err();
        assert!(matches!(err, SandboxError::Dataset(_)));
    }
}
