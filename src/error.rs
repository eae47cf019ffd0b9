// 🚨 Error Taxonomy - every failure is build-fatal
//
// The library returns WarehouseError; binaries wrap it with anyhow for context.

use std::path::PathBuf;

use crate::validation::ViolationReport;

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    /// Malformed input field. Never expected given the upstream contract.
    #[error("invalid record at row {row}: {field}: {reason}")]
    InvalidRecord {
        row: usize,
        field: String,
        reason: String,
    },

    /// A natural key was looked up before its dimension registered it.
    #[error("unknown {dimension} key: {key}")]
    UnknownKey { dimension: String, key: String },

    /// Post-assembly invariants failed; carries every violation found.
    #[error("schema validation failed with {count} violation(s):\n{0}", count = .0.len())]
    SchemaViolation(ViolationReport),

    #[error("config error: {message}")]
    Config { message: String },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WarehouseError>;

impl WarehouseError {
    pub fn invalid_record(row: usize, field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            row,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the three kinds a build can fail with on its own data,
    /// as opposed to environment failures (disk, database, config).
    pub fn is_build_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidRecord { .. } | Self::UnknownKey { .. } | Self::SchemaViolation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_record_display() {
        let err = WarehouseError::invalid_record(7, "EstimatedSalary", "not a finite number");
        assert_eq!(
            err.to_string(),
            "invalid record at row 7: EstimatedSalary: not a finite number"
        );
        assert!(err.is_build_failure());
    }

    #[test]
    fn test_config_error_is_not_build_failure() {
        let err = WarehouseError::config("low_threshold must be below high_threshold");
        assert!(err.to_string().starts_with("config error:"));
        assert!(!err.is_build_failure());
    }
}
