// ⚙️ Configuration - warehouse.toml
//
// Every field has a default, so an empty file (or no file) is a valid config.
// CLI flags override file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WarehouseError};

pub const CONFIG_FILE_NAME: &str = "warehouse.toml";

// ============================================================================
// CONFIG STRUCTS
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WarehouseConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub income: IncomeConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    #[serde(default = "default_input")]
    pub input: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// SQLite publish target. Publishing to it is skipped when unset.
    #[serde(default)]
    pub database: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input: default_input(),
            output_dir: default_output_dir(),
            database: None,
        }
    }
}

fn default_input() -> PathBuf {
    PathBuf::from("data/raw/Churn_Modelling.csv")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data/processed")
}

/// `[snapshot]` section: the (year, month) stamped on every fact row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotConfig {
    #[serde(default = "default_year")]
    pub year: i32,

    #[serde(default = "default_month")]
    pub month: u32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            year: default_year(),
            month: default_month(),
        }
    }
}

fn default_year() -> i32 {
    2019
}
fn default_month() -> u32 {
    12
}

/// Which record field feeds the income bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IncomeField {
    #[default]
    EstimatedSalary,
    Balance,
}

impl IncomeField {
    pub fn column(&self) -> &'static str {
        match self {
            IncomeField::EstimatedSalary => "EstimatedSalary",
            IncomeField::Balance => "Balance",
        }
    }
}

/// How the two income thresholds are obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IncomeBanding {
    /// Use `low_threshold` / `high_threshold` as given.
    #[default]
    Fixed,
    /// Compute both thresholds from the build's own records (33.3% / 66.7% quantiles).
    Tertiles,
}

/// `[income]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncomeConfig {
    #[serde(default)]
    pub field: IncomeField,

    #[serde(default)]
    pub banding: IncomeBanding,

    /// Values below this are `Low`.
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,

    /// Values at or above this are `High`.
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
}

impl Default for IncomeConfig {
    fn default() -> Self {
        Self {
            field: IncomeField::default(),
            banding: IncomeBanding::default(),
            low_threshold: default_low_threshold(),
            high_threshold: default_high_threshold(),
        }
    }
}

// Tertile cut points of a uniform 0..200k salary distribution.
fn default_low_threshold() -> f64 {
    66_667.0
}
fn default_high_threshold() -> f64 {
    133_333.0
}

// ============================================================================
// LOADING + VALIDATION
// ============================================================================

impl WarehouseConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=12).contains(&self.snapshot.month) {
            return Err(WarehouseError::config(format!(
                "snapshot.month must be in 1..=12, got {}",
                self.snapshot.month
            )));
        }

        let income = &self.income;
        if !income.low_threshold.is_finite() || !income.high_threshold.is_finite() {
            return Err(WarehouseError::config("income thresholds must be finite numbers"));
        }
        if income.banding == IncomeBanding::Fixed && income.low_threshold >= income.high_threshold {
            return Err(WarehouseError::config(format!(
                "income.low_threshold ({}) must be below income.high_threshold ({})",
                income.low_threshold, income.high_threshold
            )));
        }

        Ok(())
    }
}

/// Parse and validate a config from TOML text.
pub fn parse_config(text: &str) -> Result<WarehouseConfig> {
    let config: WarehouseConfig =
        toml::from_str(text).map_err(|e| WarehouseError::config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<WarehouseConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(WarehouseConfig::default());
    }

    let text = std::fs::read_to_string(path).map_err(|e| WarehouseError::io(path, e))?;
    let config = parse_config(&text)?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, WarehouseConfig::default());
        assert_eq!(config.snapshot.year, 2019);
        assert_eq!(config.snapshot.month, 12);
        assert_eq!(config.income.field, IncomeField::EstimatedSalary);
        assert_eq!(config.income.banding, IncomeBanding::Fixed);
        assert!(config.paths.database.is_none());
    }

    #[test]
    fn test_partial_config_overrides() {
        let config = parse_config(
            r#"
            [snapshot]
            month = 6

            [income]
            field = "balance"
            banding = "tertiles"
            "#,
        )
        .unwrap();

        assert_eq!(config.snapshot.year, 2019);
        assert_eq!(config.snapshot.month, 6);
        assert_eq!(config.income.field, IncomeField::Balance);
        assert_eq!(config.income.banding, IncomeBanding::Tertiles);
        assert_eq!(config.income.low_threshold, 66_667.0);
    }

    #[test]
    fn test_rejects_bad_month() {
        let err = parse_config("[snapshot]\nmonth = 13\n").unwrap_err();
        assert!(err.to_string().contains("snapshot.month"));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = parse_config("[income]\nlow_threshold = 5.0\nhigh_threshold = 1.0\n").unwrap_err();
        assert!(matches!(err, WarehouseError::Config { .. }));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config, WarehouseConfig::default());
    }
}
