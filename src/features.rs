// 🏷️ Feature Deriver - age and income buckets for the segment dimension

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{IncomeBanding, IncomeConfig, IncomeField};
use crate::error::{Result, WarehouseError};
use crate::record::CustomerRecord;

/// Ages above this cannot be a real customer; the deriver refuses to bucket them.
const MAX_PLAUSIBLE_AGE: u32 = 150;

// ============================================================================
// AGE GROUP
// ============================================================================

/// Contiguous age buckets. Each edge is inclusive of the bound in its label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgeGroup {
    #[serde(rename = "<=25")]
    UpTo25,
    #[serde(rename = "26-35")]
    From26To35,
    #[serde(rename = "36-45")]
    From36To45,
    #[serde(rename = "46-55")]
    From46To55,
    #[serde(rename = ">=56")]
    From56,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 5] = [
        AgeGroup::UpTo25,
        AgeGroup::From26To35,
        AgeGroup::From36To45,
        AgeGroup::From46To55,
        AgeGroup::From56,
    ];

    pub fn from_age(age: u32) -> Self {
        match age {
            0..=25 => AgeGroup::UpTo25,
            26..=35 => AgeGroup::From26To35,
            36..=45 => AgeGroup::From36To45,
            46..=55 => AgeGroup::From46To55,
            _ => AgeGroup::From56,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AgeGroup::UpTo25 => "<=25",
            AgeGroup::From26To35 => "26-35",
            AgeGroup::From36To45 => "36-45",
            AgeGroup::From46To55 => "46-55",
            AgeGroup::From56 => ">=56",
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AgeGroup {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AgeGroup::ALL
            .into_iter()
            .find(|g| g.label() == s)
            .ok_or_else(|| format!("unknown age group: {s}"))
    }
}

// ============================================================================
// INCOME GROUP
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IncomeGroup {
    Low,
    Mid,
    High,
}

impl IncomeGroup {
    pub const ALL: [IncomeGroup; 3] = [IncomeGroup::Low, IncomeGroup::Mid, IncomeGroup::High];

    pub fn label(&self) -> &'static str {
        match self {
            IncomeGroup::Low => "Low",
            IncomeGroup::Mid => "Mid",
            IncomeGroup::High => "High",
        }
    }
}

impl fmt::Display for IncomeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for IncomeGroup {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        IncomeGroup::ALL
            .into_iter()
            .find(|g| g.label() == s)
            .ok_or_else(|| format!("unknown income group: {s}"))
    }
}

// ============================================================================
// FEATURE DERIVER
// ============================================================================

/// Resolved bucketing rules for one build.
///
/// Fixed thresholds are left-closed: `value < low_threshold` is Low and
/// `value >= high_threshold` is High. Tertile cut points are right-closed:
/// `value <= low_threshold` is Low and `value > high_threshold` is High.
/// Everything in between is Mid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureDeriver {
    pub field: IncomeField,
    pub banding: IncomeBanding,
    pub low_threshold: f64,
    pub high_threshold: f64,
}

impl FeatureDeriver {
    pub fn new(field: IncomeField, low_threshold: f64, high_threshold: f64) -> Self {
        FeatureDeriver {
            field,
            banding: IncomeBanding::Fixed,
            low_threshold,
            high_threshold,
        }
    }

    /// Deriver over cut points computed from the build's own records.
    pub fn tertiles(field: IncomeField, low_threshold: f64, high_threshold: f64) -> Self {
        FeatureDeriver {
            banding: IncomeBanding::Tertiles,
            ..Self::new(field, low_threshold, high_threshold)
        }
    }

    /// Resolve thresholds for a build. In tertile mode the cut points come
    /// from the records themselves, so every record is checked first.
    pub fn from_config(config: &IncomeConfig, records: &[CustomerRecord]) -> Result<Self> {
        match config.banding {
            IncomeBanding::Fixed => Ok(Self::new(
                config.field,
                config.low_threshold,
                config.high_threshold,
            )),
            IncomeBanding::Tertiles => {
                let mut values = Vec::with_capacity(records.len());
                for (idx, record) in records.iter().enumerate() {
                    values.push(checked_income(config.field, record, idx + 1)?);
                }
                values.sort_by(f64::total_cmp);

                let low = quantile(&values, 1.0 / 3.0);
                let high = quantile(&values, 2.0 / 3.0);
                tracing::debug!(field = config.field.column(), low, high, "resolved income tertiles");
                Ok(Self::tertiles(config.field, low, high))
            }
        }
    }

    pub fn age_group(&self, age: u32) -> AgeGroup {
        AgeGroup::from_age(age)
    }

    pub fn income_group(&self, value: f64) -> IncomeGroup {
        let (in_low, in_mid) = match self.banding {
            IncomeBanding::Fixed => (value < self.low_threshold, value < self.high_threshold),
            // A value sitting on a cut point belongs to the lower tertile.
            IncomeBanding::Tertiles => (value <= self.low_threshold, value <= self.high_threshold),
        };

        if in_low {
            IncomeGroup::Low
        } else if in_mid {
            IncomeGroup::Mid
        } else {
            IncomeGroup::High
        }
    }

    /// Derive `(age_group, income_group)` for the record at 1-based `row`.
    pub fn derive(&self, record: &CustomerRecord, row: usize) -> Result<(AgeGroup, IncomeGroup)> {
        if record.age > MAX_PLAUSIBLE_AGE {
            return Err(WarehouseError::invalid_record(
                row,
                "Age",
                format!("{} is not a plausible age", record.age),
            ));
        }

        let income = checked_income(self.field, record, row)?;
        Ok((self.age_group(record.age), self.income_group(income)))
    }
}

fn checked_income(field: IncomeField, record: &CustomerRecord, row: usize) -> Result<f64> {
    let value = match field {
        IncomeField::EstimatedSalary => record.estimated_salary,
        IncomeField::Balance => record.balance,
    };

    if !value.is_finite() {
        return Err(WarehouseError::invalid_record(row, field.column(), "not a finite number"));
    }
    if value < 0.0 {
        return Err(WarehouseError::invalid_record(
            row,
            field.column(),
            format!("negative amount {value}"),
        ));
    }
    Ok(value)
}

/// Linear-interpolated quantile over sorted, non-empty values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}
