// 🧭 Build Context - everything one build run needs, passed by reference
//
// Created per run, discarded at the end. Nothing here outlives a build.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{SnapshotConfig, WarehouseConfig};
use crate::error::{Result, WarehouseError};
use crate::features::FeatureDeriver;
use crate::record::CustomerRecord;

/// The single point in time every fact row of a build is stamped with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotTime {
    pub year: i32,
    pub month: u32,
}

impl SnapshotTime {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(WarehouseError::config(format!("month must be in 1..=12, got {month}")));
        }
        Ok(SnapshotTime { year, month })
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        SnapshotTime {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn quarter(&self) -> u32 {
        (self.month.saturating_sub(1) / 3) + 1
    }

    /// Parse `YYYY-MM`.
    pub fn parse(text: &str) -> Result<Self> {
        let (year, month) = text
            .trim()
            .split_once('-')
            .ok_or_else(|| WarehouseError::config(format!("snapshot must be YYYY-MM, got {text:?}")))?;
        let year = year
            .parse()
            .map_err(|_| WarehouseError::config(format!("invalid snapshot year in {text:?}")))?;
        let month = month
            .parse()
            .map_err(|_| WarehouseError::config(format!("invalid snapshot month in {text:?}")))?;
        Self::new(year, month)
    }
}

impl From<SnapshotConfig> for SnapshotTime {
    fn from(config: SnapshotConfig) -> Self {
        SnapshotTime {
            year: config.year,
            month: config.month,
        }
    }
}

impl std::fmt::Display for SnapshotTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

// ============================================================================
// BUILD CONTEXT
// ============================================================================

pub struct BuildContext<'a> {
    pub records: &'a [CustomerRecord],
    pub snapshot: SnapshotTime,
    pub features: FeatureDeriver,
}

impl<'a> BuildContext<'a> {
    pub fn new(records: &'a [CustomerRecord], config: &WarehouseConfig, snapshot: SnapshotTime) -> Result<Self> {
        config.validate()?;
        // dim_time is derived from the records, so an empty build has no snapshot row.
        if records.is_empty() {
            return Err(WarehouseError::invalid_record(0, "*", "input contains no records"));
        }
        let features = FeatureDeriver::from_config(&config.income, records)?;

        Ok(BuildContext {
            records,
            snapshot,
            features,
        })
    }

    /// Records paired with their 1-based row number, in input order.
    pub fn rows(&self) -> impl Iterator<Item = (usize, &'a CustomerRecord)> {
        self.records.iter().enumerate().map(|(idx, record)| (idx + 1, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_quarter_derivation() {
        let quarters: Vec<u32> = (1..=12)
            .map(|m| SnapshotTime::new(2019, m).unwrap().quarter())
            .collect();
        assert_eq!(quarters, vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4]);
    }

    #[test]
    fn test_parse_snapshot() {
        let snapshot = SnapshotTime::parse("2019-12").unwrap();
        assert_eq!(snapshot, SnapshotTime { year: 2019, month: 12 });
        assert_eq!(snapshot.to_string(), "2019-12");

        assert!(SnapshotTime::parse("2019").is_err());
        assert!(SnapshotTime::parse("2019-13").is_err());
        assert!(SnapshotTime::parse("20x9-01").is_err());
    }

    #[test]
    fn test_from_datetime() {
        let at = Utc.with_ymd_and_hms(2024, 5, 17, 10, 30, 0).unwrap();
        let snapshot = SnapshotTime::from_datetime(at);
        assert_eq!(snapshot, SnapshotTime { year: 2024, month: 5 });
        assert_eq!(snapshot.quarter(), 2);
    }
}
