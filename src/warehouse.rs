// 🏛️ Warehouse Build - derive, build dimensions, assemble facts, validate
//
// A Warehouse value only exists once every invariant has been checked, so
// anything holding one may publish it.

use crate::config::WarehouseConfig;
use crate::context::{BuildContext, SnapshotTime};
use crate::dimensions::{
    CustomerDim, CustomerRow, DimensionKind, DimensionTable, Dimensions, GeoDim, GeoRow, SegmentDim,
    SegmentRow, TimeDim, TimeRow,
};
use crate::error::{Result, WarehouseError};
use crate::fact::{FactRow, FactRowAssembler};
use crate::record::CustomerRecord;
use crate::validation::SchemaValidator;

#[derive(Debug, Clone)]
pub struct Warehouse {
    snapshot: SnapshotTime,
    dimensions: Dimensions,
    facts: Vec<FactRow>,
}

impl Warehouse {
    pub fn snapshot(&self) -> SnapshotTime {
        self.snapshot
    }

    pub fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }

    pub fn dim_geo(&self) -> &[GeoRow] {
        self.dimensions.geo.rows()
    }

    pub fn dim_time(&self) -> &[TimeRow] {
        self.dimensions.time.rows()
    }

    pub fn dim_segment(&self) -> &[SegmentRow] {
        self.dimensions.segment.rows()
    }

    pub fn dim_customer(&self) -> &[CustomerRow] {
        self.dimensions.customer.rows()
    }

    pub fn facts(&self) -> &[FactRow] {
        &self.facts
    }

    pub fn row_count(&self, kind: DimensionKind) -> usize {
        self.dimensions.row_count(kind)
    }

    /// Reassemble a published warehouse from its five tables and re-validate it.
    /// Dimension rows must be sorted by surrogate key.
    pub fn from_tables(
        geo: Vec<GeoRow>,
        time: Vec<TimeRow>,
        segment: Vec<SegmentRow>,
        customer: Vec<CustomerRow>,
        facts: Vec<FactRow>,
    ) -> Result<Self> {
        let dimensions = Dimensions {
            geo: DimensionTable::<GeoDim>::from_rows(geo)?,
            time: DimensionTable::<TimeDim>::from_rows(time)?,
            segment: DimensionTable::<SegmentDim>::from_rows(segment)?,
            customer: DimensionTable::<CustomerDim>::from_rows(customer)?,
        };

        SchemaValidator::new()
            .validate(&dimensions, &facts)
            .map_err(WarehouseError::SchemaViolation)?;

        let snapshot = match dimensions.time.rows() {
            [only] => SnapshotTime::new(only.year, only.month)?,
            rows => {
                return Err(WarehouseError::invalid_record(
                    rows.len(),
                    "time_key",
                    format!("a snapshot holds exactly one dim_time row, found {}", rows.len()),
                ))
            }
        };

        Ok(Warehouse {
            snapshot,
            dimensions,
            facts,
        })
    }
}

/// Run one full build. Nothing is written anywhere; publishing is a separate step.
pub fn build_warehouse(
    records: &[CustomerRecord],
    config: &WarehouseConfig,
    snapshot: SnapshotTime,
) -> Result<Warehouse> {
    tracing::info!(records = records.len(), %snapshot, "starting warehouse build");

    let ctx = BuildContext::new(records, config, snapshot)?;

    let dimensions = Dimensions::build(&ctx)?;
    for kind in DimensionKind::ALL {
        tracing::info!(table = kind.table(), rows = dimensions.row_count(kind), "built dimension table");
    }

    let facts = FactRowAssembler::new(&dimensions).assemble(&ctx)?;

    SchemaValidator::new()
        .validate(&dimensions, &facts)
        .map_err(WarehouseError::SchemaViolation)?;

    tracing::info!(facts = facts.len(), "warehouse build validated");

    Ok(Warehouse {
        snapshot,
        dimensions,
        facts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::SurrogateKey;
    use crate::features::{AgeGroup, IncomeGroup};
    use crate::validation::Rule;

    fn record(customer_id: u64, country: &str, age: u32, salary: f64) -> CustomerRecord {
        CustomerRecord {
            customer_id,
            gender: "Female".to_string(),
            age,
            tenure: 1,
            country: country.to_string(),
            balance: 500.0,
            estimated_salary: salary,
            num_of_products: 1,
            credit_score: 640,
            has_credit_card: 1,
            is_active_member: 0,
            churn: 0,
        }
    }

    fn snapshot() -> SnapshotTime {
        SnapshotTime::new(2019, 12).unwrap()
    }

    #[test]
    fn test_three_record_scenario() {
        let records = vec![
            record(1, "France", 25, 20_000.0),
            record(2, "Germany", 40, 150_000.0),
            record(3, "France", 25, 20_000.0),
        ];

        let warehouse = build_warehouse(&records, &WarehouseConfig::default(), snapshot()).unwrap();

        assert_eq!(warehouse.dim_geo().len(), 2);
        assert_eq!(warehouse.dim_segment().len(), 2);
        assert_eq!(warehouse.dim_customer().len(), 3);
        assert_eq!(warehouse.dim_time().len(), 1);
        assert_eq!(warehouse.facts().len(), 3);

        let facts = warehouse.facts();
        assert_eq!(facts[0].geo_key, facts[2].geo_key);
        assert_eq!(facts[0].segment_key, facts[2].segment_key);
        assert_ne!(facts[0].customer_key, facts[2].customer_key);

        let segment = &warehouse.dim_segment()[0];
        assert_eq!(segment.age_group, AgeGroup::UpTo25);
        assert_eq!(segment.income_group, IncomeGroup::Low);
    }

    #[test]
    fn test_invalid_range_aborts_build() {
        let mut bad = record(2, "Spain", 50, 80_000.0);
        bad.credit_score = 900;
        let records = vec![record(1, "France", 30, 10_000.0), bad];

        match build_warehouse(&records, &WarehouseConfig::default(), snapshot()).unwrap_err() {
            WarehouseError::SchemaViolation(report) => {
                assert_eq!(report.len(), 1);
                assert_eq!(report.violations[0].rule, Rule::CreditScoreRange);
                assert_eq!(report.violations[0].row, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_input_is_rejected() {
        match build_warehouse(&[], &WarehouseConfig::default(), snapshot()).unwrap_err() {
            WarehouseError::InvalidRecord { row, field, .. } => {
                assert_eq!(row, 0);
                assert_eq!(field, "*");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_row_count_conservation() {
        let records: Vec<CustomerRecord> = (1..=50)
            .map(|i| record(i, ["France", "Spain"][i as usize % 2], 20 + i as u32, i as f64 * 3_000.0))
            .collect();

        let warehouse = build_warehouse(&records, &WarehouseConfig::default(), snapshot()).unwrap();
        assert_eq!(warehouse.facts().len(), records.len());
        assert_eq!(warehouse.dim_customer().len(), records.len());
    }

    #[test]
    fn test_from_tables_round_trip() {
        let records = vec![record(1, "France", 30, 10_000.0), record(2, "Spain", 60, 200_000.0)];
        let built = build_warehouse(&records, &WarehouseConfig::default(), snapshot()).unwrap();

        let restored = Warehouse::from_tables(
            built.dim_geo().to_vec(),
            built.dim_time().to_vec(),
            built.dim_segment().to_vec(),
            built.dim_customer().to_vec(),
            built.facts().to_vec(),
        )
        .unwrap();

        assert_eq!(restored.snapshot(), snapshot());
        assert_eq!(restored.facts(), built.facts());
        assert_eq!(
            restored.dimensions().geo.lookup(&"Spain".to_string()).unwrap(),
            SurrogateKey(2)
        );
    }

    #[test]
    fn test_from_tables_rejects_dangling_fact() {
        let records = vec![record(1, "France", 30, 10_000.0)];
        let built = build_warehouse(&records, &WarehouseConfig::default(), snapshot()).unwrap();
        let mut facts = built.facts().to_vec();
        facts[0].segment_key = SurrogateKey(4);

        let err = Warehouse::from_tables(
            built.dim_geo().to_vec(),
            built.dim_time().to_vec(),
            built.dim_segment().to_vec(),
            built.dim_customer().to_vec(),
            facts,
        )
        .unwrap_err();
        assert!(matches!(err, WarehouseError::SchemaViolation(_)));
    }
}
