// 🔗 Fact Row Assembler - one fact row per customer record
//
// Runs after all four dimensions are complete. Resolves every natural key
// through the registries; a miss is an engine defect, never a skipped row.

use serde::{Deserialize, Serialize};

use crate::context::BuildContext;
use crate::dimensions::{
    CustomerDim, Dimensions, DimensionSpec, GeoDim, SegmentDim, SurrogateKey, TimeDim,
};
use crate::error::Result;
use crate::record::CustomerRecord;

/// One row of `fact_customer_status`. Column order matches the published file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub customer_key: SurrogateKey,
    pub time_key: SurrogateKey,
    pub geo_key: SurrogateKey,
    pub segment_key: SurrogateKey,
    pub balance: f64,
    pub estimated_salary: f64,
    pub num_of_products: u8,
    pub credit_score: u16,
    pub has_credit_card: u8,
    pub is_active_member: u8,
    pub churn_flag: u8,
}

impl FactRow {
    /// Primary key of the fact table.
    pub fn grain(&self) -> (SurrogateKey, SurrogateKey) {
        (self.customer_key, self.time_key)
    }

    pub fn churned(&self) -> bool {
        self.churn_flag == 1
    }
}

/// Joins records against read-only dimension registries.
pub struct FactRowAssembler<'d> {
    dimensions: &'d Dimensions,
}

impl<'d> FactRowAssembler<'d> {
    pub fn new(dimensions: &'d Dimensions) -> Self {
        FactRowAssembler { dimensions }
    }

    pub fn assemble(&self, ctx: &BuildContext<'_>) -> Result<Vec<FactRow>> {
        let mut facts = Vec::with_capacity(ctx.records.len());

        for (row, record) in ctx.rows() {
            facts.push(self.assemble_row(ctx, row, record)?);
        }

        tracing::info!(rows = facts.len(), "assembled fact_customer_status");
        Ok(facts)
    }

    fn assemble_row(&self, ctx: &BuildContext<'_>, row: usize, record: &CustomerRecord) -> Result<FactRow> {
        let dims = self.dimensions;

        let customer_key = dims.customer.lookup(&CustomerDim::natural_key(ctx, row, record)?)?;
        let time_key = dims.time.lookup(&TimeDim::natural_key(ctx, row, record)?)?;
        let geo_key = dims.geo.lookup(&GeoDim::natural_key(ctx, row, record)?)?;
        let segment_key = dims.segment.lookup(&SegmentDim::natural_key(ctx, row, record)?)?;

        Ok(FactRow {
            customer_key,
            time_key,
            geo_key,
            segment_key,
            balance: record.balance,
            estimated_salary: record.estimated_salary,
            num_of_products: record.num_of_products,
            credit_score: record.credit_score,
            has_credit_card: record.has_credit_card,
            is_active_member: record.is_active_member,
            churn_flag: record.churn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarehouseConfig;
    use crate::context::SnapshotTime;
    use crate::dimensions::DimensionBuilder;
    use crate::error::WarehouseError;

    fn record(customer_id: u64, country: &str, age: u32, salary: f64) -> CustomerRecord {
        CustomerRecord {
            customer_id,
            gender: "Female".to_string(),
            age,
            tenure: 2,
            country: country.to_string(),
            balance: 1_250.5,
            estimated_salary: salary,
            num_of_products: 1,
            credit_score: 619,
            has_credit_card: 1,
            is_active_member: 1,
            churn: 1,
        }
    }

    #[test]
    fn test_scenario_shares_geo_and_segment_keys() {
        let records = vec![
            record(1, "France", 25, 10_000.0),
            record(2, "Germany", 40, 150_000.0),
            record(3, "France", 25, 10_000.0),
        ];
        let config = WarehouseConfig::default();
        let ctx = BuildContext::new(&records, &config, SnapshotTime::new(2019, 12).unwrap()).unwrap();
        let dims = Dimensions::build(&ctx).unwrap();

        let facts = FactRowAssembler::new(&dims).assemble(&ctx).unwrap();

        assert_eq!(facts.len(), 3);
        assert_eq!(facts[0].geo_key, facts[2].geo_key);
        assert_eq!(facts[0].segment_key, facts[2].segment_key);
        assert_ne!(facts[0].customer_key, facts[2].customer_key);
        assert_ne!(facts[0].geo_key, facts[1].geo_key);
        assert!(facts.iter().all(|f| f.time_key == SurrogateKey(1)));
    }

    #[test]
    fn test_measures_and_flags_are_carried() {
        let records = vec![record(7, "Spain", 33, 99_000.0)];
        let config = WarehouseConfig::default();
        let ctx = BuildContext::new(&records, &config, SnapshotTime::new(2019, 12).unwrap()).unwrap();
        let dims = Dimensions::build(&ctx).unwrap();

        let fact = &FactRowAssembler::new(&dims).assemble(&ctx).unwrap()[0];
        assert_eq!(fact.balance, 1_250.5);
        assert_eq!(fact.estimated_salary, 99_000.0);
        assert_eq!(fact.credit_score, 619);
        assert_eq!(fact.num_of_products, 1);
        assert!(fact.churned());
        assert_eq!(fact.grain(), (SurrogateKey(1), SurrogateKey(1)));
    }

    #[test]
    fn test_missing_registration_is_fatal() {
        let built_from = vec![record(1, "France", 30, 10_000.0)];
        let assembled_from = vec![record(1, "Spain", 30, 10_000.0)];
        let config = WarehouseConfig::default();
        let snapshot = SnapshotTime::new(2019, 12).unwrap();

        let build_ctx = BuildContext::new(&built_from, &config, snapshot).unwrap();
        let dims = Dimensions {
            geo: DimensionBuilder::<GeoDim>::new().build(&build_ctx).unwrap(),
            time: DimensionBuilder::<TimeDim>::new().build(&build_ctx).unwrap(),
            segment: DimensionBuilder::<SegmentDim>::new().build(&build_ctx).unwrap(),
            customer: DimensionBuilder::<CustomerDim>::new().build(&build_ctx).unwrap(),
        };

        let other_ctx = BuildContext::new(&assembled_from, &config, snapshot).unwrap();
        let err = FactRowAssembler::new(&dims).assemble(&other_ctx).unwrap_err();
        assert!(matches!(err, WarehouseError::UnknownKey { ref dimension, .. } if dimension == "geography"));
    }
}
