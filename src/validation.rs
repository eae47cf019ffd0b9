// 📐 Schema Validator - post-assembly gate before anything is published
//
// Mirrors the relational DDL: grain, foreign keys, orphans, and the CHECK
// constraints. Every check runs to completion; all violations are reported.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;

use serde::Serialize;

use crate::dimensions::{DimensionKind, Dimensions, SurrogateKey};
use crate::fact::FactRow;

pub const CREDIT_SCORE_RANGE: RangeInclusive<u16> = 300..=850;
pub const PRODUCT_COUNT_RANGE: RangeInclusive<u8> = 1..=4;
pub const FLAG_RANGE: RangeInclusive<u8> = 0..=1;
pub const AGE_RANGE: RangeInclusive<u32> = 18..=100;
pub const TENURE_RANGE: RangeInclusive<u32> = 0..=10;
pub const MONTH_RANGE: RangeInclusive<u32> = 1..=12;
pub const QUARTER_RANGE: RangeInclusive<u32> = 1..=4;

pub const FACT_TABLE: &str = "fact_customer_status";

// ============================================================================
// VIOLATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// No duplicate (customer_key, time_key) pairs.
    GrainUnique,
    /// Fact foreign key resolves in its dimension.
    ForeignKey,
    /// Every dimension row is referenced by at least one fact row.
    OrphanRow,
    CreditScoreRange,
    ProductCountRange,
    FlagDomain,
    AgeRange,
    TenureRange,
    CalendarDomain,
}

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Rule::GrainUnique => "grain_unique",
            Rule::ForeignKey => "foreign_key",
            Rule::OrphanRow => "orphan_row",
            Rule::CreditScoreRange => "credit_score_range",
            Rule::ProductCountRange => "product_count_range",
            Rule::FlagDomain => "flag_domain",
            Rule::AgeRange => "age_range",
            Rule::TenureRange => "tenure_range",
            Rule::CalendarDomain => "calendar_domain",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaViolation {
    pub table: &'static str,
    /// 1-based position of the row in its table.
    pub row: usize,
    /// Key columns of the offending row, e.g. `customer_key=3, time_key=1`.
    pub key: String,
    pub column: &'static str,
    pub rule: Rule,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} row {} ({}): {}: {}",
            self.rule, self.table, self.row, self.key, self.column, self.message
        )
    }
}

/// Every violation found by one validation pass, in check order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViolationReport {
    pub violations: Vec<SchemaViolation>,
}

impl ViolationReport {
    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchemaViolation> {
        self.violations.iter()
    }

    pub fn by_rule(&self, rule: Rule) -> Vec<&SchemaViolation> {
        self.violations.iter().filter(|v| v.rule == rule).collect()
    }

    fn push(&mut self, violation: SchemaViolation) {
        self.violations.push(violation);
    }
}

impl fmt::Display for ViolationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for violation in &self.violations {
            writeln!(f, "  - {violation}")?;
        }
        Ok(())
    }
}

pub type ValidationResult = std::result::Result<(), ViolationReport>;

// ============================================================================
// SCHEMA VALIDATOR
// ============================================================================

#[derive(Debug, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    pub fn new() -> Self {
        SchemaValidator
    }

    /// Run every check over a fully assembled warehouse.
    pub fn validate(&self, dims: &Dimensions, facts: &[FactRow]) -> ValidationResult {
        let mut report = ViolationReport::default();

        self.check_grain(facts, &mut report);
        self.check_foreign_keys(dims, facts, &mut report);
        self.check_orphans(dims, facts, &mut report);
        self.check_fact_domains(facts, &mut report);
        self.check_customer_domains(dims, &mut report);
        self.check_calendar(dims, &mut report);

        if report.is_empty() {
            Ok(())
        } else {
            tracing::warn!(violations = report.len(), "schema validation failed");
            Err(report)
        }
    }

    fn check_grain(&self, facts: &[FactRow], report: &mut ViolationReport) {
        let mut seen: HashMap<(SurrogateKey, SurrogateKey), usize> = HashMap::with_capacity(facts.len());

        for (idx, fact) in facts.iter().enumerate() {
            let row = idx + 1;
            match seen.entry(fact.grain()) {
                Entry::Occupied(first) => report.push(fact_violation(
                    row,
                    fact,
                    "customer_key",
                    Rule::GrainUnique,
                    format!("duplicates the grain of row {}", first.get()),
                )),
                Entry::Vacant(slot) => {
                    slot.insert(row);
                }
            }
        }
    }

    fn check_foreign_keys(&self, dims: &Dimensions, facts: &[FactRow], report: &mut ViolationReport) {
        for (idx, fact) in facts.iter().enumerate() {
            for kind in DimensionKind::ALL {
                let key = fact_key(fact, kind);
                if !dims.contains_key(kind, key) {
                    report.push(fact_violation(
                        idx + 1,
                        fact,
                        kind.key_column(),
                        Rule::ForeignKey,
                        format!("{key} does not exist in {}", kind.table()),
                    ));
                }
            }
        }
    }

    fn check_orphans(&self, dims: &Dimensions, facts: &[FactRow], report: &mut ViolationReport) {
        for kind in DimensionKind::ALL {
            let len = dims.row_count(kind);
            let mut referenced = vec![false; len + 1];
            for fact in facts {
                let key = fact_key(fact, kind).get() as usize;
                if key <= len {
                    referenced[key] = true;
                }
            }

            for key in 1..=len {
                if !referenced[key] {
                    report.push(SchemaViolation {
                        table: kind.table(),
                        row: key,
                        key: format!("{}={key}", kind.key_column()),
                        column: kind.key_column(),
                        rule: Rule::OrphanRow,
                        message: format!("not referenced by any {FACT_TABLE} row"),
                    });
                }
            }
        }
    }

    fn check_fact_domains(&self, facts: &[FactRow], report: &mut ViolationReport) {
        for (idx, fact) in facts.iter().enumerate() {
            let row = idx + 1;

            if !CREDIT_SCORE_RANGE.contains(&fact.credit_score) {
                report.push(fact_violation(
                    row,
                    fact,
                    "credit_score",
                    Rule::CreditScoreRange,
                    out_of_range(fact.credit_score, &CREDIT_SCORE_RANGE),
                ));
            }

            if !PRODUCT_COUNT_RANGE.contains(&fact.num_of_products) {
                report.push(fact_violation(
                    row,
                    fact,
                    "num_of_products",
                    Rule::ProductCountRange,
                    out_of_range(fact.num_of_products, &PRODUCT_COUNT_RANGE),
                ));
            }

            let flags = [
                ("has_credit_card", fact.has_credit_card),
                ("is_active_member", fact.is_active_member),
                ("churn_flag", fact.churn_flag),
            ];
            for (column, value) in flags {
                if !FLAG_RANGE.contains(&value) {
                    report.push(fact_violation(
                        row,
                        fact,
                        column,
                        Rule::FlagDomain,
                        format!("{value} is not 0 or 1"),
                    ));
                }
            }
        }
    }

    fn check_customer_domains(&self, dims: &Dimensions, report: &mut ViolationReport) {
        let table = DimensionKind::Customer.table();

        for (idx, customer) in dims.customer.rows().iter().enumerate() {
            let key = format!("customer_key={}", customer.customer_key);

            if !AGE_RANGE.contains(&customer.age) {
                report.push(SchemaViolation {
                    table,
                    row: idx + 1,
                    key: key.clone(),
                    column: "age",
                    rule: Rule::AgeRange,
                    message: out_of_range(customer.age, &AGE_RANGE),
                });
            }

            if !TENURE_RANGE.contains(&customer.tenure) {
                report.push(SchemaViolation {
                    table,
                    row: idx + 1,
                    key,
                    column: "tenure",
                    rule: Rule::TenureRange,
                    message: out_of_range(customer.tenure, &TENURE_RANGE),
                });
            }
        }
    }

    fn check_calendar(&self, dims: &Dimensions, report: &mut ViolationReport) {
        let table = DimensionKind::Time.table();

        for (idx, time) in dims.time.rows().iter().enumerate() {
            let key = format!("time_key={}", time.time_key);

            if !MONTH_RANGE.contains(&time.month) {
                report.push(SchemaViolation {
                    table,
                    row: idx + 1,
                    key: key.clone(),
                    column: "month",
                    rule: Rule::CalendarDomain,
                    message: out_of_range(time.month, &MONTH_RANGE),
                });
            }

            if !QUARTER_RANGE.contains(&time.quarter) {
                report.push(SchemaViolation {
                    table,
                    row: idx + 1,
                    key,
                    column: "quarter",
                    rule: Rule::CalendarDomain,
                    message: out_of_range(time.quarter, &QUARTER_RANGE),
                });
            }
        }
    }
}

fn fact_key(fact: &FactRow, kind: DimensionKind) -> SurrogateKey {
    match kind {
        DimensionKind::Customer => fact.customer_key,
        DimensionKind::Time => fact.time_key,
        DimensionKind::Geography => fact.geo_key,
        DimensionKind::Segment => fact.segment_key,
    }
}

fn fact_violation(row: usize, fact: &FactRow, column: &'static str, rule: Rule, message: String) -> SchemaViolation {
    SchemaViolation {
        table: FACT_TABLE,
        row,
        key: format!("customer_key={}, time_key={}", fact.customer_key, fact.time_key),
        column,
        rule,
        message,
    }
}

fn out_of_range<T: fmt::Display>(value: T, range: &RangeInclusive<T>) -> String {
    format!("{value} outside [{}, {}]", range.start(), range.end())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarehouseConfig;
    use crate::context::{BuildContext, SnapshotTime};
    use crate::fact::FactRowAssembler;
    use crate::record::CustomerRecord;

    fn record(customer_id: u64, country: &str, age: u32) -> CustomerRecord {
        CustomerRecord {
            customer_id,
            gender: "Male".to_string(),
            age,
            tenure: 4,
            country: country.to_string(),
            balance: 0.0,
            estimated_salary: 50_000.0,
            num_of_products: 2,
            credit_score: 700,
            has_credit_card: 0,
            is_active_member: 1,
            churn: 0,
        }
    }

    fn assemble(records: &[CustomerRecord]) -> (Dimensions, Vec<FactRow>) {
        let config = WarehouseConfig::default();
        let ctx = BuildContext::new(records, &config, SnapshotTime::new(2019, 12).unwrap()).unwrap();
        let dims = Dimensions::build(&ctx).unwrap();
        let facts = FactRowAssembler::new(&dims).assemble(&ctx).unwrap();
        (dims, facts)
    }

    #[test]
    fn test_valid_warehouse_passes() {
        let (dims, facts) = assemble(&[record(1, "France", 30), record(2, "Spain", 45)]);
        assert!(SchemaValidator::new().validate(&dims, &facts).is_ok());
    }

    #[test]
    fn test_credit_score_out_of_range_reports_one_violation() {
        let mut bad = record(2, "Spain", 45);
        bad.credit_score = 900;
        let (dims, facts) = assemble(&[record(1, "France", 30), bad]);

        let report = SchemaValidator::new().validate(&dims, &facts).unwrap_err();
        assert_eq!(report.len(), 1);

        let violation = &report.violations[0];
        assert_eq!(violation.rule, Rule::CreditScoreRange);
        assert_eq!(violation.table, FACT_TABLE);
        assert_eq!(violation.row, 2);
        assert_eq!(violation.column, "credit_score");
        assert_eq!(violation.key, "customer_key=2, time_key=1");
    }

    #[test]
    fn test_all_violations_are_aggregated() {
        let mut a = record(1, "France", 17);
        a.tenure = 11;
        a.num_of_products = 0;
        let mut b = record(2, "Spain", 45);
        b.churn = 2;
        b.credit_score = 299;
        let (dims, facts) = assemble(&[a, b]);

        let report = SchemaValidator::new().validate(&dims, &facts).unwrap_err();
        assert_eq!(report.len(), 5);
        assert_eq!(report.by_rule(Rule::AgeRange).len(), 1);
        assert_eq!(report.by_rule(Rule::TenureRange).len(), 1);
        assert_eq!(report.by_rule(Rule::ProductCountRange).len(), 1);
        assert_eq!(report.by_rule(Rule::FlagDomain)[0].column, "churn_flag");
        assert_eq!(report.by_rule(Rule::CreditScoreRange)[0].row, 2);
    }

    #[test]
    fn test_duplicate_customer_breaks_grain() {
        let (dims, facts) = assemble(&[record(1, "France", 30), record(2, "Spain", 40), record(1, "France", 30)]);

        let report = SchemaValidator::new().validate(&dims, &facts).unwrap_err();
        let grain = report.by_rule(Rule::GrainUnique);
        assert_eq!(grain.len(), 1);
        assert_eq!(grain[0].row, 3);
        assert!(grain[0].message.contains("row 1"));
    }

    #[test]
    fn test_dangling_foreign_key_and_orphan() {
        let (dims, mut facts) = assemble(&[record(1, "France", 30), record(2, "Spain", 40)]);
        // Point the second fact at a geography that does not exist; Spain is now orphaned.
        facts[1].geo_key = SurrogateKey(9);

        let report = SchemaValidator::new().validate(&dims, &facts).unwrap_err();

        let fk = report.by_rule(Rule::ForeignKey);
        assert_eq!(fk.len(), 1);
        assert_eq!(fk[0].column, "geo_key");
        assert_eq!(fk[0].row, 2);

        let orphans = report.by_rule(Rule::OrphanRow);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].table, "dim_geo");
        assert_eq!(orphans[0].key, "geo_key=2");
    }

    #[test]
    fn test_report_display_lists_every_violation() {
        let mut a = record(1, "France", 30);
        a.credit_score = 900;
        let mut b = record(2, "France", 30);
        b.credit_score = 100;
        let (dims, facts) = assemble(&[a, b]);

        let report = SchemaValidator::new().validate(&dims, &facts).unwrap_err();
        let text = report.to_string();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("[credit_score_range] fact_customer_status row 1"));
        assert!(text.contains("900 outside [300, 850]"));
    }
}
