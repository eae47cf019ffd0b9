// 🔭 Warehouse Snapshot - read-only handle for dashboards and queries
//
// Cheap to clone and share across threads. Consumers filter by country,
// age group and gender, then aggregate churn over any axis.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::SnapshotTime;
use crate::dimensions::{CustomerRow, GeoRow, SegmentRow, TimeRow};
use crate::fact::FactRow;
use crate::features::{AgeGroup, IncomeGroup};
use crate::warehouse::Warehouse;

#[derive(Debug, Clone)]
pub struct WarehouseSnapshot {
    inner: Arc<Warehouse>,
}

impl From<Warehouse> for WarehouseSnapshot {
    fn from(warehouse: Warehouse) -> Self {
        WarehouseSnapshot {
            inner: Arc::new(warehouse),
        }
    }
}

// ============================================================================
// FILTERS + VIEWS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFilter {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub age_group: Option<AgeGroup>,
    #[serde(default)]
    pub gender: Option<String>,
}

impl SnapshotFilter {
    fn matches(&self, status: &CustomerStatus<'_>) -> bool {
        self.country.as_deref().map_or(true, |c| c == status.geo.country)
            && self.age_group.map_or(true, |g| g == status.segment.age_group)
            && self.gender.as_deref().map_or(true, |g| g == status.customer.gender)
    }
}

/// One fact row joined with its dimension rows.
#[derive(Debug, Clone, Copy)]
pub struct CustomerStatus<'a> {
    pub fact: &'a FactRow,
    pub customer: &'a CustomerRow,
    pub geo: &'a GeoRow,
    pub segment: &'a SegmentRow,
}

/// Grouping axis for churn breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChurnAxis {
    Country,
    AgeGroup,
    IncomeGroup,
    Gender,
    Products,
    Tenure,
}

impl ChurnAxis {
    pub const ALL: [ChurnAxis; 6] = [
        ChurnAxis::Country,
        ChurnAxis::AgeGroup,
        ChurnAxis::IncomeGroup,
        ChurnAxis::Gender,
        ChurnAxis::Products,
        ChurnAxis::Tenure,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ChurnAxis::Country => "country",
            ChurnAxis::AgeGroup => "age_group",
            ChurnAxis::IncomeGroup => "income_group",
            ChurnAxis::Gender => "gender",
            ChurnAxis::Products => "products",
            ChurnAxis::Tenure => "tenure",
        }
    }

    /// (sort position, label) of a status on this axis.
    fn group(&self, status: &CustomerStatus<'_>) -> (u64, String) {
        match self {
            ChurnAxis::Country => (status.geo.geo_key.get() as u64, status.geo.country.clone()),
            ChurnAxis::AgeGroup => (
                status.segment.age_group as u64,
                status.segment.age_group.label().to_string(),
            ),
            ChurnAxis::IncomeGroup => (
                status.segment.income_group as u64,
                status.segment.income_group.label().to_string(),
            ),
            ChurnAxis::Gender => (0, status.customer.gender.clone()),
            ChurnAxis::Products => (
                status.fact.num_of_products as u64,
                status.fact.num_of_products.to_string(),
            ),
            ChurnAxis::Tenure => (status.customer.tenure as u64, status.customer.tenure.to_string()),
        }
    }
}

impl fmt::Display for ChurnAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChurnAxis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChurnAxis::ALL
            .into_iter()
            .find(|axis| axis.name() == s)
            .ok_or_else(|| format!("unknown churn axis: {s}"))
    }
}

// ============================================================================
// AGGREGATES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChurnStat {
    pub label: String,
    pub customers: usize,
    pub churned: usize,
    /// Percentage, 0-100.
    pub churn_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpis {
    pub customers: usize,
    pub churned: usize,
    /// Percentage, 0-100.
    pub churn_rate: f64,
    pub avg_balance: f64,
    pub avg_credit_score: f64,
    /// Percentage of active members, 0-100.
    pub active_share: f64,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

impl WarehouseSnapshot {
    pub fn snapshot_time(&self) -> SnapshotTime {
        self.inner.snapshot()
    }

    pub fn dim_customer(&self) -> &[CustomerRow] {
        self.inner.dim_customer()
    }

    pub fn dim_geo(&self) -> &[GeoRow] {
        self.inner.dim_geo()
    }

    pub fn dim_time(&self) -> &[TimeRow] {
        self.inner.dim_time()
    }

    pub fn dim_segment(&self) -> &[SegmentRow] {
        self.inner.dim_segment()
    }

    pub fn facts(&self) -> &[FactRow] {
        self.inner.facts()
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.inner
    }

    /// Fact rows joined with their dimensions, restricted by `filter`.
    pub fn statuses<'a>(&'a self, filter: &'a SnapshotFilter) -> impl Iterator<Item = CustomerStatus<'a>> + 'a {
        let dims = self.inner.dimensions();
        self.inner
            .facts()
            .iter()
            .filter_map(move |fact| {
                Some(CustomerStatus {
                    fact,
                    customer: dims.customer.row(fact.customer_key)?,
                    geo: dims.geo.row(fact.geo_key)?,
                    segment: dims.segment.row(fact.segment_key)?,
                })
            })
            .filter(move |status| filter.matches(status))
    }

    pub fn kpis(&self, filter: &SnapshotFilter) -> Kpis {
        let mut customers = 0;
        let mut churned = 0;
        let mut active = 0;
        let mut balance = 0.0;
        let mut credit = 0.0;

        for status in self.statuses(filter) {
            customers += 1;
            churned += status.fact.churn_flag as usize;
            active += status.fact.is_active_member as usize;
            balance += status.fact.balance;
            credit += status.fact.credit_score as f64;
        }

        let mean = |total: f64| if customers == 0 { 0.0 } else { total / customers as f64 };

        Kpis {
            customers,
            churned,
            churn_rate: percent(churned, customers),
            avg_balance: mean(balance),
            avg_credit_score: mean(credit),
            active_share: percent(active, customers),
        }
    }

    /// Churn counts and rate per group on `axis`, in the axis' natural order.
    pub fn churn_by(&self, axis: ChurnAxis, filter: &SnapshotFilter) -> Vec<ChurnStat> {
        let mut groups: BTreeMap<(u64, String), (usize, usize)> = BTreeMap::new();

        for status in self.statuses(filter) {
            let entry = groups.entry(axis.group(&status)).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += status.fact.churn_flag as usize;
        }

        groups
            .into_iter()
            .map(|((_, label), (customers, churned))| ChurnStat {
                label,
                customers,
                churned,
                churn_rate: percent(churned, customers),
            })
            .collect()
    }

    /// Distinct values available to each filter.
    pub fn filter_options(&self) -> FilterOptions {
        let mut genders: Vec<String> = self.dim_customer().iter().map(|c| c.gender.clone()).collect();
        genders.sort();
        genders.dedup();

        let mut age_groups: Vec<AgeGroup> = self.dim_segment().iter().map(|s| s.age_group).collect();
        age_groups.sort();
        age_groups.dedup();

        FilterOptions {
            countries: self.dim_geo().iter().map(|g| g.country.clone()).collect(),
            age_groups,
            income_groups: IncomeGroup::ALL.to_vec(),
            genders,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOptions {
    pub countries: Vec<String>,
    pub age_groups: Vec<AgeGroup>,
    pub income_groups: Vec<IncomeGroup>,
    pub genders: Vec<String>,
}
