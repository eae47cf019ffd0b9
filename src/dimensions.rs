// 🧱 Dimension Builders - natural keys in, dense surrogate keys out
//
// Each dimension owns a SurrogateKeyRegistry. Keys are handed out in
// first-seen order over the input record order, starting at 1, so a fixed
// input always produces the same keys even when the four builders run on
// separate threads.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::marker::PhantomData;
use std::thread::ScopedJoinHandle;

use serde::{Deserialize, Serialize};

use crate::context::BuildContext;
use crate::error::{Result, WarehouseError};
use crate::features::{AgeGroup, IncomeGroup};
use crate::record::CustomerRecord;

// ============================================================================
// SURROGATE KEYS
// ============================================================================

/// Warehouse-assigned integer key. Dense and 1-based within a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurrogateKey(pub u32);

impl SurrogateKey {
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SurrogateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    Geography,
    Time,
    Segment,
    Customer,
}

impl DimensionKind {
    pub const ALL: [DimensionKind; 4] = [
        DimensionKind::Customer,
        DimensionKind::Time,
        DimensionKind::Geography,
        DimensionKind::Segment,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DimensionKind::Geography => "geography",
            DimensionKind::Time => "time",
            DimensionKind::Segment => "segment",
            DimensionKind::Customer => "customer",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            DimensionKind::Geography => "dim_geo",
            DimensionKind::Time => "dim_time",
            DimensionKind::Segment => "dim_segment",
            DimensionKind::Customer => "dim_customer",
        }
    }

    pub fn key_column(&self) -> &'static str {
        match self {
            DimensionKind::Geography => "geo_key",
            DimensionKind::Time => "time_key",
            DimensionKind::Segment => "segment_key",
            DimensionKind::Customer => "customer_key",
        }
    }
}

impl fmt::Display for DimensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// SURROGATE KEY REGISTRY
// ============================================================================

/// Natural key → surrogate key map for one dimension.
///
/// Written only by its owning builder; read-only once the build phase ends.
#[derive(Debug, Clone)]
pub struct SurrogateKeyRegistry<K> {
    kind: DimensionKind,
    keys: HashMap<K, SurrogateKey>,
    /// `order[i]` holds the natural key of surrogate key `i + 1`.
    order: Vec<K>,
}

impl<K> SurrogateKeyRegistry<K>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(kind: DimensionKind) -> Self {
        SurrogateKeyRegistry {
            kind,
            keys: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn kind(&self) -> DimensionKind {
        self.kind
    }

    /// Register a natural key. Returns its surrogate key and whether it was new.
    pub fn register(&mut self, natural: K) -> (SurrogateKey, bool) {
        if let Some(&key) = self.keys.get(&natural) {
            return (key, false);
        }

        let key = SurrogateKey(self.order.len() as u32 + 1);
        self.keys.insert(natural.clone(), key);
        self.order.push(natural);
        (key, true)
    }

    pub fn lookup(&self, natural: &K) -> Result<SurrogateKey> {
        self.keys
            .get(natural)
            .copied()
            .ok_or_else(|| WarehouseError::UnknownKey {
                dimension: self.kind.name().to_string(),
                key: format!("{natural:?}"),
            })
    }

    pub fn natural_key(&self, key: SurrogateKey) -> Option<&K> {
        (key.0 as usize)
            .checked_sub(1)
            .and_then(|idx| self.order.get(idx))
    }

    pub fn contains_key(&self, key: SurrogateKey) -> bool {
        key.0 >= 1 && (key.0 as usize) <= self.order.len()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (SurrogateKey, &K)> {
        self.order
            .iter()
            .enumerate()
            .map(|(idx, natural)| (SurrogateKey(idx as u32 + 1), natural))
    }

    /// Rebuild a registry from published `(key, natural)` pairs in key order.
    /// Keys must be dense from 1 and natural keys unique.
    pub fn restore(kind: DimensionKind, entries: impl IntoIterator<Item = (SurrogateKey, K)>) -> Result<Self> {
        let mut registry = Self::new(kind);

        for (idx, (stored, natural)) in entries.into_iter().enumerate() {
            let row = idx + 1;
            let (assigned, is_new) = registry.register(natural);
            if !is_new {
                return Err(WarehouseError::invalid_record(
                    row,
                    kind.key_column(),
                    format!("natural key of {} key {stored} already registered as {assigned}", kind.table()),
                ));
            }
            if assigned != stored {
                return Err(WarehouseError::invalid_record(
                    row,
                    kind.key_column(),
                    format!("{} keys are not dense: expected {assigned}, found {stored}", kind.table()),
                ));
            }
        }

        Ok(registry)
    }
}

// ============================================================================
// DIMENSION ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoRow {
    pub geo_key: SurrogateKey,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRow {
    pub time_key: SurrogateKey,
    pub year: i32,
    pub month: u32,
    pub quarter: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRow {
    pub segment_key: SurrogateKey,
    pub age_group: AgeGroup,
    pub income_group: IncomeGroup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRow {
    pub customer_key: SurrogateKey,
    pub customer_id: u64,
    pub gender: String,
    pub age: u32,
    pub tenure: u32,
}

// ============================================================================
// DIMENSION SPECS
// ============================================================================

/// How one dimension derives its natural key and row from a record.
pub trait DimensionSpec {
    type Key: Eq + Hash + Clone + Debug + Send + Sync;
    type Row: Clone + Debug + Send + Sync;

    const KIND: DimensionKind;

    fn natural_key(ctx: &BuildContext<'_>, row: usize, record: &CustomerRecord) -> Result<Self::Key>;

    fn make_row(key: SurrogateKey, natural: &Self::Key, record: &CustomerRecord) -> Self::Row;

    fn row_key(row: &Self::Row) -> SurrogateKey;

    fn row_natural_key(row: &Self::Row) -> Self::Key;
}

#[derive(Debug, Clone, Copy)]
pub struct GeoDim;

impl DimensionSpec for GeoDim {
    type Key = String;
    type Row = GeoRow;
    const KIND: DimensionKind = DimensionKind::Geography;

    fn natural_key(_ctx: &BuildContext<'_>, _row: usize, record: &CustomerRecord) -> Result<String> {
        Ok(record.country.clone())
    }

    fn make_row(key: SurrogateKey, natural: &String, _record: &CustomerRecord) -> GeoRow {
        GeoRow {
            geo_key: key,
            country: natural.clone(),
        }
    }

    fn row_key(row: &GeoRow) -> SurrogateKey {
        row.geo_key
    }

    fn row_natural_key(row: &GeoRow) -> String {
        row.country.clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimeDim;

impl DimensionSpec for TimeDim {
    type Key = (i32, u32);
    type Row = TimeRow;
    const KIND: DimensionKind = DimensionKind::Time;

    /// Every record shares the build's snapshot time.
    fn natural_key(ctx: &BuildContext<'_>, _row: usize, _record: &CustomerRecord) -> Result<(i32, u32)> {
        Ok((ctx.snapshot.year, ctx.snapshot.month))
    }

    fn make_row(key: SurrogateKey, natural: &(i32, u32), _record: &CustomerRecord) -> TimeRow {
        let (year, month) = *natural;
        TimeRow {
            time_key: key,
            year,
            month,
            quarter: (month.saturating_sub(1) / 3) + 1,
        }
    }

    fn row_key(row: &TimeRow) -> SurrogateKey {
        row.time_key
    }

    fn row_natural_key(row: &TimeRow) -> (i32, u32) {
        (row.year, row.month)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SegmentDim;

impl DimensionSpec for SegmentDim {
    type Key = (AgeGroup, IncomeGroup);
    type Row = SegmentRow;
    const KIND: DimensionKind = DimensionKind::Segment;

    fn natural_key(ctx: &BuildContext<'_>, row: usize, record: &CustomerRecord) -> Result<Self::Key> {
        ctx.features.derive(record, row)
    }

    fn make_row(key: SurrogateKey, natural: &Self::Key, _record: &CustomerRecord) -> SegmentRow {
        SegmentRow {
            segment_key: key,
            age_group: natural.0,
            income_group: natural.1,
        }
    }

    fn row_key(row: &SegmentRow) -> SurrogateKey {
        row.segment_key
    }

    fn row_natural_key(row: &SegmentRow) -> Self::Key {
        (row.age_group, row.income_group)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CustomerDim;

impl DimensionSpec for CustomerDim {
    type Key = u64;
    type Row = CustomerRow;
    const KIND: DimensionKind = DimensionKind::Customer;

    fn natural_key(_ctx: &BuildContext<'_>, _row: usize, record: &CustomerRecord) -> Result<u64> {
        Ok(record.customer_id)
    }

    /// Attributes come from the first record seen for the customer.
    fn make_row(key: SurrogateKey, natural: &u64, record: &CustomerRecord) -> CustomerRow {
        CustomerRow {
            customer_key: key,
            customer_id: *natural,
            gender: record.gender.clone(),
            age: record.age,
            tenure: record.tenure,
        }
    }

    fn row_key(row: &CustomerRow) -> SurrogateKey {
        row.customer_key
    }

    fn row_natural_key(row: &CustomerRow) -> u64 {
        row.customer_id
    }
}

// ============================================================================
// DIMENSION TABLE + BUILDER
// ============================================================================

/// A finished dimension: its rows in key order plus the registry behind them.
#[derive(Debug, Clone)]
pub struct DimensionTable<D: DimensionSpec> {
    registry: SurrogateKeyRegistry<D::Key>,
    rows: Vec<D::Row>,
}

impl<D: DimensionSpec> DimensionTable<D> {
    pub fn rows(&self) -> &[D::Row] {
        &self.rows
    }

    pub fn registry(&self) -> &SurrogateKeyRegistry<D::Key> {
        &self.registry
    }

    pub fn lookup(&self, natural: &D::Key) -> Result<SurrogateKey> {
        self.registry.lookup(natural)
    }

    pub fn contains_key(&self, key: SurrogateKey) -> bool {
        self.registry.contains_key(key)
    }

    /// Row for a surrogate key. Rows are stored in key order.
    pub fn row(&self, key: SurrogateKey) -> Option<&D::Row> {
        (key.0 as usize).checked_sub(1).and_then(|idx| self.rows.get(idx))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Reassemble a dimension from published rows (sorted by key).
    pub fn from_rows(rows: Vec<D::Row>) -> Result<Self> {
        let registry = SurrogateKeyRegistry::restore(
            D::KIND,
            rows.iter().map(|row| (D::row_key(row), D::row_natural_key(row))),
        )?;
        Ok(DimensionTable { registry, rows })
    }
}

/// Builds one dimension from the full record set.
pub struct DimensionBuilder<D: DimensionSpec> {
    registry: SurrogateKeyRegistry<D::Key>,
    rows: Vec<D::Row>,
    _spec: PhantomData<D>,
}

impl<D: DimensionSpec> DimensionBuilder<D> {
    pub fn new() -> Self {
        DimensionBuilder {
            registry: SurrogateKeyRegistry::new(D::KIND),
            rows: Vec::new(),
            _spec: PhantomData,
        }
    }

    pub fn build(mut self, ctx: &BuildContext<'_>) -> Result<DimensionTable<D>> {
        for (row, record) in ctx.rows() {
            let natural = D::natural_key(ctx, row, record)?;
            let (key, is_new) = self.registry.register(natural);
            if is_new {
                let natural = self.registry.natural_key(key).ok_or_else(|| WarehouseError::UnknownKey {
                    dimension: D::KIND.name().to_string(),
                    key: key.to_string(),
                })?;
                self.rows.push(D::make_row(key, natural, record));
            }
        }

        tracing::debug!(dimension = %D::KIND, rows = self.rows.len(), "built dimension");

        Ok(DimensionTable {
            registry: self.registry,
            rows: self.rows,
        })
    }
}

impl<D: DimensionSpec> Default for DimensionBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ALL FOUR DIMENSIONS
// ============================================================================

#[derive(Debug, Clone)]
pub struct Dimensions {
    pub geo: DimensionTable<GeoDim>,
    pub time: DimensionTable<TimeDim>,
    pub segment: DimensionTable<SegmentDim>,
    pub customer: DimensionTable<CustomerDim>,
}

impl Dimensions {
    /// Build the four dimensions on scoped threads. Each builder owns its
    /// registry; returning from the scope is the barrier before fact assembly.
    pub fn build(ctx: &BuildContext<'_>) -> Result<Self> {
        std::thread::scope(|s| {
            let geo = s.spawn(|| DimensionBuilder::<GeoDim>::new().build(ctx));
            let time = s.spawn(|| DimensionBuilder::<TimeDim>::new().build(ctx));
            let segment = s.spawn(|| DimensionBuilder::<SegmentDim>::new().build(ctx));
            let customer = s.spawn(|| DimensionBuilder::<CustomerDim>::new().build(ctx));

            // Join in a fixed order so the reported error is deterministic.
            let geo = join(geo);
            let time = join(time);
            let segment = join(segment);
            let customer = join(customer);

            Ok(Dimensions {
                geo: geo?,
                time: time?,
                segment: segment?,
                customer: customer?,
            })
        })
    }

    pub fn row_count(&self, kind: DimensionKind) -> usize {
        match kind {
            DimensionKind::Geography => self.geo.len(),
            DimensionKind::Time => self.time.len(),
            DimensionKind::Segment => self.segment.len(),
            DimensionKind::Customer => self.customer.len(),
        }
    }

    pub fn contains_key(&self, kind: DimensionKind, key: SurrogateKey) -> bool {
        match kind {
            DimensionKind::Geography => self.geo.contains_key(key),
            DimensionKind::Time => self.time.contains_key(key),
            DimensionKind::Segment => self.segment.contains_key(key),
            DimensionKind::Customer => self.customer.contains_key(key),
        }
    }
}

fn join<T>(handle: ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    match handle.join() {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
