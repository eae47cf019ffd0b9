// Churn Warehouse - Core Library
// Builds the bank-churn star schema and exposes it to the CLI, API server, and tests

pub mod config;
pub mod context;
pub mod dimensions;
pub mod error;
pub mod fact;
pub mod features;
pub mod publish;
pub mod record;
pub mod snapshot;
pub mod store;
pub mod validation;
pub mod warehouse;

// Re-export commonly used types
pub use config::{
    load_config_from, parse_config, IncomeBanding, IncomeConfig, IncomeField, PathsConfig,
    SnapshotConfig, WarehouseConfig, CONFIG_FILE_NAME,
};
pub use context::{BuildContext, SnapshotTime};
pub use dimensions::{
    CustomerDim, CustomerRow, DimensionBuilder, DimensionKind, DimensionSpec, DimensionTable,
    Dimensions, GeoDim, GeoRow, SegmentDim, SegmentRow, SurrogateKey, SurrogateKeyRegistry, TimeDim,
    TimeRow,
};
pub use error::{Result, WarehouseError};
pub use fact::{FactRow, FactRowAssembler};
pub use features::{AgeGroup, FeatureDeriver, IncomeGroup};
pub use publish::{
    load_published, publish_csv, read_manifest, verify_published, Manifest, TableEntry,
    MANIFEST_FILE,
};
pub use record::{load_records, read_records, CustomerRecord};
pub use snapshot::{ChurnAxis, ChurnStat, CustomerStatus, FilterOptions, Kpis, SnapshotFilter, WarehouseSnapshot};
pub use store::{
    load_warehouse, open_database, publish_history, publish_to_sqlite, setup_warehouse, PublishRecord,
};
pub use validation::{Rule, SchemaValidator, SchemaViolation, ValidationResult, ViolationReport};
pub use warehouse::{build_warehouse, Warehouse};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
