// 🗄️ SQLite Store - relational publish target for the star schema
//
// The DDL carries the same primary keys, foreign keys and CHECK constraints
// the SchemaValidator enforces, so the database rejects anything the
// validator would. Every publish replaces all five tables in one transaction.

use std::path::Path;

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::dimensions::{CustomerRow, DimensionKind, GeoRow, SegmentRow, SurrogateKey, TimeRow};
use crate::error::{Result, WarehouseError};
use crate::fact::FactRow;
use crate::features::{AgeGroup, IncomeGroup};
use crate::validation::{
    AGE_RANGE, CREDIT_SCORE_RANGE, FACT_TABLE, FLAG_RANGE, MONTH_RANGE, PRODUCT_COUNT_RANGE,
    QUARTER_RANGE, TENURE_RANGE,
};
use crate::warehouse::Warehouse;

/// Open (or create) a warehouse database file and make sure the schema exists.
pub fn open_database(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| WarehouseError::io(parent, e))?;
    }

    let conn = Connection::open(path)?;
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    setup_warehouse(&conn)?;
    Ok(conn)
}

fn quoted(labels: impl IntoIterator<Item = &'static str>) -> String {
    labels
        .into_iter()
        .map(|l| format!("'{l}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn setup_warehouse(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", true)?;

    // ==========================================================================
    // Dimensions
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS dim_customer (
                customer_key INTEGER PRIMARY KEY,
                customer_id INTEGER NOT NULL,
                gender TEXT NOT NULL,
                age INTEGER NOT NULL CHECK (age BETWEEN {} AND {}),
                tenure INTEGER NOT NULL CHECK (tenure BETWEEN {} AND {})
            )",
            AGE_RANGE.start(),
            AGE_RANGE.end(),
            TENURE_RANGE.start(),
            TENURE_RANGE.end(),
        ),
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS dim_geo (
            geo_key INTEGER PRIMARY KEY,
            country TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS dim_time (
                time_key INTEGER PRIMARY KEY,
                year INTEGER NOT NULL,
                month INTEGER NOT NULL CHECK (month BETWEEN {} AND {}),
                quarter INTEGER NOT NULL CHECK (quarter BETWEEN {} AND {}),
                UNIQUE (year, month)
            )",
            MONTH_RANGE.start(),
            MONTH_RANGE.end(),
            QUARTER_RANGE.start(),
            QUARTER_RANGE.end(),
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS dim_segment (
                segment_key INTEGER PRIMARY KEY,
                age_group TEXT NOT NULL CHECK (age_group IN ({})),
                income_group TEXT NOT NULL CHECK (income_group IN ({})),
                UNIQUE (age_group, income_group)
            )",
            quoted(AgeGroup::ALL.iter().map(|g| g.label())),
            quoted(IncomeGroup::ALL.iter().map(|g| g.label())),
        ),
        [],
    )?;

    // ==========================================================================
    // Fact table
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {FACT_TABLE} (
                customer_key INTEGER NOT NULL REFERENCES dim_customer(customer_key),
                time_key INTEGER NOT NULL REFERENCES dim_time(time_key),
                geo_key INTEGER NOT NULL REFERENCES dim_geo(geo_key),
                segment_key INTEGER NOT NULL REFERENCES dim_segment(segment_key),
                balance REAL NOT NULL,
                estimated_salary REAL NOT NULL,
                num_of_products INTEGER NOT NULL CHECK (num_of_products BETWEEN {p0} AND {p1}),
                credit_score INTEGER NOT NULL CHECK (credit_score BETWEEN {c0} AND {c1}),
                has_credit_card INTEGER NOT NULL CHECK (has_credit_card BETWEEN {f0} AND {f1}),
                is_active_member INTEGER NOT NULL CHECK (is_active_member BETWEEN {f0} AND {f1}),
                churn_flag INTEGER NOT NULL CHECK (churn_flag BETWEEN {f0} AND {f1}),
                PRIMARY KEY (customer_key, time_key)
            )",
            p0 = PRODUCT_COUNT_RANGE.start(),
            p1 = PRODUCT_COUNT_RANGE.end(),
            c0 = CREDIT_SCORE_RANGE.start(),
            c1 = CREDIT_SCORE_RANGE.end(),
            f0 = FLAG_RANGE.start(),
            f1 = FLAG_RANGE.end(),
        ),
        [],
    )?;

    // ==========================================================================
    // Publish log (one row per successful publish, kept across rebuilds)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS publish_log (
            run_id TEXT PRIMARY KEY,
            published_at TEXT NOT NULL,
            snapshot TEXT NOT NULL,
            customers INTEGER NOT NULL,
            facts INTEGER NOT NULL,
            churned INTEGER NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        &format!("CREATE INDEX IF NOT EXISTS idx_fact_geo ON {FACT_TABLE}(geo_key)"),
        [],
    )?;

    conn.execute(
        &format!("CREATE INDEX IF NOT EXISTS idx_fact_segment ON {FACT_TABLE}(segment_key)"),
        [],
    )?;

    Ok(())
}

// ============================================================================
// PUBLISH
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishRecord {
    pub run_id: String,
    pub published_at: String,
    pub snapshot: String,
    pub customers: i64,
    pub facts: i64,
    pub churned: i64,
}

/// Replace the whole warehouse. Either every table is swapped or none is.
pub fn publish_to_sqlite(conn: &mut Connection, warehouse: &Warehouse) -> Result<PublishRecord> {
    let tx = conn.transaction()?;

    // Fact first so no foreign key dangles mid-delete.
    tx.execute(&format!("DELETE FROM {FACT_TABLE}"), [])?;
    for kind in DimensionKind::ALL {
        tx.execute(&format!("DELETE FROM {}", kind.table()), [])?;
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO dim_customer (customer_key, customer_id, gender, age, tenure)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for c in warehouse.dim_customer() {
            stmt.execute(params![c.customer_key.get(), c.customer_id as i64, c.gender, c.age, c.tenure])?;
        }

        let mut stmt = tx.prepare("INSERT INTO dim_geo (geo_key, country) VALUES (?1, ?2)")?;
        for g in warehouse.dim_geo() {
            stmt.execute(params![g.geo_key.get(), g.country])?;
        }

        let mut stmt = tx.prepare("INSERT INTO dim_time (time_key, year, month, quarter) VALUES (?1, ?2, ?3, ?4)")?;
        for t in warehouse.dim_time() {
            stmt.execute(params![t.time_key.get(), t.year, t.month, t.quarter])?;
        }

        let mut stmt =
            tx.prepare("INSERT INTO dim_segment (segment_key, age_group, income_group) VALUES (?1, ?2, ?3)")?;
        for s in warehouse.dim_segment() {
            stmt.execute(params![s.segment_key.get(), s.age_group.label(), s.income_group.label()])?;
        }

        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {FACT_TABLE} (
                customer_key, time_key, geo_key, segment_key, balance, estimated_salary,
                num_of_products, credit_score, has_credit_card, is_active_member, churn_flag
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ))?;
        for f in warehouse.facts() {
            stmt.execute(params![
                f.customer_key.get(),
                f.time_key.get(),
                f.geo_key.get(),
                f.segment_key.get(),
                f.balance,
                f.estimated_salary,
                f.num_of_products,
                f.credit_score,
                f.has_credit_card,
                f.is_active_member,
                f.churn_flag,
            ])?;
        }
    }

    let record = PublishRecord {
        run_id: uuid::Uuid::new_v4().to_string(),
        published_at: Utc::now().to_rfc3339(),
        snapshot: warehouse.snapshot().to_string(),
        customers: warehouse.dim_customer().len() as i64,
        facts: warehouse.facts().len() as i64,
        churned: warehouse.facts().iter().filter(|f| f.churned()).count() as i64,
    };
    tx.execute(
        "INSERT INTO publish_log (run_id, published_at, snapshot, customers, facts, churned)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.run_id,
            record.published_at,
            record.snapshot,
            record.customers,
            record.facts,
            record.churned,
        ],
    )?;

    tx.commit()?;
    tracing::info!(snapshot = %record.snapshot, facts = record.facts, "published sqlite snapshot");
    Ok(record)
}

pub fn publish_history(conn: &Connection) -> Result<Vec<PublishRecord>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, published_at, snapshot, customers, facts, churned
         FROM publish_log
         ORDER BY published_at DESC",
    )?;

    let records = stmt
        .query_map([], |row| {
            Ok(PublishRecord {
                run_id: row.get(0)?,
                published_at: row.get(1)?,
                snapshot: row.get(2)?,
                customers: row.get(3)?,
                facts: row.get(4)?,
                churned: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(records)
}

pub fn table_count(conn: &Connection, table: &str) -> Result<i64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// LOAD
// ============================================================================

fn parse_label<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn query_rows<T>(conn: &Connection, sql: &str, map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], map)?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Read the published tables back and re-validate them as a warehouse.
pub fn load_warehouse(conn: &Connection) -> Result<Warehouse> {
    let geo = query_rows(conn, "SELECT geo_key, country FROM dim_geo ORDER BY geo_key", |row| {
        Ok(GeoRow {
            geo_key: SurrogateKey(row.get(0)?),
            country: row.get(1)?,
        })
    })?;

    let time = query_rows(
        conn,
        "SELECT time_key, year, month, quarter FROM dim_time ORDER BY time_key",
        |row| {
            Ok(TimeRow {
                time_key: SurrogateKey(row.get(0)?),
                year: row.get(1)?,
                month: row.get(2)?,
                quarter: row.get(3)?,
            })
        },
    )?;

    let segment = query_rows(
        conn,
        "SELECT segment_key, age_group, income_group FROM dim_segment ORDER BY segment_key",
        |row| {
            Ok(SegmentRow {
                segment_key: SurrogateKey(row.get(0)?),
                age_group: parse_label::<AgeGroup>(row, 1)?,
                income_group: parse_label::<IncomeGroup>(row, 2)?,
            })
        },
    )?;

    let customer = query_rows(
        conn,
        "SELECT customer_key, customer_id, gender, age, tenure FROM dim_customer ORDER BY customer_key",
        |row| {
            let customer_id: i64 = row.get(1)?;
            Ok(CustomerRow {
                customer_key: SurrogateKey(row.get(0)?),
                customer_id: u64::try_from(customer_id)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Integer, Box::new(e)))?,
                gender: row.get(2)?,
                age: row.get(3)?,
                tenure: row.get(4)?,
            })
        },
    )?;

    // Fact rows keep the customer order they were published in.
    let facts = query_rows(
        conn,
        &format!(
            "SELECT customer_key, time_key, geo_key, segment_key, balance, estimated_salary,
                    num_of_products, credit_score, has_credit_card, is_active_member, churn_flag
             FROM {FACT_TABLE}
             ORDER BY customer_key, time_key"
        ),
        |row| {
            Ok(FactRow {
                customer_key: SurrogateKey(row.get(0)?),
                time_key: SurrogateKey(row.get(1)?),
                geo_key: SurrogateKey(row.get(2)?),
                segment_key: SurrogateKey(row.get(3)?),
                balance: row.get(4)?,
                estimated_salary: row.get(5)?,
                num_of_products: row.get(6)?,
                credit_score: row.get(7)?,
                has_credit_card: row.get(8)?,
                is_active_member: row.get(9)?,
                churn_flag: row.get(10)?,
            })
        },
    )?;

    tracing::debug!(facts = facts.len(), "loaded warehouse from sqlite");
    Warehouse::from_tables(geo, time, segment, customer, facts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarehouseConfig;
    use crate::context::SnapshotTime;
    use crate::record::CustomerRecord;
    use crate::warehouse::build_warehouse;

    fn record(customer_id: u64, country: &str, age: u32, churn: u8) -> CustomerRecord {
        CustomerRecord {
            customer_id,
            gender: "Male".to_string(),
            age,
            tenure: 3,
            country: country.to_string(),
            balance: 1250.5,
            estimated_salary: 90_000.0,
            num_of_products: 2,
            credit_score: 710,
            has_credit_card: 1,
            is_active_member: 0,
            churn,
        }
    }

    fn warehouse(records: &[CustomerRecord]) -> Warehouse {
        build_warehouse(records, &WarehouseConfig::default(), SnapshotTime::new(2019, 12).unwrap()).unwrap()
    }

    #[test]
    fn test_publish_and_load_round_trip() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_warehouse(&conn).unwrap();

        let built = warehouse(&[
            record(10, "France", 30, 0),
            record(11, "Germany", 58, 1),
            record(12, "France", 22, 0),
        ]);
        let published = publish_to_sqlite(&mut conn, &built).unwrap();

        assert_eq!(published.facts, 3);
        assert_eq!(published.churned, 1);
        assert_eq!(table_count(&conn, FACT_TABLE).unwrap(), 3);
        assert_eq!(table_count(&conn, "dim_geo").unwrap(), 2);

        let loaded = load_warehouse(&conn).unwrap();
        assert_eq!(loaded.facts(), built.facts());
        assert_eq!(loaded.dim_customer(), built.dim_customer());
        assert_eq!(loaded.dim_segment(), built.dim_segment());
        assert_eq!(loaded.snapshot(), built.snapshot());
    }

    #[test]
    fn test_republish_replaces_previous_snapshot() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_warehouse(&conn).unwrap();

        publish_to_sqlite(&mut conn, &warehouse(&[record(1, "France", 30, 0), record(2, "Spain", 40, 0)])).unwrap();
        publish_to_sqlite(&mut conn, &warehouse(&[record(7, "Germany", 50, 1)])).unwrap();

        assert_eq!(table_count(&conn, FACT_TABLE).unwrap(), 1);
        assert_eq!(table_count(&conn, "dim_customer").unwrap(), 1);

        let loaded = load_warehouse(&conn).unwrap();
        assert_eq!(loaded.dim_geo()[0].country, "Germany");

        // The log keeps every publish.
        assert_eq!(publish_history(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_check_constraints_match_validator() {
        let conn = Connection::open_in_memory().unwrap();
        setup_warehouse(&conn).unwrap();

        let err = conn.execute(
            "INSERT INTO dim_customer (customer_key, customer_id, gender, age, tenure) VALUES (1, 1, 'Male', 17, 2)",
            [],
        );
        assert!(err.is_err(), "age below range must be rejected");

        let err = conn.execute(
            "INSERT INTO dim_segment (segment_key, age_group, income_group) VALUES (1, '<=25', 'Huge')",
            [],
        );
        assert!(err.is_err(), "unknown income group must be rejected");

        let err = conn.execute(
            &format!(
                "INSERT INTO {FACT_TABLE} VALUES (1, 1, 1, 1, 0.0, 0.0, 1, 700, 0, 1, 0)"
            ),
            [],
        );
        assert!(err.is_err(), "dangling foreign keys must be rejected");
    }

    #[test]
    fn test_open_database_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("warehouse.db");

        let mut conn = open_database(&path).unwrap();
        publish_to_sqlite(&mut conn, &warehouse(&[record(1, "France", 30, 0)])).unwrap();
        drop(conn);

        let conn = open_database(&path).unwrap();
        assert_eq!(load_warehouse(&conn).unwrap().facts().len(), 1);
    }
}
