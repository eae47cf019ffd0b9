// 📦 CSV Publisher - five table files plus a digest manifest
//
// Files are rendered in memory, written into a fresh staging directory next
// to the target, and only then swapped into place. A failure at any point
// leaves the previously published snapshot untouched. A process that dies
// between the two renames of the swap leaves the old snapshot under
// `.<name>.previous-<token>`; the next publish restores or removes it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::SnapshotTime;
use crate::dimensions::DimensionKind;
use crate::error::{Result, WarehouseError};
use crate::validation::FACT_TABLE;
use crate::warehouse::Warehouse;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Published tables in file order.
pub const TABLES: [&str; 5] = ["dim_customer", "dim_geo", "dim_time", "dim_segment", FACT_TABLE];

pub fn table_file(table: &str) -> String {
    format!("{table}.csv")
}

// ============================================================================
// MANIFEST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    pub table: String,
    pub file: String,
    pub rows: usize,
    pub sha256: String,
}

/// Describes one published snapshot. Contains no timestamps or random ids,
/// so identical builds produce identical manifests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub snapshot: SnapshotTime,
    pub tables: Vec<TableEntry>,
}

impl Manifest {
    pub fn entry(&self, table: &str) -> Option<&TableEntry> {
        self.tables.iter().find(|t| t.table == table)
    }
}

struct RenderedTable {
    table: &'static str,
    rows: usize,
    bytes: Vec<u8>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn to_csv<T: Serialize>(table: &'static str, rows: &[T]) -> Result<RenderedTable> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for row in rows {
        wtr.serialize(row)?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| WarehouseError::io(table_file(table), e.into_error()))?;

    Ok(RenderedTable {
        table,
        rows: rows.len(),
        bytes,
    })
}

fn render(warehouse: &Warehouse) -> Result<Vec<RenderedTable>> {
    Ok(vec![
        to_csv(DimensionKind::Customer.table(), warehouse.dim_customer())?,
        to_csv(DimensionKind::Geography.table(), warehouse.dim_geo())?,
        to_csv(DimensionKind::Time.table(), warehouse.dim_time())?,
        to_csv(DimensionKind::Segment.table(), warehouse.dim_segment())?,
        to_csv(FACT_TABLE, warehouse.facts())?,
    ])
}

// ============================================================================
// PUBLISH
// ============================================================================

/// Publish a validated warehouse into `out_dir`, replacing any previous snapshot.
pub fn publish_csv(warehouse: &Warehouse, out_dir: &Path) -> Result<Manifest> {
    let rendered = render(warehouse)?;

    let manifest = Manifest {
        snapshot: warehouse.snapshot(),
        tables: rendered
            .iter()
            .map(|t| TableEntry {
                table: t.table.to_string(),
                file: table_file(t.table),
                rows: t.rows,
                sha256: sha256_hex(&t.bytes),
            })
            .collect(),
    };
    let manifest_json = serde_json::to_vec_pretty(&manifest)?;

    let (parent, name) = split_target(out_dir)?;
    fs::create_dir_all(&parent).map_err(|e| WarehouseError::io(&parent, e))?;
    recover_interrupted(&parent, &name, out_dir)?;

    let token = uuid::Uuid::new_v4().simple().to_string();
    let staging = parent.join(format!(".{name}.staging-{token}"));
    fs::create_dir(&staging).map_err(|e| WarehouseError::io(&staging, e))?;

    if let Err(e) = write_staging(&staging, &rendered, &manifest_json) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    swap_into_place(&staging, out_dir, &parent.join(format!(".{name}.previous-{token}")))?;

    tracing::info!(dir = %out_dir.display(), tables = manifest.tables.len(), "published csv snapshot");
    Ok(manifest)
}

fn split_target(out_dir: &Path) -> Result<(PathBuf, String)> {
    let name = out_dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| WarehouseError::config(format!("output dir {out_dir:?} has no usable name")))?
        .to_string();
    let parent = match out_dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((parent, name))
}

/// Clean up after a publish that died mid-swap. If the target is missing the
/// newest backup is moved back into place; every other backup is removed.
fn recover_interrupted(parent: &Path, name: &str, out_dir: &Path) -> Result<()> {
    let prefix = format!(".{name}.previous-");
    let mut backups = Vec::new();
    for entry in fs::read_dir(parent).map_err(|e| WarehouseError::io(parent, e))? {
        let entry = entry.map_err(|e| WarehouseError::io(parent, e))?;
        if entry.file_name().to_str().is_some_and(|n| n.starts_with(&prefix)) {
            let modified = entry.metadata().and_then(|m| m.modified()).ok();
            backups.push((modified, entry.path()));
        }
    }
    if backups.is_empty() {
        return Ok(());
    }

    backups.sort();
    if !out_dir.exists() {
        if let Some((_, newest)) = backups.pop() {
            fs::rename(&newest, out_dir).map_err(|e| WarehouseError::io(&newest, e))?;
            tracing::warn!(dir = %out_dir.display(), from = %newest.display(), "restored snapshot left by an interrupted publish");
        }
    }

    for (_, stale) in backups {
        fs::remove_dir_all(&stale).map_err(|e| WarehouseError::io(&stale, e))?;
        tracing::warn!(dir = %stale.display(), "removed stale snapshot backup");
    }
    Ok(())
}

fn write_staging(staging: &Path, rendered: &[RenderedTable], manifest_json: &[u8]) -> Result<()> {
    for table in rendered {
        let path = staging.join(table_file(table.table));
        fs::write(&path, &table.bytes).map_err(|e| WarehouseError::io(&path, e))?;
    }
    let path = staging.join(MANIFEST_FILE);
    fs::write(&path, manifest_json).map_err(|e| WarehouseError::io(&path, e))
}

fn swap_into_place(staging: &Path, out_dir: &Path, backup: &Path) -> Result<()> {
    let had_previous = out_dir.exists();
    if had_previous {
        if let Err(e) = fs::rename(out_dir, backup) {
            let _ = fs::remove_dir_all(staging);
            return Err(WarehouseError::io(out_dir, e));
        }
    }

    if let Err(e) = fs::rename(staging, out_dir) {
        if had_previous {
            let _ = fs::rename(backup, out_dir);
        }
        let _ = fs::remove_dir_all(staging);
        return Err(WarehouseError::io(out_dir, e));
    }

    if had_previous {
        if let Err(e) = fs::remove_dir_all(backup) {
            tracing::warn!(dir = %backup.display(), error = %e, "could not remove previous snapshot");
        }
    }
    Ok(())
}

// ============================================================================
// LOAD
// ============================================================================

pub fn read_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    let bytes = fs::read(&path).map_err(|e| WarehouseError::io(&path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Digest every published file and compare it with the manifest.
/// Returns the tables whose contents no longer match.
pub fn verify_published(dir: &Path) -> Result<Vec<String>> {
    let manifest = read_manifest(dir)?;
    let mut mismatched = Vec::new();

    for entry in &manifest.tables {
        let path = dir.join(&entry.file);
        let bytes = fs::read(&path).map_err(|e| WarehouseError::io(&path, e))?;
        if sha256_hex(&bytes) != entry.sha256 {
            mismatched.push(entry.table.clone());
        }
    }

    Ok(mismatched)
}

fn read_table<T: DeserializeOwned>(dir: &Path, table: &str) -> Result<Vec<T>> {
    let path = dir.join(table_file(table));
    let file = fs::File::open(&path).map_err(|e| WarehouseError::io(&path, e))?;
    let mut rdr = csv::Reader::from_reader(file);
    let rows = rdr.deserialize().collect::<std::result::Result<Vec<T>, _>>()?;
    Ok(rows)
}

/// Load and re-validate a published CSV snapshot.
pub fn load_published(dir: &Path) -> Result<Warehouse> {
    let mismatched = verify_published(dir)?;
    if !mismatched.is_empty() {
        return Err(WarehouseError::config(format!(
            "published files differ from {MANIFEST_FILE}: {}",
            mismatched.join(", ")
        )));
    }

    Warehouse::from_tables(
        read_table(dir, DimensionKind::Geography.table())?,
        read_table(dir, DimensionKind::Time.table())?,
        read_table(dir, DimensionKind::Segment.table())?,
        read_table(dir, DimensionKind::Customer.table())?,
        read_table(dir, FACT_TABLE)?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarehouseConfig;
    use crate::record::CustomerRecord;
    use crate::warehouse::build_warehouse;

    fn warehouse() -> Warehouse {
        let records = vec![
            CustomerRecord {
                customer_id: 15634602,
                gender: "Female".to_string(),
                age: 42,
                tenure: 2,
                country: "France".to_string(),
                balance: 0.0,
                estimated_salary: 101348.88,
                num_of_products: 1,
                credit_score: 619,
                has_credit_card: 1,
                is_active_member: 1,
                churn: 1,
            },
            CustomerRecord {
                customer_id: 15647311,
                gender: "Female".to_string(),
                age: 41,
                tenure: 1,
                country: "Spain".to_string(),
                balance: 83807.86,
                estimated_salary: 112542.58,
                num_of_products: 1,
                credit_score: 608,
                has_credit_card: 0,
                is_active_member: 1,
                churn: 0,
            },
        ];
        build_warehouse(&records, &WarehouseConfig::default(), SnapshotTime::new(2019, 12).unwrap()).unwrap()
    }

    #[test]
    fn test_published_headers_match_ddl_columns() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("processed");
        publish_csv(&warehouse(), &out).unwrap();

        let header = |table: &str| {
            let text = fs::read_to_string(out.join(table_file(table))).unwrap();
            text.lines().next().unwrap().to_string()
        };

        assert_eq!(header("dim_customer"), "customer_key,customer_id,gender,age,tenure");
        assert_eq!(header("dim_geo"), "geo_key,country");
        assert_eq!(header("dim_time"), "time_key,year,month,quarter");
        assert_eq!(header("dim_segment"), "segment_key,age_group,income_group");
        assert_eq!(
            header(FACT_TABLE),
            "customer_key,time_key,geo_key,segment_key,balance,estimated_salary,num_of_products,credit_score,has_credit_card,is_active_member,churn_flag"
        );

        let time = fs::read_to_string(out.join("dim_time.csv")).unwrap();
        assert_eq!(time, "time_key,year,month,quarter\n1,2019,12,4\n");
    }

    #[test]
    fn test_republish_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("processed");

        let first = publish_csv(&warehouse(), &out).unwrap();
        let snapshot_one: Vec<Vec<u8>> = TABLES
            .iter()
            .map(|t| fs::read(out.join(table_file(t))).unwrap())
            .collect();
        let manifest_one = fs::read(out.join(MANIFEST_FILE)).unwrap();

        let second = publish_csv(&warehouse(), &out).unwrap();
        let snapshot_two: Vec<Vec<u8>> = TABLES
            .iter()
            .map(|t| fs::read(out.join(table_file(t))).unwrap())
            .collect();

        assert_eq!(first, second);
        assert_eq!(snapshot_one, snapshot_two);
        assert_eq!(manifest_one, fs::read(out.join(MANIFEST_FILE)).unwrap());

        // No staging or backup directories are left behind.
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_load_published_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("processed");
        let built = warehouse();
        publish_csv(&built, &out).unwrap();

        assert!(verify_published(&out).unwrap().is_empty());

        let loaded = load_published(&out).unwrap();
        assert_eq!(loaded.facts(), built.facts());
        assert_eq!(loaded.dim_segment(), built.dim_segment());
        assert_eq!(loaded.snapshot(), built.snapshot());
    }

    #[test]
    fn test_tampered_file_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("processed");
        publish_csv(&warehouse(), &out).unwrap();

        fs::write(out.join("dim_geo.csv"), "geo_key,country\n1,France\n2,Italy\n").unwrap();

        assert_eq!(verify_published(&out).unwrap(), vec!["dim_geo".to_string()]);
        assert!(load_published(&out).is_err());
    }

    #[test]
    fn test_interrupted_swap_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("processed");
        publish_csv(&warehouse(), &out).unwrap();
        let published = fs::read(out.join(MANIFEST_FILE)).unwrap();

        // The old snapshot was moved aside but the new one never arrived.
        fs::rename(&out, dir.path().join(".processed.previous-dead")).unwrap();
        assert!(!out.exists());

        recover_interrupted(dir.path(), "processed", &out).unwrap();
        assert_eq!(fs::read(out.join(MANIFEST_FILE)).unwrap(), published);
        assert!(verify_published(&out).unwrap().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_republish_clears_stale_backups() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("processed");
        publish_csv(&warehouse(), &out).unwrap();

        fs::rename(&out, dir.path().join(".processed.previous-dead")).unwrap();
        fs::create_dir(dir.path().join(".processed.previous-older")).unwrap();
        fs::create_dir(dir.path().join(".other.previous-keep")).unwrap();

        publish_csv(&warehouse(), &out).unwrap();
        assert!(verify_published(&out).unwrap().is_empty());

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec![".other.previous-keep".to_string(), "processed".to_string()]);
    }
}
