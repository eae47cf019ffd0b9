// 📥 Input Boundary - typed customer records
//
// The upstream cleaning stage hands over a rectangular CSV. Each row is
// deserialized into a typed CustomerRecord here, so schema drift fails fast
// with the offending row and column instead of flowing into the warehouse.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WarehouseError};

/// One customer snapshot. Immutable for the duration of a build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerRecord {
    /// Natural (business) customer identifier.
    pub customer_id: u64,
    pub gender: String,
    pub age: u32,
    pub tenure: u32,
    pub country: String,
    pub balance: f64,
    pub estimated_salary: f64,
    pub num_of_products: u8,
    pub credit_score: u16,
    /// 0/1 flags, kept numeric so out-of-domain values reach the validator.
    pub has_credit_card: u8,
    pub is_active_member: u8,
    pub churn: u8,
}

/// Column layout of the cleaned churn file. Unknown columns
/// (RowNumber, Surname, AgeGroup, ...) are ignored.
#[derive(Debug, Deserialize)]
struct RawCustomerRow {
    #[serde(rename = "CustomerId", default)]
    customer_id: Option<u64>,

    #[serde(rename = "CreditScore")]
    credit_score: u16,

    #[serde(rename = "Geography")]
    geography: String,

    #[serde(rename = "Gender")]
    gender: String,

    #[serde(rename = "Age")]
    age: u32,

    #[serde(rename = "Tenure")]
    tenure: u32,

    #[serde(rename = "Balance")]
    balance: f64,

    #[serde(rename = "NumOfProducts")]
    num_of_products: u8,

    #[serde(rename = "HasCrCard")]
    has_cr_card: u8,

    #[serde(rename = "IsActiveMember")]
    is_active_member: u8,

    #[serde(rename = "EstimatedSalary")]
    estimated_salary: f64,

    #[serde(rename = "Exited")]
    exited: u8,
}

impl RawCustomerRow {
    /// `row` is the 1-based data row; it stands in for a missing CustomerId.
    fn into_record(self, row: usize) -> Result<CustomerRecord> {
        if self.geography.is_empty() {
            return Err(WarehouseError::invalid_record(row, "Geography", "empty value"));
        }
        if self.gender.is_empty() {
            return Err(WarehouseError::invalid_record(row, "Gender", "empty value"));
        }

        Ok(CustomerRecord {
            customer_id: self.customer_id.unwrap_or(row as u64),
            gender: self.gender,
            age: self.age,
            tenure: self.tenure,
            country: self.geography,
            balance: self.balance,
            estimated_salary: self.estimated_salary,
            num_of_products: self.num_of_products,
            credit_score: self.credit_score,
            has_credit_card: self.has_cr_card,
            is_active_member: self.is_active_member,
            churn: self.exited,
        })
    }
}

/// Load all customer records from a CSV file, preserving file order.
pub fn load_records(csv_path: &Path) -> Result<Vec<CustomerRecord>> {
    let file = std::fs::File::open(csv_path).map_err(|e| WarehouseError::io(csv_path, e))?;
    let records = read_records(file)?;
    tracing::info!(path = %csv_path.display(), records = records.len(), "loaded customer records");
    Ok(records)
}

/// Read customer records from any CSV source.
pub fn read_records<R: Read>(source: R) -> Result<Vec<CustomerRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers = rdr.headers()?.clone();
    let mut records = Vec::new();

    for (idx, result) in rdr.deserialize::<RawCustomerRow>().enumerate() {
        let row = idx + 1;
        let raw = result.map_err(|e| deserialize_error(row, &headers, e))?;
        records.push(raw.into_record(row)?);
    }

    if records.is_empty() {
        return Err(WarehouseError::invalid_record(0, "*", "input contains no records"));
    }

    Ok(records)
}

fn deserialize_error(row: usize, headers: &csv::StringRecord, err: csv::Error) -> WarehouseError {
    match err.kind() {
        csv::ErrorKind::Deserialize { err: de, .. } => {
            let field = de
                .field()
                .and_then(|i| headers.get(i as usize))
                .unwrap_or("*")
                .to_string();
            WarehouseError::InvalidRecord {
                row,
                field,
                reason: de.kind().to_string(),
            }
        }
        _ => WarehouseError::Csv(err),
    }
}
