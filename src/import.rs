//! Bulk student import from delimited text or spreadsheet files.
//!
//! Rows are validated and inserted independently: one malformed row is
//! reported and skipped, it never rolls back rows already committed in the
//! same run. Only a file-level decode failure (unknown extension, corrupt
//! bytes) aborts before any row is attempted.

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::sheet;

pub const REQUIRED_FIELDS: [&str; 10] = [
    "code",
    "name",
    "email",
    "phone",
    "address",
    "birth_date",
    "birth_place",
    "enrollment_year",
    "specialtyId",
    "gradeId",
];

pub const TEMPLATE_CSV: &str = "\
code,name,email,phone,address,birth_date,birth_place,enrollment_year,gradeId,specialtyId\n\
STU001,John Doe,john@example.com,0555554544,Algiers address,2000-01-15,Algiers,2023-09-01,2,3\n";

#[derive(Debug, Serialize)]
pub struct RowFailure {
    pub row: usize,
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    #[serde(rename = "successCount")]
    pub success: usize,
    #[serde(rename = "failedCount")]
    pub failed: usize,
    pub errors: Vec<RowFailure>,
}

type RawRow = HashMap<String, String>;

/// Decode `bytes` according to the file extension, then validate and insert
/// row by row. Returns the aggregate report; never fails past the decode
/// boundary.
pub fn import_bulk(
    conn: &Connection,
    file_name: &str,
    bytes: &[u8],
) -> Result<ImportReport, ServiceError> {
    let extension = file_name
        .rsplit('.')
        .next()
        .filter(|ext| !ext.is_empty() && !file_name.eq_ignore_ascii_case(ext))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    let rows = match extension.as_str() {
        "csv" => decode_csv(bytes)?,
        "xlsx" | "xls" => decode_sheet(bytes)?,
        other => return Err(ServiceError::UnsupportedFormat(other.to_string())),
    };

    let mut report = ImportReport::default();
    for (i, row) in rows.iter().enumerate() {
        // 1-indexed header row, data starts at row 2.
        let row_number = i + 2;
        match import_row(conn, row) {
            Ok(()) => report.success += 1,
            Err((field, message)) => {
                report.failed += 1;
                report.errors.push(RowFailure {
                    row: row_number,
                    field,
                    message,
                });
            }
        }
    }

    info!(
        "import of {} finished: {} succeeded, {} failed",
        file_name, report.success, report.failed
    );
    Ok(report)
}

fn import_row(conn: &Connection, row: &RawRow) -> Result<(), (&'static str, String)> {
    let missing = REQUIRED_FIELDS
        .iter()
        .any(|f| row.get(*f).map(|v| v.trim().is_empty()).unwrap_or(true));
    if missing {
        return Err((
            "required",
            format!("missing required fields ({})", REQUIRED_FIELDS.join(", ")),
        ));
    }

    let grade_raw = row["gradeId"].trim();
    let grade_id = match grade_raw.parse::<i64>() {
        Ok(id) => id,
        Err(_) => {
            return Err(("grade", format!("grade id \"{grade_raw}\" is not a number")));
        }
    };
    match lookup_exists(conn, "grades", grade_id) {
        Ok(true) => {}
        Ok(false) => {
            return Err(("grade", format!("grade with id \"{grade_id}\" not found")));
        }
        Err(e) => return Err(("database", e.to_string())),
    }

    let specialty_raw = row["specialtyId"].trim();
    let specialty_id = match specialty_raw.parse::<i64>() {
        Ok(id) => id,
        Err(_) => {
            return Err((
                "specialty",
                format!("specialty id \"{specialty_raw}\" is not a number"),
            ));
        }
    };
    match lookup_exists(conn, "specialties", specialty_id) {
        Ok(true) => {}
        Ok(false) => {
            return Err((
                "specialty",
                format!("specialty with id \"{specialty_id}\" not found"),
            ));
        }
        Err(e) => return Err(("database", e.to_string())),
    }

    let birth_date = parse_date_field("birth_date", row["birth_date"].trim())
        .map_err(|m| ("database", m))?;
    let enrollment_year = parse_date_field("enrollment_year", row["enrollment_year"].trim())
        .map_err(|m| ("database", m))?;

    let inserted = conn.execute(
        "INSERT INTO students(id, code, name, email, phone, address, birth_date,
         birth_place, enrollment_year, grade_id, specialty_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            row["code"].trim(),
            row["name"].trim(),
            row["email"].trim(),
            row["phone"].trim(),
            row["address"].trim(),
            &birth_date,
            row["birth_place"].trim(),
            &enrollment_year,
            grade_id,
            specialty_id,
            chrono::Utc::now().to_rfc3339(),
        ),
    );
    match inserted {
        Ok(_) => Ok(()),
        Err(e) => Err(("database", e.to_string())),
    }
}

fn lookup_exists(conn: &Connection, table: &str, id: i64) -> Result<bool, rusqlite::Error> {
    // Table names come from the two fixed call sites, never from input.
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found: Option<i64> = conn.query_row(&sql, [id], |r| r.get(0)).optional()?;
    Ok(found.is_some())
}

/// Dates arrive as YYYY-MM-DD; a bare year is accepted for enrollment-style
/// fields and pinned to January 1st.
fn parse_date_field(field: &str, value: &str) -> Result<String, String> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.format("%Y-%m-%d").to_string());
    }
    if let Ok(year) = value.parse::<i32>() {
        if let Some(date) = NaiveDate::from_ymd_opt(year, 1, 1) {
            return Ok(date.format("%Y-%m-%d").to_string());
        }
    }
    Err(format!(
        "invalid {field} \"{value}\" (expected YYYY-MM-DD)"
    ))
}

/// Spreadsheet tools prepend a BOM to the first header cell; strip it and
/// surrounding whitespace so required-field checks match.
fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{FEFF}').trim().to_string()
}

fn decode_csv(bytes: &[u8]) -> Result<Vec<RawRow>, ServiceError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ServiceError::BadRequest(format!("invalid csv: {e}")))?
        .iter()
        .map(normalize_header)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ServiceError::BadRequest(format!("invalid csv: {e}")))?;
        if record.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let mut row = RawRow::new();
        for (i, header) in headers.iter().enumerate() {
            let value = record.get(i).unwrap_or("").to_string();
            row.insert(header.clone(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

fn decode_sheet(bytes: &[u8]) -> Result<Vec<RawRow>, ServiceError> {
    let grid =
        sheet::read_first_sheet(bytes).map_err(|e| ServiceError::BadRequest(e.to_string()))?;
    let mut it = grid.into_iter();
    let Some(header_row) = it.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header_row.iter().map(|h| normalize_header(h)).collect();

    let mut rows = Vec::new();
    for cells in it {
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let mut row = RawRow::new();
        for (i, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let value = cells.get(i).cloned().unwrap_or_default();
            row.insert(header.clone(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}
