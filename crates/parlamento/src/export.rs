//! Flattened attendance rows and their CSV encoding.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// One attendance record joined with its meeting, member and party.
/// Field order is the column order of the export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRow {
    pub legislature: String,
    pub date: NaiveDate,
    pub number: u32,
    pub attendance_bid: i64,
    pub meeting_type: String,
    pub member_name: String,
    pub mp_bid: i64,
    pub party: String,
    pub status: String,
    pub reason: String,
}

/// Writes `rows` as header-less CSV and returns how many were written.
pub fn write_csv<W: Write>(writer: W, rows: &[ExportRow]) -> Result<usize, ExportError> {
    let mut out = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    for row in rows {
        out.serialize(row)?;
    }
    out.flush()?;

    Ok(rows.len())
}

pub fn read_csv<R: Read>(reader: R) -> Result<Vec<ExportRow>, ExportError> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(reader)
        .deserialize()
        .map(|row| row.map_err(ExportError::from))
        .collect()
}

/// Dumps every stored attendance record to `path`.
pub fn export_to_file<S: Store>(store: &mut S, path: impl AsRef<Path>) -> Result<usize, ExportError> {
    let rows = store.export_rows()?;
    let file = File::create(path.as_ref())?;
    let written = write_csv(file, &rows)?;
    log::info!(
        "Exported {} attendance row(s) to {}",
        written,
        path.as_ref().display()
    );
    Ok(written)
}
