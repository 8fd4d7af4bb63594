//! Output formatting and persistence for run reports and canonical rows.
//!
//! Supports pretty-printing, JSON logging, and CSV append.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::report::RunReport;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// Logs a run report using Rust's debug pretty-print format.
pub fn print_pretty(report: &RunReport) {
    debug!("{:#?}", report);
}

/// Logs a run report as pretty-printed JSON.
pub fn print_json(report: &RunReport) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

/// Appends `records` as rows to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_records<T: Serialize>(path: &str, records: &[T]) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, rows = records.len(), "Appending CSV records");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(())
}

/// Appends a single [`RunReport`] row.
pub fn append_record(path: &str, report: &RunReport) -> Result<()> {
    append_records(path, std::slice::from_ref(report))
}
