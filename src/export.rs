//! CSV export of the session's comparisons

use crate::session::store::{MeasurementRecord, VoltageStore};
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Header row of every exported file
pub const CSV_HEADER: &str = "Timestamp,Measured Voltage (V),Serial Voltage (V),Difference (V)";

/// Prefix of generated file names
const FILE_PREFIX: &str = "voltage_comparison_";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no measurements to export")]
    NoRecords,

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of a successful export
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub records: usize,
}

/// Timestamped file name, e.g. `voltage_comparison_20250301_142233.csv`
pub fn default_file_name(now: DateTime<Local>) -> String {
    format!("{}{}.csv", FILE_PREFIX, now.format("%Y%m%d_%H%M%S"))
}

/// Write the store to `path`, or to a timestamped file in the working directory
///
/// Nothing is created when the store is empty.
pub fn save_to_csv(store: &VoltageStore, path: Option<&Path>) -> Result<ExportSummary, ExportError> {
    if store.is_empty() {
        return Err(ExportError::NoRecords);
    }

    let path = match path {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(default_file_name(Local::now())),
    };

    write_file(store, &path).map_err(|source| ExportError::Io {
        path: path.clone(),
        source,
    })?;

    log::info!("Wrote {} measurements to {}", store.len(), path.display());

    Ok(ExportSummary {
        path,
        records: store.len(),
    })
}

fn write_file(store: &VoltageStore, path: &Path) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_records(&mut writer, store.records())?;
    writer.flush()
}

/// Write the header and one row per record
pub fn write_records<W: Write>(writer: &mut W, records: &[MeasurementRecord]) -> io::Result<()> {
    writeln!(writer, "{}", CSV_HEADER)?;
    for record in records {
        writeln!(writer, "{}", format_row(record))?;
    }
    Ok(())
}

fn format_row(record: &MeasurementRecord) -> String {
    format!(
        "{},{:.3},{:.3},{:+.3}",
        record.timestamp().format("%H:%M:%S"),
        record.measured_voltage(),
        record.serial_voltage(),
        record.difference()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use tempfile::tempdir;

    fn record(secs: u32, measured: f64, serial: f64) -> MeasurementRecord {
        let time = NaiveTime::from_hms_opt(14, 22, secs).unwrap();
        MeasurementRecord::new(time, measured, serial)
    }

    #[test]
    fn test_row_format() {
        assert_eq!(format_row(&record(33, 3.30, 3.45)), "14:22:33,3.300,3.450,+0.150");
        assert_eq!(format_row(&record(1, 12.5, 12.25)), "14:22:01,12.500,12.250,-0.250");
        assert_eq!(format_row(&record(2, 5.0, 5.0)), "14:22:02,5.000,5.000,+0.000");
    }

    #[test]
    fn test_default_file_name() {
        let now = Local.with_ymd_and_hms(2025, 3, 1, 14, 22, 33).unwrap();
        assert_eq!(default_file_name(now), "voltage_comparison_20250301_142233.csv");
    }

    #[test]
    fn test_export_writes_header_and_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let mut store = VoltageStore::new();
        store.push(record(0, 3.30, 3.45));
        store.push(record(5, 1.0, 0.98));
        store.push(record(9, 100.0, 100.5));

        let summary = save_to_csv(&store, Some(&path)).unwrap();
        assert_eq!(summary.records, 3);
        assert_eq!(summary.path, path);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "14:22:00,3.300,3.450,+0.150");

        for row in &lines[1..] {
            let difference = row.rsplit(',').next().unwrap();
            assert!(difference.starts_with('+') || difference.starts_with('-'));
            let decimals = difference.split('.').nth(1).unwrap();
            assert_eq!(decimals.len(), 3);
        }
    }

    #[test]
    fn test_empty_store_creates_no_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never.csv");

        let result = save_to_csv(&VoltageStore::new(), Some(&path));
        assert!(matches!(result, Err(ExportError::NoRecords)));
        assert!(!path.exists());
    }

    #[test]
    fn test_write_failure_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("out.csv");

        let mut store = VoltageStore::new();
        store.push(record(0, 1.0, 1.0));

        match save_to_csv(&store, Some(&path)) {
            Err(ExportError::Io { path: failed, .. }) => assert_eq!(failed, path),
            other => panic!("expected I/O error, got {:?}", other),
        }
    }
}
