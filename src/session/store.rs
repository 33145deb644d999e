//! In-memory record of the session's comparisons

use chrono::NaiveTime;

/// One completed measured/serial pairing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementRecord {
    timestamp: NaiveTime,
    measured_voltage: f64,
    serial_voltage: f64,
    difference: f64,
}

impl MeasurementRecord {
    /// Pair an operator measurement with the device reading taken for it
    pub fn new(timestamp: NaiveTime, measured_voltage: f64, serial_voltage: f64) -> Self {
        Self {
            timestamp,
            measured_voltage,
            serial_voltage,
            difference: serial_voltage - measured_voltage,
        }
    }

    pub fn timestamp(&self) -> NaiveTime {
        self.timestamp
    }

    pub fn measured_voltage(&self) -> f64 {
        self.measured_voltage
    }

    pub fn serial_voltage(&self) -> f64 {
        self.serial_voltage
    }

    /// Serial voltage minus measured voltage
    pub fn difference(&self) -> f64 {
        self.difference
    }
}

/// Difference statistics over the whole store
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreSummary {
    pub count: usize,
    pub mean_difference: f64,
    pub min_difference: f64,
    pub max_difference: f64,
    /// Largest deviation regardless of sign
    pub max_abs_difference: f64,
}

/// Records in capture order
#[derive(Debug, Default)]
pub struct VoltageStore {
    records: Vec<MeasurementRecord>,
}

impl VoltageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: MeasurementRecord) {
        self.records.push(record);
        log::debug!("Stored measurement #{}", self.records.len());
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[MeasurementRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &MeasurementRecord> {
        self.records.iter()
    }

    /// Summarise the differences, `None` when nothing was recorded
    pub fn summary(&self) -> Option<StoreSummary> {
        let first = self.records.first()?.difference();

        let mut sum = 0.0;
        let mut min = first;
        let mut max = first;
        let mut max_abs = first.abs();

        for difference in self.iter().map(MeasurementRecord::difference) {
            sum += difference;
            min = min.min(difference);
            max = max.max(difference);
            max_abs = max_abs.max(difference.abs());
        }

        Some(StoreSummary {
            count: self.records.len(),
            mean_difference: sum / self.records.len() as f64,
            min_difference: min,
            max_difference: max,
            max_abs_difference: max_abs,
        })
    }
}
