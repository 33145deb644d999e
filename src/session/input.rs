//! Operator input classification
//!
//! An entry passes the shape check if it is at most five characters and is
//! digits once every `.` and `-` is removed. It must then parse as a number
//! between 0 and 999.

use thiserror::Error;

/// Keyword that ends the session and saves the data
pub const END_KEYWORD: &str = "end";

/// Longest accepted voltage entry, e.g. `999.9` or `3.300`
const MAX_ENTRY_LEN: usize = 5;

pub const MIN_VOLTAGE: f64 = 0.0;
pub const MAX_VOLTAGE: f64 = 999.0;

/// A well-formed operator entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Entry {
    /// Measured voltage to compare against the next serial reading
    Voltage(f64),
    /// Stop collecting and save
    End,
}

/// Why an entry was refused
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("Please enter a valid 3-digit number (e.g., 3.30, 12.5, 100) or 'end' to save and exit")]
    Malformed,

    #[error("Please enter a valid number")]
    NotANumber,

    #[error("Please enter a voltage between 0 and 999V")]
    OutOfRange(f64),
}

/// Classify one line typed by the operator
pub fn parse_entry(line: &str) -> Result<Entry, InputError> {
    let entry = line.trim().to_lowercase();

    if entry == END_KEYWORD {
        return Ok(Entry::End);
    }

    if !is_numeric_shape(&entry) {
        return Err(InputError::Malformed);
    }

    let voltage: f64 = entry.parse().map_err(|_| InputError::NotANumber)?;

    if (MIN_VOLTAGE..=MAX_VOLTAGE).contains(&voltage) {
        Ok(Entry::Voltage(voltage))
    } else {
        Err(InputError::OutOfRange(voltage))
    }
}

fn is_numeric_shape(entry: &str) -> bool {
    if entry.chars().count() > MAX_ENTRY_LEN {
        return false;
    }

    let mut digits = entry.chars().filter(|c| *c != '.' && *c != '-').peekable();
    digits.peek().is_some() && digits.all(|c| c.is_ascii_digit())
}
