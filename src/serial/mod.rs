//! Serial link to the ADC under characterisation
//!
//! This module provides functionality for:
//! - Opening the serial port with the configured line settings
//! - Polling the port for newline-terminated voltage readings
//! - Cancelling a pending read and releasing the port

pub mod port;
pub mod reader;

pub use port::{PortConfig, SerialConnector};
pub use reader::{CancelFlag, ReaderOptions, VoltageReader, VoltageSource};
