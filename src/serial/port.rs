//! Serial line settings and the port handle used for one acquisition
//!
//! Opens the ADC's serial port with fixed line settings and exposes it to the
//! reader as a line-oriented byte source.

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read};
use std::time::Duration;

/// Baud rate the ESP32 characterisation firmware prints at
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Per-read timeout used while collecting a line
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Platform serial port used when none is configured
#[cfg(target_os = "windows")]
pub const DEFAULT_PORT: &str = "COM3";
#[cfg(not(target_os = "windows"))]
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Configuration for serial port connection
#[derive(Debug, Clone, PartialEq)]
pub struct PortConfig {
    /// Serial port path (e.g., COM3, /dev/ttyUSB0)
    pub port_path: String,
    /// Baud rate (default: 115200)
    pub baud_rate: u32,
    /// Data bits (default: 8)
    pub data_bits: DataBits,
    /// Parity (default: None)
    pub parity: Parity,
    /// Stop bits (default: 1)
    pub stop_bits: StopBits,
    /// Flow control (default: None)
    pub flow_control: FlowControl,
    /// Read timeout
    pub timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port_path: String::from(DEFAULT_PORT),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl PortConfig {
    /// Create a new configuration with the default 8N1 settings
    pub fn new(port_path: &str) -> Self {
        Self {
            port_path: port_path.to_string(),
            ..Default::default()
        }
    }

    /// Set the baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A byte stream the reader can poll for complete lines
pub trait LineLink {
    /// Number of bytes waiting in the receive buffer
    fn bytes_available(&mut self) -> io::Result<u32>;

    /// Read one line, without its terminating LF
    ///
    /// Returns whatever arrived before the read timeout if no LF was seen, and
    /// `None` if nothing arrived at all.
    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Opens a fresh link for every acquisition
pub trait Connector {
    type Link: LineLink;

    /// Open the link
    fn connect(&self) -> Result<Self::Link, serialport::Error>;

    /// Human-readable name of the port, used in messages
    fn port_name(&self) -> &str;

    /// Baud rate reported to the operator
    fn baud_rate(&self) -> u32;
}

/// An open serial port
///
/// The port is closed when the connection is dropped.
pub struct SerialConnection {
    port: Box<dyn SerialPort>,
    config: PortConfig,
}

impl SerialConnection {
    /// Open a serial connection with the given configuration
    pub fn open(config: PortConfig) -> Result<Self, serialport::Error> {
        let port = serialport::new(&config.port_path, config.baud_rate)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .flow_control(config.flow_control)
            .timeout(config.timeout)
            .open()?;

        log::debug!(
            "Opened {} at {} baud ({:?}, {:?}, {:?})",
            config.port_path,
            config.baud_rate,
            config.data_bits,
            config.parity,
            config.stop_bits
        );

        Ok(Self { port, config })
    }
}

impl LineLink for SerialConnection {
    fn bytes_available(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::from)
    }

    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buffer = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match self.port.read(&mut byte) {
                Ok(1) => {
                    if byte[0] == b'\n' {
                        return Ok(Some(buffer));
                    }
                    buffer.push(byte[0]);
                }
                Ok(_) => break,
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }

        if buffer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(buffer))
        }
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        log::debug!("Closed {}", self.config.port_path);
    }
}

/// Connector for a real serial port
#[derive(Debug, Clone)]
pub struct SerialConnector {
    config: PortConfig,
}

impl SerialConnector {
    pub fn new(config: PortConfig) -> Self {
        Self { config }
    }
}

impl Connector for SerialConnector {
    type Link = SerialConnection;

    fn connect(&self) -> Result<SerialConnection, serialport::Error> {
        SerialConnection::open(self.config.clone())
    }

    fn port_name(&self) -> &str {
        &self.config.port_path
    }

    fn baud_rate(&self) -> u32 {
        self.config.baud_rate
    }
}
