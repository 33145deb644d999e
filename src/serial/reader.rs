//! Voltage acquisition from the serial stream
//!
//! The device prints one decimal voltage per line. A read opens the port, polls
//! for input and skips every line that is not a number. It returns the first
//! valid value, or gives up when cancelled or when the optional deadline passes.
//! The port is released on every return path.

use crate::serial::port::{Connector, LineLink};
use chrono::Local;
use colored::Colorize;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Wait between polls when the receive buffer is empty
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reasons an acquisition produced no value
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("no valid voltage received within {0:?}")]
    TimedOut(Duration),

    #[error("read cancelled by operator")]
    Cancelled,

    #[error("failed to report progress: {0}")]
    Transcript(#[from] io::Error),
}

impl ReadError {
    /// Operator hint for this failure, if there is one
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ReadError::Open { .. } => {
                Some("Make sure the device is connected and the port is correct.")
            }
            ReadError::TimedOut(_) => Some("Check that the device is streaming readings."),
            ReadError::Cancelled | ReadError::Transcript(_) => None,
        }
    }
}

/// Shared flag used to abandon an in-flight read
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the reader to stop at its next poll
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Polling behaviour of a [`VoltageReader`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReaderOptions {
    /// Sleep between polls of an empty receive buffer
    pub poll_interval: Duration,
    /// Give up after this long without a valid value (`None` waits forever)
    pub acquire_timeout: Option<Duration>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            acquire_timeout: None,
        }
    }
}

/// Anything that can produce one serial voltage for a measured voltage
///
/// Implementations block, so the session runs them on a blocking thread.
/// Operator-facing progress goes to `out`.
pub trait VoltageSource: Send + Sync + 'static {
    fn read_voltage(
        &self,
        measured_voltage: f64,
        cancel: &CancelFlag,
        out: &mut dyn Write,
    ) -> Result<f64, ReadError>;
}

/// Reads one voltage per call from a freshly opened link
pub struct VoltageReader<C> {
    connector: C,
    options: ReaderOptions,
}

impl<C: Connector> VoltageReader<C> {
    pub fn new(connector: C, options: ReaderOptions) -> Self {
        Self { connector, options }
    }

    /// Open the link and poll it until a line parses as a voltage
    pub fn acquire<W>(
        &self,
        measured_voltage: f64,
        cancel: &CancelFlag,
        out: &mut W,
    ) -> Result<f64, ReadError>
    where
        W: Write + ?Sized,
    {
        let mut link = self.connector.connect().map_err(|source| ReadError::Open {
            port: self.connector.port_name().to_string(),
            source,
        })?;

        writeln!(
            out,
            "Reading from {} at {} baud...",
            self.connector.port_name(),
            self.connector.baud_rate()
        )?;
        writeln!(out, "Waiting for valid voltage data...")?;

        let started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                log::info!("Read on {} cancelled", self.connector.port_name());
                return Err(ReadError::Cancelled);
            }

            if let Some(limit) = self.options.acquire_timeout {
                if started.elapsed() >= limit {
                    log::warn!(
                        "No valid voltage on {} after {:?}",
                        self.connector.port_name(),
                        limit
                    );
                    return Err(ReadError::TimedOut(limit));
                }
            }

            match link.bytes_available() {
                Ok(0) => {
                    self.idle();
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Error reading data: {}", e);
                    self.idle();
                    continue;
                }
            }

            let raw = match link.read_line() {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    self.idle();
                    continue;
                }
                Err(e) => {
                    log::warn!("Error reading data: {}", e);
                    self.idle();
                    continue;
                }
            };

            let text = match decode_line(&raw) {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("Error reading data: {}", e);
                    continue;
                }
            };

            writeln!(out, "Received: {}", text)?;

            match parse_voltage(text) {
                Some(serial_voltage) => {
                    let difference = serial_voltage - measured_voltage;
                    writeln!(
                        out,
                        "[{}] Serial: {:.3}V | Measured: {:.3}V | Difference: {}V",
                        Local::now().format("%H:%M:%S"),
                        serial_voltage,
                        measured_voltage,
                        format!("{:+.3}", difference).bold()
                    )?;
                    return Ok(serial_voltage);
                }
                None => {
                    log::debug!("Skipping non-numeric line {:?}", text);
                    writeln!(out, "{}", "Not a valid number, continuing to read...".dimmed())?;
                }
            }
        }
    }

    fn idle(&self) {
        std::thread::sleep(self.options.poll_interval);
    }
}

impl<C> VoltageSource for VoltageReader<C>
where
    C: Connector + Send + Sync + 'static,
{
    fn read_voltage(
        &self,
        measured_voltage: f64,
        cancel: &CancelFlag,
        out: &mut dyn Write,
    ) -> Result<f64, ReadError> {
        self.acquire(measured_voltage, cancel, out)
    }
}

/// Decode a raw line as UTF-8 and strip surrounding whitespace
fn decode_line(raw: &[u8]) -> Result<&str, std::str::Utf8Error> {
    std::str::from_utf8(raw).map(str::trim)
}

/// Parse a trimmed line as a finite voltage
fn parse_voltage(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Clone)]
    enum Step {
        /// Receive buffer empty for one poll
        Idle,
        /// A line is waiting
        Line(&'static [u8]),
        /// `bytes_available` fails once
        PollFault,
        /// Bytes are waiting but the read fails
        ReadFault,
    }

    struct ScriptedLink {
        steps: VecDeque<Step>,
        released: Arc<AtomicBool>,
    }

    impl LineLink for ScriptedLink {
        fn bytes_available(&mut self) -> io::Result<u32> {
            match self.steps.front() {
                None => Ok(0),
                Some(Step::Idle) => {
                    self.steps.pop_front();
                    Ok(0)
                }
                Some(Step::PollFault) => {
                    self.steps.pop_front();
                    Err(io::Error::new(io::ErrorKind::Other, "poll fault"))
                }
                Some(Step::Line(bytes)) => Ok(bytes.len() as u32),
                Some(Step::ReadFault) => Ok(1),
            }
        }

        fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
            match self.steps.pop_front() {
                Some(Step::Line(bytes)) => Ok(Some(bytes.to_vec())),
                Some(Step::ReadFault) => Err(io::Error::new(io::ErrorKind::Other, "read fault")),
                _ => Ok(None),
            }
        }
    }

    impl Drop for ScriptedLink {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct ScriptedConnector {
        steps: Vec<Step>,
        fail_open: bool,
        released: Arc<AtomicBool>,
    }

    impl ScriptedConnector {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps,
                fail_open: false,
                released: Arc::new(AtomicBool::new(false)),
            }
        }

        fn unavailable() -> Self {
            Self {
                fail_open: true,
                ..Self::new(Vec::new())
            }
        }
    }

    impl Connector for ScriptedConnector {
        type Link = ScriptedLink;

        fn connect(&self) -> Result<ScriptedLink, serialport::Error> {
            if self.fail_open {
                return Err(serialport::Error::new(
                    serialport::ErrorKind::NoDevice,
                    "no such device",
                ));
            }
            Ok(ScriptedLink {
                steps: self.steps.iter().cloned().collect(),
                released: Arc::clone(&self.released),
            })
        }

        fn port_name(&self) -> &str {
            "scripted"
        }

        fn baud_rate(&self) -> u32 {
            115200
        }
    }

    fn fast_options() -> ReaderOptions {
        ReaderOptions {
            poll_interval: Duration::from_millis(1),
            acquire_timeout: None,
        }
    }

    fn reader(connector: ScriptedConnector) -> (VoltageReader<ScriptedConnector>, Arc<AtomicBool>) {
        let released = Arc::clone(&connector.released);
        (VoltageReader::new(connector, fast_options()), released)
    }

    #[test]
    fn test_first_numeric_line_is_returned() {
        let (reader, released) = reader(ScriptedConnector::new(vec![
            Step::Idle,
            Step::Line(b"3.450\r"),
            Step::Line(b"9.999\r"),
        ]));

        let value = reader.acquire(3.30, &CancelFlag::new(), &mut io::sink()).unwrap();
        assert_eq!(value, 3.45);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        let (reader, _) = reader(ScriptedConnector::new(vec![
            Step::Line(b"ESP32 ADC Voltage Reader"),
            Step::Line(b""),
            Step::Line(b"   "),
            Step::Line(b"nan"),
            Step::Line(b"1.2.3"),
            Step::Line(b"  2.048  "),
        ]));

        let mut out = Vec::new();
        assert_eq!(reader.acquire(2.0, &CancelFlag::new(), &mut out).unwrap(), 2.048);

        let transcript = String::from_utf8_lossy(&out);
        assert!(transcript.contains("Reading from scripted at 115200 baud..."));
        assert!(transcript.contains("Received: ESP32 ADC Voltage Reader"));
        assert_eq!(transcript.matches("Not a valid number").count(), 5);
        assert!(transcript.contains("Serial: 2.048V | Measured: 2.000V | Difference: "));
    }

    #[test]
    fn test_closed_transcript_ends_read() {
        struct Closed;

        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let (reader, released) = reader(ScriptedConnector::new(vec![Step::Line(b"3.3")]));

        let err = reader.acquire(3.3, &CancelFlag::new(), &mut Closed).unwrap_err();
        assert!(matches!(err, ReadError::Transcript(_)));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_invalid_utf8_is_skipped() {
        let (reader, _) = reader(ScriptedConnector::new(vec![
            Step::Line(&[0xff, 0xfe, b'1']),
            Step::Line(b"1.100"),
        ]));

        let value = reader.acquire(1.0, &CancelFlag::new(), &mut io::sink()).unwrap();
        assert_eq!(value, 1.1);
    }

    #[test]
    fn test_transient_errors_do_not_abort_read() {
        let (reader, released) = reader(ScriptedConnector::new(vec![
            Step::PollFault,
            Step::ReadFault,
            Step::Idle,
            Step::Line(b"0.512"),
        ]));

        let value = reader.acquire(0.5, &CancelFlag::new(), &mut io::sink()).unwrap();
        assert_eq!(value, 0.512);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_unavailable_port_reports_open_failure() {
        let (reader, _) = reader(ScriptedConnector::unavailable());

        let err = reader.acquire(3.3, &CancelFlag::new(), &mut io::sink()).unwrap_err();
        assert!(matches!(err, ReadError::Open { ref port, .. } if port == "scripted"));
        assert!(err.hint().is_some());
    }

    #[test]
    fn test_cancelled_before_data_releases_port() {
        let (reader, released) = reader(ScriptedConnector::new(vec![Step::Line(b"3.3")]));
        let cancel = CancelFlag::new();
        cancel.cancel();

        assert!(matches!(
            reader.acquire(3.3, &cancel, &mut io::sink()),
            Err(ReadError::Cancelled)
        ));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_from_another_thread_stops_waiting() {
        let (reader, released) = reader(ScriptedConnector::new(Vec::new()));
        let cancel = CancelFlag::new();
        let remote = cancel.clone();

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        assert!(matches!(
            reader.acquire(1.0, &cancel, &mut io::sink()),
            Err(ReadError::Cancelled)
        ));
        assert!(released.load(Ordering::SeqCst));
        canceller.join().unwrap();
    }

    #[test]
    fn test_acquire_timeout() {
        let connector = ScriptedConnector::new(vec![Step::Line(b"garbage")]);
        let released = Arc::clone(&connector.released);
        let reader = VoltageReader::new(
            connector,
            ReaderOptions {
                poll_interval: Duration::from_millis(1),
                acquire_timeout: Some(Duration::from_millis(15)),
            },
        );

        let err = reader.acquire(1.0, &CancelFlag::new(), &mut io::sink()).unwrap_err();
        assert!(matches!(err, ReadError::TimedOut(d) if d == Duration::from_millis(15)));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_parse_voltage() {
        assert_eq!(parse_voltage("3.300"), Some(3.3));
        assert_eq!(parse_voltage("-0.25"), Some(-0.25));
        assert_eq!(parse_voltage("abc"), None);
        assert_eq!(parse_voltage(""), None);
        assert_eq!(parse_voltage("inf"), None);
    }

    #[test]
    fn test_decode_line_trims() {
        assert_eq!(decode_line(b" 1.234\r").unwrap(), "1.234");
        assert!(decode_line(&[0xc3, 0x28]).is_err());
    }

    #[test]
    fn test_default_options_poll_every_100ms() {
        let options = ReaderOptions::default();
        assert_eq!(options.poll_interval, Duration::from_millis(100));
        assert!(options.acquire_timeout.is_none());
    }
}
