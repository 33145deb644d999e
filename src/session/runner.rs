//! Prompt / read / store loop
//!
//! The loop waits on three things at once: the next operator line, the
//! in-flight serial read, and the interrupt signal. An interrupt ends the
//! session without saving. A pending read is cancelled and joined first so the
//! port is released.

use super::input::{parse_entry, Entry};
use super::store::{MeasurementRecord, VoltageStore};
use crate::export::{self, ExportSummary};
use crate::serial::{CancelFlag, VoltageSource};
use chrono::Local;
use colored::Colorize;
use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

const PROMPT: &str =
    "Enter measured voltage (3-digit number, e.g., 3.30) or 'end' to save and exit: ";

/// Operator lines as they arrive; the channel closes at end of input
pub type InputLines = mpsc::UnboundedReceiver<io::Result<String>>;

/// How a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Records were written to disk
    Saved(ExportSummary),
    /// The operator finished without any successful comparison
    NothingToSave,
    /// Records existed but the file could not be written
    ExportFailed,
    /// Interrupted; `discarded` records were dropped unsaved
    Aborted { discarded: usize },
}

/// What the operator asked for at the prompt
enum Request {
    Measure(f64),
    Finish,
    Abort,
}

/// Carries reader output from the blocking thread to the session's writer
struct ProgressWriter(mpsc::UnboundedSender<Vec<u8>>);

impl Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "session output closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read stdin on a dedicated thread
///
/// A blocked terminal read cannot be cancelled, so it must not hold up the
/// runtime when the session is interrupted.
pub fn spawn_stdin_reader() -> InputLines {
    spawn_line_reader(io::BufReader::new(io::stdin()))
}

/// Forward lines from `reader` on a dedicated thread
///
/// An undecodable line is reported and skipped. Any other read error is
/// reported and closes the channel.
pub fn spawn_line_reader<R>(reader: R) -> InputLines
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        for line in reader.lines() {
            let fatal = matches!(&line, Err(e) if e.kind() != io::ErrorKind::InvalidData);
            if tx.send(line).is_err() || fatal {
                break;
            }
        }
    });

    rx
}

/// One interactive comparison session
pub struct Session<S, W> {
    source: Arc<S>,
    input: InputLines,
    out: W,
    store: VoltageStore,
    output_path: Option<PathBuf>,
}

impl<S, W> Session<S, W>
where
    S: VoltageSource,
    W: Write,
{
    pub fn new(source: S, input: InputLines, out: W) -> Self {
        Self {
            source: Arc::new(source),
            input,
            out,
            store: VoltageStore::new(),
            output_path: None,
        }
    }

    /// Save to this file instead of a timestamped one
    pub fn with_output_path(mut self, path: Option<PathBuf>) -> Self {
        self.output_path = path;
        self
    }

    pub fn store(&self) -> &VoltageStore {
        &self.store
    }

    /// Run until the operator types `end`, input closes, or `interrupt` fires
    pub async fn run<I>(&mut self, interrupt: I) -> io::Result<SessionOutcome>
    where
        I: Future<Output = ()>,
    {
        tokio::pin!(interrupt);

        self.print_banner()?;

        loop {
            writeln!(self.out)?;

            let measured = match self.next_request(&mut interrupt).await? {
                Request::Measure(voltage) => voltage,
                Request::Finish => return self.finish(),
                Request::Abort => {
                    writeln!(self.out, "\n{}", "Exiting...".yellow())?;
                    return Ok(self.abort());
                }
            };

            writeln!(
                self.out,
                "Reading serial data for measured voltage: {}V",
                measured
            )?;
            self.out.flush()?;

            let cancel = CancelFlag::new();
            let flag = cancel.clone();
            let source = Arc::clone(&self.source);
            let (progress_tx, mut progress) = mpsc::unbounded_channel();
            let mut job = tokio::task::spawn_blocking(move || {
                let mut transcript = ProgressWriter(progress_tx);
                source.read_voltage(measured, &flag, &mut transcript)
            });

            let joined = loop {
                tokio::select! {
                    biased;
                    _ = interrupt.as_mut() => break None,
                    Some(chunk) = progress.recv() => {
                        self.out.write_all(&chunk)?;
                        self.out.flush()?;
                    }
                    result = &mut job => break Some(result),
                }
            };

            let Some(joined) = joined else {
                cancel.cancel();
                if let Err(e) = job.await {
                    log::error!("Serial read task failed during shutdown: {}", e);
                }
                self.drain_progress(&mut progress)?;
                writeln!(self.out, "\n{}", "Exiting without saving...".yellow())?;
                return Ok(self.abort());
            };

            self.drain_progress(&mut progress)?;

            match joined {
                Ok(Ok(serial_voltage)) => {
                    let record =
                        MeasurementRecord::new(Local::now().time(), measured, serial_voltage);
                    self.store.push(record);
                    writeln!(
                        self.out,
                        "{}",
                        "✓ Voltage comparison completed and stored".green()
                    )?;
                }
                Ok(Err(e)) => {
                    log::warn!("Measurement at {}V failed: {}", measured, e);
                    writeln!(self.out, "{} {}", "Error:".red().bold(), e)?;
                    if let Some(hint) = e.hint() {
                        writeln!(self.out, "{}", hint)?;
                    }
                    writeln!(
                        self.out,
                        "{}",
                        "✗ Failed to read voltage from serial port".red()
                    )?;
                }
                Err(e) => {
                    log::error!("Serial read task failed: {}", e);
                    writeln!(self.out, "{} {}", "Error:".red().bold(), e)?;
                    writeln!(self.out, "Continuing with next measurement...")?;
                }
            }

            writeln!(self.out, "{}", "-".repeat(60))?;
        }
    }

    /// Prompt until the operator gives a usable entry
    async fn next_request<I>(&mut self, interrupt: &mut Pin<&mut I>) -> io::Result<Request>
    where
        I: Future<Output = ()>,
    {
        loop {
            write!(self.out, "{}", PROMPT)?;
            self.out.flush()?;

            let line = tokio::select! {
                biased;
                _ = interrupt.as_mut() => return Ok(Request::Abort),
                line = self.input.recv() => line,
            };

            let line = match line {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    log::error!("Failed to read operator input: {}", e);
                    writeln!(self.out, "\n{} {}", "Error:".red().bold(), e)?;
                    writeln!(self.out, "Continuing with next measurement...")?;
                    continue;
                }
                None => {
                    log::info!("Input closed, finishing session");
                    writeln!(self.out)?;
                    return Ok(Request::Finish);
                }
            };

            match parse_entry(&line) {
                Ok(Entry::Voltage(voltage)) => return Ok(Request::Measure(voltage)),
                Ok(Entry::End) => return Ok(Request::Finish),
                Err(e) => writeln!(self.out, "{}", e.to_string().yellow())?,
            }
        }
    }

    /// Write out whatever the reader sent after the last poll
    fn drain_progress(
        &mut self,
        progress: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> io::Result<()> {
        while let Ok(chunk) = progress.try_recv() {
            self.out.write_all(&chunk)?;
        }
        self.out.flush()
    }

    fn finish(&mut self) -> io::Result<SessionOutcome> {
        let outcome = if self.store.is_empty() {
            writeln!(self.out, "No data to save.")?;
            SessionOutcome::NothingToSave
        } else {
            self.print_summary()?;
            writeln!(
                self.out,
                "\nSaving {} measurements to CSV...",
                self.store.len()
            )?;

            match export::save_to_csv(&self.store, self.output_path.as_deref()) {
                Ok(summary) => {
                    writeln!(
                        self.out,
                        "{} Data saved to {}",
                        "✓".green().bold(),
                        summary.path.display()
                    )?;
                    writeln!(
                        self.out,
                        "{} Total measurements: {}",
                        "✓".green().bold(),
                        summary.records
                    )?;
                    SessionOutcome::Saved(summary)
                }
                Err(e) => {
                    log::error!("Export failed: {}", e);
                    writeln!(self.out, "{} Error saving to CSV: {}", "✗".red().bold(), e)?;
                    SessionOutcome::ExportFailed
                }
            }
        };

        writeln!(self.out, "Goodbye!")?;
        Ok(outcome)
    }

    fn abort(&self) -> SessionOutcome {
        if !self.store.is_empty() {
            log::warn!("Discarding {} unsaved measurements", self.store.len());
        }
        SessionOutcome::Aborted {
            discarded: self.store.len(),
        }
    }

    fn print_banner(&mut self) -> io::Result<()> {
        writeln!(self.out, "{}", "=== Voltage Comparison Session ===".cyan().bold())?;
        writeln!(
            self.out,
            "Compares your measured voltages with readings from the serial device"
        )?;
        writeln!(self.out, "Type 'end' to save data to CSV and exit")?;
        writeln!(self.out, "Press Ctrl+C to exit without saving")?;
        writeln!(self.out, "{}", "-".repeat(60))
    }

    fn print_summary(&mut self) -> io::Result<()> {
        let Some(summary) = self.store.summary() else {
            return Ok(());
        };

        writeln!(self.out, "\n{}", "--- Session Summary ---".cyan().bold())?;
        writeln!(self.out, "Measurements: {}", summary.count)?;
        writeln!(
            self.out,
            "Mean difference: {:+.3}V",
            summary.mean_difference
        )?;
        writeln!(
            self.out,
            "Difference range: {:+.3}V to {:+.3}V",
            summary.min_difference, summary.max_difference
        )?;
        writeln!(
            self.out,
            "Largest deviation: {:.3}V",
            summary.max_abs_difference
        )
    }
}
