//! Voltage Compare
//!
//! Bench tool for checking a device's self-reported voltage against a
//! reference meter. For every voltage the operator types in, one reading is
//! taken from the device's serial output and the difference is recorded.
//! Typing `end` writes all comparisons to a CSV file.
//!
//! # Usage
//!
//! ```bash
//! # Default port (COM3 on Windows, /dev/ttyUSB0 elsewhere) at 115200 baud
//! voltage-compare
//!
//! # Explicit port, baud rate and output file
//! voltage-compare -p /dev/ttyACM0 -b 9600 -o bench.csv
//!
//! # Give up on a reading after 10 seconds
//! voltage-compare --acquire-timeout 10
//!
//! # Line settings from a file (voltage-compare.toml is picked up automatically)
//! voltage-compare -c bench.toml
//! ```

mod config;
mod export;
mod serial;
mod session;

use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::path::PathBuf;

use config::Settings;
use serial::{SerialConnector, VoltageReader};
use session::{spawn_stdin_reader, Session, SessionOutcome};

/// Compare measured voltages against serial readings
#[derive(Parser, Debug)]
#[command(name = "voltage-compare")]
#[command(author = "Prasanna Gautam")]
#[command(version = "0.1.0")]
#[command(about = "Compare meter readings against a device's serial voltage output")]
struct Cli {
    /// Serial port (e.g., /dev/ttyUSB0, COM3)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// CSV file to write instead of a timestamped one
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait for each serial reading before giving up
    #[arg(long, value_name = "SECS")]
    acquire_timeout: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Flags given on the command line win over the settings file
    fn apply(&self, settings: &mut Settings) {
        if let Some(port) = &self.port {
            settings.serial.port = port.clone();
        }
        if let Some(baud) = self.baud {
            settings.serial.baud_rate = baud;
        }
        if let Some(output) = &self.output {
            settings.output.file = Some(output.clone());
        }
        if let Some(secs) = self.acquire_timeout {
            settings.serial.acquire_timeout_secs = Some(secs);
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    cli.apply(&mut settings);

    let port_config = settings
        .port_config()
        .context("Invalid serial settings")?;
    log::debug!("Serial settings: {:?}", port_config);

    let reader = VoltageReader::new(SerialConnector::new(port_config), settings.reader_options());
    let mut session = Session::new(reader, spawn_stdin_reader(), io::stdout())
        .with_output_path(settings.output.file.clone());

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let outcome = session.run(interrupt).await.context("Session I/O failed")?;

    match &outcome {
        SessionOutcome::Saved(summary) => {
            log::debug!("Session saved {} records", summary.records)
        }
        SessionOutcome::Aborted { discarded } => {
            log::info!("Session interrupted, {} unsaved measurements discarded", discarded)
        }
        other => log::debug!(
            "Session ended with {} measurements: {:?}",
            session.store().len(),
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_settings() {
        let cli = Cli::parse_from([
            "voltage-compare",
            "-p",
            "COM7",
            "-b",
            "9600",
            "-o",
            "bench.csv",
            "--acquire-timeout",
            "5",
        ]);

        let mut settings = Settings::default();
        settings.serial.port = "/dev/ttyS0".to_string();
        cli.apply(&mut settings);

        assert_eq!(settings.serial.port, "COM7");
        assert_eq!(settings.serial.baud_rate, 9600);
        assert_eq!(settings.output.file, Some(PathBuf::from("bench.csv")));
        assert_eq!(settings.serial.acquire_timeout_secs, Some(5));
    }

    #[test]
    fn test_absent_flags_keep_settings() {
        let cli = Cli::parse_from(["voltage-compare"]);

        let mut settings = Settings::default();
        settings.serial.baud_rate = 57600;
        cli.apply(&mut settings);

        assert_eq!(settings.serial.baud_rate, 57600);
        assert_eq!(settings, {
            let mut expected = Settings::default();
            expected.serial.baud_rate = 57600;
            expected
        });
        assert!(!cli.verbose);
    }
}
