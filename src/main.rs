//! CLI entry point for gg-daq
//!
//! Captures puff telemetry from a device, then finalizes and exports it.
//!
//! # Usage
//!
//! Live capture until Ctrl-C:
//! ```bash
//! gg-daq capture gg1 --port /dev/ttyACM0
//! ```
//!
//! Decode a raw serial dump offline:
//! ```bash
//! gg-daq replay gg1 dump.bin --format json
//! ```
//!
//! Exercise the pipeline without hardware:
//! ```bash
//! gg-daq simulate demo --records 5000
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use gg_daq::config::DaqConfig;
use gg_daq::logging::{self, OutputFormat, TracingConfig};
use gg_daq::pipeline::{run_capture, CaptureReport, ExportOutcome};
use gg_daq::session::CaptureSession;
use gg_daq::source::{ByteSource, ReplaySource, SimulatedDevice, SimulationProfile};
use gg_daq::storage::{exporter_for, ExportFormat};

#[derive(Parser)]
#[command(name = "gg-daq")]
#[command(about = "Serial puff telemetry capture", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/gg_daq.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory exported tables are written to
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Export file format
    #[arg(long, global = true, value_enum)]
    format: Option<ExportFormat>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output style
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,

    /// Disable colored log output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture from a serial port until Ctrl-C
    Capture {
        /// Device name, used for the export file name
        device: String,

        /// Serial port, e.g. /dev/ttyACM0 or COM3
        #[arg(long)]
        port: String,
    },

    /// Decode a raw byte dump through the capture pipeline
    Replay {
        /// Device name, used for the export file name
        device: String,

        /// File holding the raw serial bytes
        file: PathBuf,
    },

    /// Capture from a simulated device
    Simulate {
        /// Device name, used for the export file name
        device: String,

        /// Measurement records to generate
        #[arg(long, default_value_t = 2_000)]
        records: usize,

        /// Delay between polls, in milliseconds
        #[arg(long, default_value_t = 0)]
        pace_ms: u64,
    },

    /// List serial ports on this machine
    Ports,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DaqConfig::load_from(path),
        None => DaqConfig::load(),
    }
    .context("Failed to load configuration")?;

    if let Some(dir) = cli.output_dir {
        config.storage.output_dir = dir;
    }
    if let Some(format) = cli.format {
        config.storage.format = format;
    }
    if let Some(level) = cli.log_level {
        config.application.log_level = level;
    }
    config.validate().context("Invalid configuration")?;

    let tracing_config = TracingConfig::from_config(&config)?
        .with_format(cli.log_format)
        .with_ansi(!cli.no_color);
    logging::init(tracing_config).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Capture { device, port } => capture(&config, device, &port).await,
        Commands::Replay { device, file } => {
            let mut source = ReplaySource::from_file(&file, config.serial.read_size)
                .await
                .with_context(|| format!("Failed to read '{}'", file.display()))?;
            run(&config, device, &mut source).await
        }
        Commands::Simulate {
            device,
            records,
            pace_ms,
        } => {
            let profile = SimulationProfile {
                records,
                pulse_start: records / 5,
                pulse_len: records / 2,
                pace: Duration::from_millis(pace_ms),
                ..SimulationProfile::default()
            };
            let mut source = SimulatedDevice::new(profile);
            run(&config, device, &mut source).await
        }
        Commands::Ports => list_ports(),
    }
}

#[cfg(feature = "instrument_serial")]
async fn capture(config: &DaqConfig, device: String, port: &str) -> Result<()> {
    let mut source = gg_daq::source::SerialSource::open(port, &config.serial)
        .with_context(|| format!("Failed to open serial port '{port}'"))?;
    println!("Press Ctrl-C to finish data collection!");
    run(config, device, &mut source).await
}

#[cfg(not(feature = "instrument_serial"))]
async fn capture(_config: &DaqConfig, _device: String, _port: &str) -> Result<()> {
    Err(gg_daq::error::DaqError::FeatureNotEnabled("instrument_serial".to_string()).into())
}

#[cfg(feature = "instrument_serial")]
fn list_ports() -> Result<()> {
    let ports = gg_daq::source::available_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

#[cfg(not(feature = "instrument_serial"))]
fn list_ports() -> Result<()> {
    Err(gg_daq::error::DaqError::FeatureNotEnabled("instrument_serial".to_string()).into())
}

async fn run<S>(config: &DaqConfig, device: String, source: &mut S) -> Result<()>
where
    S: ByteSource + ?Sized,
{
    let (stop_tx, mut stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stop requested");
            let _ = stop_tx.send(true);
        }
    });

    let mut session = CaptureSession::with_limits(device, config.decoder);
    let mut sink = exporter_for(config.storage.format, &config.storage.output_dir);
    let report = run_capture(&mut session, source, &mut stop_rx, sink.as_mut()).await?;
    print_report(&report)
}

fn print_report(report: &CaptureReport) -> Result<()> {
    println!("Capture ended: {}", report.stop);
    println!("Captured {}", report.stats);
    match &report.export {
        ExportOutcome::Written(path) => {
            println!("Wrote {}", path.display());
            Ok(())
        }
        ExportOutcome::Empty => {
            println!("No measurement records were captured; nothing written");
            Ok(())
        }
        ExportOutcome::Failed(reason) => anyhow::bail!("Could not save captured data: {reason}"),
    }
}
