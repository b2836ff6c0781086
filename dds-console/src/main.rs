//! ddsctl
//!
//! Drive one channel of a four-channel DDS from the command line: set its
//! phase or the shared frequency, sweep the phase, read back or persist the
//! EEPROM registers, and keep the calibration file current.

mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::{init_logging, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "ddsctl", version, about = "Four-channel DDS phase/frequency control")]
struct Cli {
    /// Device name in the calibration file
    #[arg(long, short = 'd', env = "DDS_DEVICE", default_value = "local", global = true)]
    device: String,

    /// Channel to control (0-3)
    #[arg(long, short = 'c', default_value_t = 0, global = true)]
    channel: u8,

    /// Other channels sharing the bus with this one (repeat or comma-separate)
    #[arg(long = "share", value_name = "CH", value_delimiter = ',', global = true)]
    share: Vec<u8>,

    /// Calibration file (defaults to the XDG config location)
    #[arg(long, value_name = "PATH", env = "DDS_CALIBRATION", global = true)]
    calibration: Option<PathBuf>,

    /// Talk to a simulated device instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,

    /// Minimum log level (stderr); overrides RUST_LOG
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// Set this channel's phase (degrees)
    Write { phase: f64 },

    /// Set every channel's frequency (kHz) and this channel's phase (degrees)
    WriteFull { frequency: f64, phase: f64 },

    /// Step the phase from START up to (not including) STOP
    Sweep {
        start: f64,
        stop: f64,
        step: f64,
        /// Pause between steps in milliseconds
        #[arg(long, default_value_t = 100)]
        delay_ms: u64,
    },

    /// Read the registers stored in the device EEPROM
    Download,

    /// Persist the current registers to the device EEPROM
    Upload,

    /// Make the firmware leave its interactive loop
    SelfCheck,

    /// Save the current (or EEPROM) state to the calibration file
    Snapshot {
        /// Record the EEPROM contents instead of the calibrated state
        #[arg(long)]
        from_device: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    tracing::debug!("{:?}", cli);
    commands::run(cli).await
}
