//! Command-line arguments

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// SEN66 air-quality monitor console
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "sen66")]
#[command(version, about, long_about = None)]
#[command(after_help = "Omit the command to start the interactive console.\n\
Use --port VSIM to talk to a built-in virtual monitor.")]
pub struct Cli {
    /// Serial port (e.g. COM5, /dev/ttyACM0); auto-detected if omitted
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true)]
    pub baud: Option<u32>,

    /// Directory for downloaded files
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Settings file (default: $XDG_CONFIG_HOME/sen66/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Write the effective settings back to the settings file
    #[arg(long, global = true)]
    pub save_config: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Start the interactive console
    Console,
    /// Show the current measurement
    Status,
    /// Clear the log file on the device
    Clear,
    /// Download the log file (plus a TWA export next to it)
    Download {
        /// Output file (default: sensor_log_<timestamp>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Skip the companion TWA export
        #[arg(long)]
        no_twa: bool,
    },
    /// Export 8-hour TWA calculations
    ExportTwa {
        /// Output file (default: twa_export_<timestamp>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the device RTC status
    RtcStatus,
    /// Set the device RTC to this computer's clock
    RtcSync,
    /// Show the device configuration
    Config,
    /// Change a configuration value
    Set {
        /// measurement, logging, utc or storage_warning
        #[arg(short, long)]
        key: String,
        #[arg(long, allow_hyphen_values = true)]
        value: i32,
    },
    /// Set the UTC offset in hours (-12 to +14)
    #[command(alias = "utc")]
    Timezone {
        #[arg(long, allow_hyphen_values = true)]
        offset: i32,
    },
    /// Show all metadata
    Metadata,
    /// Set a metadata value
    Meta {
        /// user, project, location or a custom key
        #[arg(short, long)]
        key: String,
        #[arg(long)]
        value: String,
    },
    /// Reset metadata to defaults (clears the log)
    ResetMeta,
    /// Print live output until Ctrl-C
    Monitor,
    /// List available serial ports
    ListPorts,
    /// Show project information
    About,
}
