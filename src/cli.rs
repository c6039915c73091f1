use clap::{Parser, Subcommand};

use crate::config::LogLevel;

#[derive(Parser)]
#[command(
    name = "dataplicity",
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the agent loop.
    Run(RunArgs),
    /// Print the version and exit.
    Version,
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    pub config: Option<String>,

    /// URL of the dataplicity.com API.
    #[arg(long)]
    pub api_url: Option<String>,

    /// URL of the M2M server (ws:// or wss://).
    #[arg(long)]
    pub m2m_url: Option<String>,

    /// Override the device serial.
    #[arg(long)]
    pub serial: Option<String>,

    /// Override the device auth token.
    #[arg(long)]
    pub auth: Option<String>,

    /// Override the remote directory root.
    #[arg(long)]
    pub remote_dir: Option<String>,

    /// Set log level (trace, debug, info, warn, error).
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Set log file.
    #[arg(long)]
    pub log_file: Option<String>,
}

impl clap::ValueEnum for LogLevel {
    fn value_variants<'a>() -> &'a [Self] {
        &[LogLevel::Trace, LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }))
    }
}
