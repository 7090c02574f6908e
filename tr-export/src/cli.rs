//! Command-line arguments

use crate::export::OutputFormat;
use clap::Parser;
use std::path::PathBuf;

/// Export the Trade Republic transaction timeline
#[derive(Parser, Debug, Default)]
#[command(name = "tr-export", version)]
#[command(about = "Export your Trade Republic transactions to JSON or CSV", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./config.toml when present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Phone number in international format
    #[arg(long, env = "TR_PHONE_NUMBER", value_name = "PHONE")]
    pub phone_number: Option<String>,

    /// Four-digit PIN
    #[arg(long, env = "TR_PIN", hide_env_values = true, value_name = "PIN")]
    pub pin: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Folder the export files are written to
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Fetch per-transaction details (shares, price, fees, taxes)
    #[arg(long, conflicts_with = "no_details")]
    pub details: bool,

    /// Skip per-transaction details
    #[arg(long)]
    pub no_details: bool,

    /// Locale announced to the server
    #[arg(long, value_name = "LOCALE")]
    pub locale: Option<String>,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Detail extraction as set on the command line, if at all
    pub fn extract_details(&self) -> Option<bool> {
        match (self.details, self.no_details) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}
