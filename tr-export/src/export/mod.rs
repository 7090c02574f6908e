//! Writing export files
//!
//! Two files per run, named like the originals users already know:
//! `trade_republic_transactions.{json,csv}` and
//! `trade_republic_profile_cash.{json,csv}`.

pub mod csv;
pub mod json;

use anyhow::{Context, Result};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tr_types::TransactionSet;

/// File stem of the transaction export
pub const TRANSACTIONS_STEM: &str = "trade_republic_transactions";
/// File stem of the cash export
pub const CASH_STEM: &str = "trade_republic_profile_cash";

/// Output file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    #[default]
    Json,
    /// Semicolon-separated, French number and date formatting
    Csv,
}

impl OutputFormat {
    /// File extension
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

fn output_path(folder: &Path, stem: &str, format: OutputFormat) -> PathBuf {
    folder.join(format!("{}.{}", stem, format.extension()))
}

/// Write the transactions; returns the file written
///
/// A CSV export of an empty set writes nothing.
pub fn write_transactions(
    transactions: &TransactionSet,
    format: OutputFormat,
    folder: &Path,
) -> Result<Option<PathBuf>> {
    let path = output_path(folder, TRANSACTIONS_STEM, format);
    match format {
        OutputFormat::Json => json::write_pretty(&path, transactions)?,
        OutputFormat::Csv => {
            let records: Vec<Value> = transactions.iter().map(|t| t.to_export_value()).collect();
            let mut table = csv::Table::flatten(&records);
            if table.is_empty() {
                return Ok(None);
            }
            table.drop_empty_columns();
            table.localize();
            table
                .write(&path)
                .with_context(|| format!("writing {}", path.display()))?;
        }
    }
    Ok(Some(path))
}

/// Write the `availableCash` answer; returns the file written
pub fn write_cash(cash: &Value, format: OutputFormat, folder: &Path) -> Result<Option<PathBuf>> {
    let path = output_path(folder, CASH_STEM, format);
    match format {
        OutputFormat::Json => json::write_pretty(&path, cash)?,
        OutputFormat::Csv => {
            let records = match cash {
                Value::Array(items) => items.clone(),
                Value::Null => Vec::new(),
                other => vec![other.clone()],
            };
            let table = csv::Table::flatten(&records);
            if table.is_empty() {
                return Ok(None);
            }
            table
                .write(&path)
                .with_context(|| format!("writing {}", path.display()))?;
        }
    }
    Ok(Some(path))
}
