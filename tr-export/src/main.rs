//! tr-export - download the Trade Republic timeline to JSON or CSV
//!
//! Run with: cargo run -p tr-export -- --format csv --details

mod cli;
mod config;
mod export;
mod prompt;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use colored::*;
use config::Settings;
use prompt::ConsolePrompt;
use std::process::ExitCode;
use std::sync::Arc;
use tr_auth::{AuthError, Authenticator, HttpLoginApi, LoginApi, LoginConfig, SecondFactorPrompt, SessionManager};
use tr_sdk::TimelineClient;
use tr_types::TrError;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,tr_ws=warn";

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", "✗".red().bold(), e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { DEFAULT_FILTER })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Cli) -> Result<()> {
    let settings = Settings::load(&args)?;
    debug!(?settings, "Settings loaded");

    std::fs::create_dir_all(&settings.output_folder)
        .with_context(|| format!("creating {}", settings.output_folder.display()))?;

    let credentials = settings.credentials()?;
    let api: Arc<dyn LoginApi> = Arc::new(HttpLoginApi::new().map_err(TrError::from)?);

    let prompt: Arc<dyn SecondFactorPrompt> = Arc::new(ConsolePrompt::console());
    let mut authenticator = Authenticator::new(api.clone(), LoginConfig::new());
    let session = authenticator
        .authenticate_with_retries(&credentials, prompt)
        .await
        .map_err(TrError::from)?;
    println!("{} Logged in", "✓".green());

    let tokens = Arc::new(SessionManager::new(session, api));
    let client = TimelineClient::builder()
        .with_locale(settings.locale.as_str())
        .connect(tokens)
        .await?;
    println!("{} Connected", "✓".green());

    let result = export_all(&client, &settings).await;
    client.close().await;
    result
}

async fn export_all(client: &TimelineClient, settings: &Settings) -> Result<()> {
    let transactions = client.fetch_transactions(settings.extract_details).await?;
    println!(
        "{} {} transactions fetched{}",
        "✓".green(),
        transactions.len(),
        if settings.extract_details {
            format!(" ({} with details)", transactions.enriched_count())
        } else {
            String::new()
        }
    );
    for warning in transactions.warnings() {
        println!("{} {}", "!".yellow(), warning);
    }

    match export::write_transactions(&transactions, settings.output_format, &settings.output_folder)? {
        Some(path) => println!("{} Transactions written to {}", "✓".green(), path.display()),
        None => println!("{} No transactions to write", "-".dimmed()),
    }

    let cash = client.available_cash().await?;
    if let Some(path) = export::write_cash(&cash, settings.output_format, &settings.output_folder)? {
        println!("{} Cash written to {}", "✓".green(), path.display());
    }

    Ok(())
}

/// Process exit status for a failed run
fn exit_code(error: &anyhow::Error) -> u8 {
    if let Some(e) = error.downcast_ref::<TrError>() {
        return e.exit_code() as u8;
    }
    if let Some(e) = error.downcast_ref::<AuthError>() {
        return TrError::Auth(e.clone()).exit_code() as u8;
    }
    if error.downcast_ref::<config::ConfigError>().is_some() {
        return 2;
    }
    1
}
