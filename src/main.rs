//! Main application entry point (server binary).
//!
//! This is a thin wrapper around the `domain_intel` library that handles:
//! - Environment variable loading (.env file)
//! - Command-line argument parsing and validation
//! - Logger and TLS initialization
//!
//! All core functionality is implemented in the library crate.

use std::process;

use anyhow::{Context, Result};
use clap::Parser;

use domain_intel::initialization::{init_crypto_provider, init_logger_with};
use domain_intel::{run_server, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // A .env next to the working directory or the executable may hold the
    // Redis URL and vendor API key
    if dotenvy::dotenv().is_err() {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let env_path = exe_dir.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                }
            }
        }
    }

    let config = Config::parse();
    if let Err(e) = config.validate() {
        eprintln!("domain_intel: invalid configuration: {e}");
        process::exit(2);
    }

    init_logger_with(config.log_level.clone().into(), config.log_format.clone())
        .context("Failed to initialize logger")?;
    init_crypto_provider();

    if let Err(e) = run_server(config).await {
        log::error!("domain_intel error: {e:#}");
        eprintln!("domain_intel error: {e:#}");
        process::exit(1);
    }
    Ok(())
}
