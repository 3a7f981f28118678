//! Database and media backup tool
//!
//! Dumps a database, archives media directories, ships both to a remote store
//! and prunes old copies with a tiered retention policy.

// backuptool/src/main.rs
mod backup;
mod config;
mod errors;
mod restore;
mod retention;
mod transfer;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::AppConfig;
use std::path::PathBuf;
use std::process::ExitCode;

/// Environment variable holding the zip encryption password.
const PASSWORD_ENV: &str = "BACKUP_PASSWORD";

#[derive(Parser, Debug)]
#[command(name = "backuptool", version, about = "Backup and restore a database and media directories")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Backup database. Only MySQL and PostgreSQL engines are implemented
    Backup(backup::BackupOptions),
    /// Restores latest backup
    Restore(restore::RestoreOptions),
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = utils::logger::init(&cli.log_level) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    match run_app(cli).await {
        Ok(_) => {
            tracing::info!("Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let app_config = AppConfig::load_from_json(&cli.config).with_context(|| {
        format!("Failed to load application configuration from {}", cli.config.display())
    })?;
    let password = std::env::var(PASSWORD_ENV).ok();

    match cli.command {
        Command::Backup(options) => {
            tracing::info!("Starting backup");
            let report = backup::run_backup_flow(&app_config, &options, password)
                .await
                .context("Backup process failed")?;
            if report.cleanup_failures > 0 {
                tracing::warn!(failures = report.cleanup_failures, "Some cleanup steps failed");
            }
        }
        Command::Restore(options) => {
            tracing::info!("Starting restore");
            let report = restore::run_restore_flow(&app_config, &options, password)
                .await
                .context("Restore process failed")?;
            tracing::info!(
                database = report.database_artifact.as_deref().unwrap_or("-"),
                media = report.media_artifact.as_deref().unwrap_or("-"),
                "Restored"
            );
        }
    }
    Ok(())
}
