mod logic;
pub(crate) mod archive;
pub(crate) mod cleanup;
pub(crate) mod compress;
pub(crate) mod db_dump;
pub(crate) mod mirror;
pub(crate) mod notify;

use anyhow::Result;
use chrono::Local;
use clap::Args;
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::transfer::RemoteStore;
use crate::utils::databases::CommandDumpEngine;
pub use logic::{BackupPlan, BackupReport};

/// Flags of the `backup` command.
#[derive(Args, Debug, Clone, Default)]
pub struct BackupOptions {
    /// Compress dump file
    #[arg(short, long)]
    pub compress: bool,
    /// Compress and encrypt SQL dump file using zip (password from BACKUP_PASSWORD)
    #[arg(short, long)]
    pub zipencrypt: bool,
    /// Backup media dir
    #[arg(short, long)]
    pub media: bool,
    /// Additional directory to back up (repeatable)
    #[arg(short = 'd', long = "directory")]
    pub directories: Vec<PathBuf>,
    /// Backup directories as incremental mirrors instead of a tarball
    #[arg(short, long)]
    pub rsync: bool,
    /// Transfer the backups to the configured remote
    #[arg(short, long)]
    pub ftp: bool,
    /// Clean up surplus database backups
    #[arg(long = "cleandb")]
    pub clean_db: bool,
    /// Clean up surplus media backups
    #[arg(long = "cleanmedia")]
    pub clean_media: bool,
    /// Clean up broken mirror backups (with --rsync only)
    #[arg(long = "cleanrsync")]
    pub clean_rsync: bool,
    /// Clean up surplus local database backups
    #[arg(long = "cleanlocaldb")]
    pub clean_local_db: bool,
    /// Clean up surplus remote database backups
    #[arg(long = "cleanremotedb")]
    pub clean_remote_db: bool,
    /// Clean up surplus local media backups
    #[arg(long = "cleanlocalmedia")]
    pub clean_local_media: bool,
    /// Clean up surplus remote media backups
    #[arg(long = "cleanremotemedia")]
    pub clean_remote_media: bool,
    /// Clean up local broken mirror backups (with --rsync only)
    #[arg(long = "cleanlocalrsync")]
    pub clean_local_rsync: bool,
    /// Clean up remote broken mirror backups (with --rsync only)
    #[arg(long = "cleanremotersync")]
    pub clean_remote_rsync: bool,
    /// Remove this run's local files once they are on the remote
    #[arg(long = "nolocal")]
    pub no_local: bool,
    /// Delete all local backups once this run is on the remote
    #[arg(long = "deletelocal")]
    pub delete_local: bool,
    /// Only back up data of tables matching this pattern (PostgreSQL, repeatable)
    #[arg(short = 't', long = "table")]
    pub tables: Vec<String>,
    /// Run notify_command for this recipient with the backup files
    #[arg(long)]
    pub notify: Option<String>,
}

/// Public entry point for the backup process.
pub async fn run_backup_flow(
    app_config: &AppConfig,
    options: &BackupOptions,
    encrypt_password: Option<String>,
) -> Result<BackupReport> {
    let mut plan = BackupPlan::resolve(app_config, options, encrypt_password)?;

    let remote = if plan.needs_remote() {
        match RemoteStore::connect(app_config.remote()?).await {
            Ok(store) => Some(store),
            Err(e) => {
                let cause = format!("{:#}", e);
                tracing::error!(error = %cause, "Cannot connect to remote; remote steps will fail");
                plan.remote_error = Some(cause);
                None
            }
        }
    } else {
        None
    };

    let database = app_config.database()?;
    let engine = CommandDumpEngine::new(database.connection.clone(), database.dump_binary.clone());
    let now = Local::now().naive_local();

    logic::perform_backup(
        &plan,
        &engine,
        remote.as_ref(),
        remote.as_ref().and_then(RemoteStore::as_sftp),
        now,
    )
    .await
}
