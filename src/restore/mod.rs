mod logic;
pub(crate) mod db_restore;

use anyhow::{Context, Result};
use clap::Args;

use crate::config::AppConfig;
use crate::transfer::RemoteStore;
use crate::utils::databases::CommandDumpEngine;
pub use logic::{RestorePlan, RestoreReport};

/// Flags of the `restore` command.
#[derive(Args, Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Restore media dir
    #[arg(short, long)]
    pub media: bool,
    /// Do not restore database
    #[arg(short = 'd', long = "no-database")]
    pub no_database: bool,
}

/// Public entry point for the restore process.
pub async fn run_restore_flow(
    app_config: &AppConfig,
    options: &RestoreOptions,
    password: Option<String>,
) -> Result<RestoreReport> {
    let remote_config = app_config.remote()?;
    let plan = RestorePlan {
        restore_dir: remote_config.restore_directory.clone(),
        database: !options.no_database,
        media_root: if options.media {
            Some(app_config.media_root()?.to_path_buf())
        } else {
            None
        },
        password: password.filter(|p| !p.is_empty()),
    };
    if !plan.database && plan.media_root.is_none() {
        tracing::warn!("Nothing to restore: --no-database given without --media");
        return Ok(RestoreReport::default());
    }

    let database = app_config.database()?;
    let engine = CommandDumpEngine::new(database.connection.clone(), database.dump_binary.clone());
    let remote = RemoteStore::connect(remote_config).await?;
    let workdir = tempfile::tempdir().context("Failed to create a temporary directory for the download")?;

    logic::perform_restore(&plan, &engine, &remote, remote.as_sftp(), workdir.path()).await
}
