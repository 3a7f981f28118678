// backuptool/src/backup/logic.rs
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::fs;
use std::path::PathBuf;

use super::BackupOptions;
use super::{archive, cleanup, compress, mirror, notify};
use crate::config::{AppConfig, RemoteKind};
use crate::errors::AppError;
use crate::retention::TieredPolicy;
use crate::transfer::{SftpTransport, Transport, remote_join};
use crate::utils::databases::{DumpEngine, DumpOptions};
use crate::utils::naming::{ArtifactKind, db_artifact_name, media_archive_name, time_suffix};

/// Everything a backup run will do, validated before anything is touched.
#[derive(Debug, Clone)]
pub struct BackupPlan {
    pub backup_dir: PathBuf,
    pub remote_dir: Option<String>,
    pub compress: bool,
    pub encrypt_password: Option<String>,
    pub directories: Vec<PathBuf>,
    pub rsync: bool,
    pub transfer: bool,
    pub no_local: bool,
    pub delete_local: bool,
    pub dump_options: DumpOptions,
    /// `(notify_command, recipient)`
    pub notify: Option<(PathBuf, String)>,
    pub clean_local_db: Option<TieredPolicy>,
    pub clean_remote_db: Option<TieredPolicy>,
    pub clean_local_media: Option<TieredPolicy>,
    pub clean_remote_media: Option<TieredPolicy>,
    pub clean_local_rsync: bool,
    pub clean_remote_rsync: bool,
    /// Why connecting to the remote failed, reported by every remote step.
    pub remote_error: Option<String>,
}

impl BackupPlan {
    pub fn resolve(
        app_config: &AppConfig,
        options: &BackupOptions,
        encrypt_password: Option<String>,
    ) -> Result<Self> {
        let encrypt_password = encrypt_password.filter(|p| !p.is_empty());
        if options.zipencrypt && encrypt_password.is_none() {
            return Err(AppError::Config(
                "Please specify a password for your backup file using the BACKUP_PASSWORD environment variable."
                    .into(),
            )
            .into());
        }

        let database = app_config.database()?;

        let wants_local_db = options.clean_db || options.clean_local_db;
        let wants_remote_db = options.clean_db || options.clean_remote_db;
        let db_policy = if wants_local_db || wants_remote_db {
            Some(app_config.database_policy()?)
        } else {
            None
        };

        let wants_local_media = options.clean_media || options.clean_local_media;
        let wants_remote_media = options.clean_media || options.clean_remote_media;
        let media_policy = if wants_local_media || wants_remote_media {
            Some(app_config.media_policy()?)
        } else {
            None
        };

        let clean_local_rsync = options.rsync && (options.clean_rsync || options.clean_local_rsync);
        let clean_remote_rsync = options.rsync && (options.clean_rsync || options.clean_remote_rsync);

        let needs_remote = options.ftp || wants_remote_db || wants_remote_media || clean_remote_rsync;
        let remote_dir = if needs_remote {
            let remote = app_config.remote()?;
            if options.rsync && options.ftp && !matches!(remote.kind, RemoteKind::Sftp(_)) {
                return Err(AppError::Config(
                    "--rsync together with --ftp needs an sftp remote".into(),
                )
                .into());
            }
            Some(remote.directory.clone())
        } else {
            None
        };

        let mut directories = options.directories.clone();
        if options.media {
            directories.push(app_config.media_root()?.to_path_buf());
        }

        let notify = match &options.notify {
            Some(recipient) => {
                let command = app_config.notify_command.clone().ok_or_else(|| {
                    AppError::Config("--notify needs notify_command in config.json".into())
                })?;
                Some((command, recipient.clone()))
            }
            None => None,
        };

        Ok(BackupPlan {
            backup_dir: app_config.local_backup_dir.clone(),
            remote_dir,
            compress: options.compress,
            encrypt_password: if options.zipencrypt { encrypt_password } else { None },
            directories,
            rsync: options.rsync,
            transfer: options.ftp,
            no_local: options.no_local,
            delete_local: options.delete_local,
            dump_options: DumpOptions {
                exclude_tables: database.tables_blacklist.clone(),
                only_tables: options.tables.clone(),
            },
            notify,
            clean_local_db: db_policy.filter(|_| wants_local_db),
            clean_remote_db: db_policy.filter(|_| wants_remote_db),
            clean_local_media: media_policy.filter(|_| wants_local_media),
            clean_remote_media: media_policy.filter(|_| wants_remote_media),
            clean_local_rsync,
            clean_remote_rsync,
            remote_error: None,
        })
    }

    pub fn needs_remote(&self) -> bool {
        self.remote_dir.is_some()
    }
}

/// What a backup run produced.
#[derive(Debug, Default)]
pub struct BackupReport {
    pub database_artifact: PathBuf,
    pub media_artifacts: Vec<PathBuf>,
    pub remote_mirror: Option<String>,
    pub uploaded: Vec<String>,
    pub cleanup_failures: usize,
}

fn reachable<'a, T>(plan: &BackupPlan, remote: Option<&'a T>) -> Result<&'a T> {
    remote.ok_or_else(|| {
        let message = match &plan.remote_error {
            Some(cause) => format!("remote is not reachable: {}", cause),
            None => "remote is not reachable".to_string(),
        };
        AppError::Transport(message).into()
    })
}

fn remote_dir(plan: &BackupPlan) -> Result<&str> {
    plan.remote_dir
        .as_deref()
        .ok_or_else(|| AppError::Config("remote must be configured in config.json".into()).into())
}

fn record_cleanup(step: &str, result: Result<Vec<String>>, report: &mut BackupReport) {
    match result {
        Ok(removed) => tracing::info!(step, removed = removed.len(), "Cleanup finished"),
        Err(e) => {
            report.cleanup_failures += 1;
            tracing::error!(step, error = %format!("{:#}", e), "Cleanup failed");
        }
    }
}

/// Cleanup steps; each one is its own failure domain.
async fn run_cleanups<T: Transport>(
    plan: &BackupPlan,
    remote: Option<&T>,
    now: NaiveDateTime,
    report: &mut BackupReport,
) {
    if plan.clean_local_rsync {
        tracing::info!("Cleaning local broken mirror backups");
        record_cleanup(
            "local broken mirrors",
            mirror::clean_local_broken_mirrors(&plan.backup_dir),
            report,
        );
    }
    if plan.clean_remote_rsync {
        tracing::info!("Cleaning remote broken mirror backups");
        let result: Result<Vec<String>> = async {
            mirror::clean_remote_broken_mirrors(reachable(plan, remote)?, remote_dir(plan)?).await
        }
        .await;
        record_cleanup("remote broken mirrors", result, report);
    }

    if let Some(policy) = &plan.clean_local_db {
        tracing::info!("Cleaning local surplus database backups");
        record_cleanup(
            "local database",
            cleanup::clean_local(&plan.backup_dir, ArtifactKind::Database, policy, now),
            report,
        );
    }
    if let Some(policy) = &plan.clean_remote_db {
        tracing::info!("Cleaning remote surplus database backups");
        let result: Result<Vec<String>> = async {
            cleanup::clean_remote(reachable(plan, remote)?, remote_dir(plan)?, ArtifactKind::Database, policy, now)
                .await
        }
        .await;
        record_cleanup("remote database", result, report);
    }

    if let Some(policy) = &plan.clean_local_media {
        tracing::info!("Cleaning local surplus media backups");
        record_cleanup(
            "local media",
            cleanup::clean_local(&plan.backup_dir, ArtifactKind::Media, policy, now),
            report,
        );
    }
    if let Some(policy) = &plan.clean_remote_media {
        tracing::info!("Cleaning remote surplus media backups");
        let result: Result<Vec<String>> = async {
            cleanup::clean_remote(reachable(plan, remote)?, remote_dir(plan)?, ArtifactKind::Media, policy, now)
                .await
        }
        .await;
        record_cleanup("remote media", result, report);
    }
}

async fn transfer<T: Transport>(remote: &T, remote_dir: &str, files: &[PathBuf]) -> Result<Vec<String>> {
    tracing::info!(remote_dir, "Saving to remote server");
    remote.mkdir(remote_dir).await?;

    let mut uploaded = Vec::new();
    for local_file in files {
        let filename = local_file
            .file_name()
            .with_context(|| format!("Cannot upload {}", local_file.display()))?
            .to_string_lossy();
        let remote_path = remote_join(remote_dir, &filename);
        tracing::info!(file = %local_file.display(), remote = %remote_path, "Uploading");
        remote
            .put(local_file, &remote_path)
            .await
            .with_context(|| format!("Failed to upload {}", local_file.display()))?;
        uploaded.push(remote_path);
    }
    Ok(uploaded)
}

/// Runs the backup sequence.
///
/// Cleanups come first and never abort the run. Every later step is fatal:
/// a failure stops the sequence but keeps whatever was already written.
pub async fn perform_backup<E: DumpEngine, T: Transport>(
    plan: &BackupPlan,
    engine: &E,
    remote: Option<&T>,
    shell: Option<&SftpTransport>,
    now: NaiveDateTime,
) -> Result<BackupReport> {
    let mut report = BackupReport::default();
    let suffix = time_suffix(now);

    run_cleanups(plan, remote, now, &mut report).await;

    fs::create_dir_all(&plan.backup_dir).with_context(|| {
        format!("Failed to create local backup directory: {}", plan.backup_dir.display())
    })?;

    let mut outfile = plan.backup_dir.join(db_artifact_name(&suffix));
    tracing::info!(outfile = %outfile.display(), "Doing database backup");
    engine
        .dump(&outfile, &plan.dump_options)
        .context("Database dump failed")?;

    if plan.compress {
        outfile = compress::compress(&outfile)?;
    }
    if let Some(password) = &plan.encrypt_password {
        outfile = compress::encrypt(&outfile, password)?;
    }
    report.database_artifact = outfile.clone();

    if !plan.directories.is_empty() {
        if plan.rsync {
            if !plan.delete_local && !plan.no_local {
                mirror::local_mirror(&plan.backup_dir, &plan.directories, &suffix)?;
            }
            if plan.transfer {
                reachable(plan, remote)?;
                let shell = shell.ok_or_else(|| {
                    AppError::Transport("remote mirror needs a reachable sftp remote".into())
                })?;
                report.remote_mirror =
                    Some(mirror::remote_mirror(shell, remote_dir(plan)?, &plan.directories, &suffix).await?);
            }
        } else {
            tracing::info!(directories = ?plan.directories, "Backing up directories");
            let all_outfile = plan.backup_dir.join(media_archive_name(&suffix));
            archive::create_tar_gz_archive(&plan.directories, &all_outfile)?;
            report.media_artifacts.push(all_outfile);
        }
    }

    let mut produced = report.media_artifacts.clone();
    produced.push(report.database_artifact.clone());

    if let Some((command, recipient)) = &plan.notify {
        notify::notify(command, recipient, &produced)?;
    }

    if plan.transfer {
        let remote = reachable(plan, remote)?;
        report.uploaded = transfer(remote, remote_dir(plan)?, &produced).await?;

        if plan.delete_local {
            cleanup::delete_all_local(&plan.backup_dir)?;
        } else if plan.no_local {
            cleanup::remove_local_files(&produced)?;
        }
    }

    tracing::info!(
        database = %report.database_artifact.display(),
        media = report.media_artifacts.len(),
        uploaded = report.uploaded.len(),
        remote_mirror = ?report.remote_mirror,
        cleanup_failures = report.cleanup_failures,
        "Backup finished"
    );
    Ok(report)
}
