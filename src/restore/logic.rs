// backuptool/src/restore/logic.rs
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::backup::archive::{entry_name, extract_tar_gz_entry};
use crate::backup::compress::unpack_database_artifact;
use crate::backup::mirror::pull_remote_mirror;
use crate::errors::AppError;
use crate::transfer::{SftpTransport, Transport, remote_join};
use crate::utils::databases::DumpEngine;
use crate::utils::naming::{ArtifactKind, MIRROR_MARKER, classify, extract_timestamp};

/// What a restore run should fetch and where it goes.
#[derive(Debug, Clone)]
pub struct RestorePlan {
    pub restore_dir: String,
    pub database: bool,
    /// Set when media should be restored into this directory.
    pub media_root: Option<PathBuf>,
    pub password: Option<String>,
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub database_artifact: Option<String>,
    pub media_artifact: Option<String>,
}

/// The chronologically latest artifact of `kind`.
///
/// Timestamps have a fixed width, so the lexicographic maximum is the newest.
pub fn latest(names: &[String], kind: ArtifactKind) -> Option<String> {
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| classify(n) == kind && extract_timestamp(n).is_ok())
        .max()
        .map(str::to_string)
}

fn not_found(kind: ArtifactKind, restore_dir: &str) -> anyhow::Error {
    let what = match kind {
        ArtifactKind::Database => "database",
        _ => "media",
    };
    AppError::NotFound(format!("no {} backup in remote directory {}", what, restore_dir)).into()
}

fn require_latest(names: &[String], kind: ArtifactKind, restore_dir: &str) -> Result<String> {
    latest(names, kind).ok_or_else(|| not_found(kind, restore_dir))
}

/// The newest media artifact that is a tarball or a completed mirror.
///
/// Mirror directories without the marker file come from interrupted runs
/// and are skipped.
async fn latest_good_media<T: Transport>(remote: &T, names: &[String], restore_dir: &str) -> Result<String> {
    let mut candidates: Vec<&str> = names
        .iter()
        .map(|n| n.trim())
        .filter(|n| classify(n) == ArtifactKind::Media && extract_timestamp(n).is_ok())
        .collect();
    candidates.sort_unstable_by(|a, b| b.cmp(a));

    for name in candidates {
        let path = remote_join(restore_dir, name);
        if remote.is_dir(&path).await? && !remote.exists(&remote_join(&path, MIRROR_MARKER)).await? {
            tracing::warn!(artifact = %name, "Skipping incomplete mirror backup");
            continue;
        }
        return Ok(name.to_string());
    }
    Err(not_found(ArtifactKind::Media, restore_dir))
}

/// Fetches the latest backups and restores them.
///
/// Both artifacts are selected before anything is downloaded, so a missing
/// kind fails the run without touching the database or the media directory.
pub async fn perform_restore<E: DumpEngine, T: Transport>(
    plan: &RestorePlan,
    engine: &E,
    remote: &T,
    shell: Option<&SftpTransport>,
    workdir: &Path,
) -> Result<RestoreReport> {
    let backups = remote
        .list(&plan.restore_dir)
        .await
        .with_context(|| format!("Remote directory {} does not exist", plan.restore_dir))?;

    let db_remote = if plan.database {
        Some(require_latest(&backups, ArtifactKind::Database, &plan.restore_dir)?)
    } else {
        None
    };
    let media_remote = match &plan.media_root {
        Some(_) => Some(latest_good_media(remote, &backups, &plan.restore_dir).await?),
        None => None,
    };

    let sql_local = match &db_remote {
        Some(name) => {
            let db_local = workdir.join(name);
            tracing::info!(artifact = %name, "Fetching database");
            remote
                .get(&remote_join(&plan.restore_dir, name), &db_local)
                .await
                .with_context(|| format!("Failed to fetch {}", name))?;
            Some(unpack_database_artifact(&db_local, plan.password.as_deref())?)
        }
        None => None,
    };

    if let (Some(name), Some(media_root)) = (&media_remote, &plan.media_root) {
        let media_remote_full_path = remote_join(&plan.restore_dir, name);
        let entry = entry_name(media_root)?;
        tracing::info!(artifact = %name, destination = %media_root.display(), "Fetching media");

        if remote.is_dir(&media_remote_full_path).await? {
            let shell = shell.ok_or_else(|| {
                AppError::Transport("restoring a mirror backup needs an sftp remote".into())
            })?;
            pull_remote_mirror(shell, &media_remote_full_path, &entry, media_root).await?;
        } else {
            let media_local = workdir.join(name);
            remote
                .get(&media_remote_full_path, &media_local)
                .await
                .with_context(|| format!("Failed to fetch {}", name))?;
            let files = extract_tar_gz_entry(&media_local, &entry, media_root)?;
            if files == 0 {
                tracing::warn!(artifact = %name, entry = %entry, "Media archive had no files for this directory");
            }
        }
    }

    if let Some(sql_local) = &sql_local {
        engine
            .restore(sql_local)
            .with_context(|| format!("Restoring {} failed", sql_local.display()))?;
    }

    tracing::info!(database = ?db_remote, media = ?media_remote, "Restore finished");
    Ok(RestoreReport {
        database_artifact: db_remote,
        media_artifact: media_remote,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::create_tar_gz_archive;
    use crate::transfer::memory::MemoryTransport;
    use crate::utils::databases::DumpOptions;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::fs;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEngine {
        restored: Mutex<Vec<String>>,
    }

    impl DumpEngine for RecordingEngine {
        fn dump(&self, _destination: &Path, _options: &DumpOptions) -> Result<()> {
            Ok(())
        }

        fn restore(&self, source: &Path) -> Result<()> {
            self.restored.lock().unwrap().push(fs::read_to_string(source)?);
            Ok(())
        }
    }

    fn gz(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn plan(media_root: Option<PathBuf>) -> RestorePlan {
        RestorePlan {
            restore_dir: "/srv/backups".into(),
            database: true,
            media_root,
            password: None,
        }
    }

    #[test]
    fn test_latest_picks_newest_of_kind() {
        let names: Vec<String> = [
            "backup_20240101-000000.sql.gz",
            "backup_20240301-000000.sql.gz",
            "dir_20240401-000000.tar.gz",
            "backup_20240201-000000.sql",
            "README",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            latest(&names, ArtifactKind::Database).as_deref(),
            Some("backup_20240301-000000.sql.gz")
        );
        assert_eq!(
            latest(&names, ArtifactKind::Media).as_deref(),
            Some("dir_20240401-000000.tar.gz")
        );
        assert_eq!(latest(&[], ArtifactKind::Database), None);
    }

    #[test]
    fn test_latest_ignores_names_without_timestamp() {
        let names: Vec<String> = ["backup_20240101-000000.sql.gz", "backup_old.sql", "dir_latest.tar.gz"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            latest(&names, ArtifactKind::Database).as_deref(),
            Some("backup_20240101-000000.sql.gz")
        );
        assert_eq!(latest(&names, ArtifactKind::Media), None);
    }

    #[tokio::test]
    async fn test_restores_latest_database() -> Result<()> {
        let work = tempfile::tempdir()?;
        let remote = MemoryTransport::default();
        remote.insert("/srv/backups/backup_20240101-000000.sql.gz", &gz(b"old"));
        remote.insert("/srv/backups/backup_20240102-000000.sql.gz", &gz(b"new"));
        let engine = RecordingEngine::default();

        let report = perform_restore(&plan(None), &engine, &remote, None, work.path()).await?;
        assert_eq!(report.database_artifact.as_deref(), Some("backup_20240102-000000.sql.gz"));
        assert_eq!(*engine.restored.lock().unwrap(), vec!["new".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_restores_media_tarball() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let media = tmp.path().join("site/media");
        fs::create_dir_all(&media)?;
        fs::write(media.join("a.png"), b"a")?;
        let archive = tmp.path().join("dir_20240102-000000.tar.gz");
        create_tar_gz_archive(&[media.clone()], &archive)?;

        let remote = MemoryTransport::default();
        remote.insert("/srv/backups/dir_20240102-000000.tar.gz", &fs::read(&archive)?);
        let target = tmp.path().join("restored/media");

        let mut plan = plan(Some(target.clone()));
        plan.database = false;
        let engine = RecordingEngine::default();
        let work = tempfile::tempdir()?;
        perform_restore(&plan, &engine, &remote, None, work.path()).await?;

        assert_eq!(fs::read(target.join("a.png"))?, b"a");
        assert!(engine.restored.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_media_fails_before_database_restore() -> Result<()> {
        let work = tempfile::tempdir()?;
        let remote = MemoryTransport::with_files("/srv/backups", &["backup_20240101-000000.sql"]);
        let engine = RecordingEngine::default();

        let err = perform_restore(&plan(Some(work.path().join("media"))), &engine, &remote, None, work.path())
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::NotFound(_))));
        assert!(engine.restored.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_remote_fails() {
        let work = tempfile::tempdir().unwrap();
        let remote = MemoryTransport { unreachable: true, ..Default::default() };
        let engine = RecordingEngine::default();
        let err = perform_restore(&plan(None), &engine, &remote, None, work.path())
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::Transport(_))));
    }

    #[tokio::test]
    async fn test_incomplete_mirror_is_skipped() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let media = tmp.path().join("site/media");
        fs::create_dir_all(&media)?;
        fs::write(media.join("a.png"), b"tarball")?;
        let archive = tmp.path().join("dir_20240101-000000.tar.gz");
        create_tar_gz_archive(&[media.clone()], &archive)?;

        let remote = MemoryTransport::default();
        remote.insert("/srv/backups/dir_20240101-000000.tar.gz", &fs::read(&archive)?);
        remote.insert("/srv/backups/dir_20240102-000000/media/a.png", b"partial");
        let target = tmp.path().join("restored/media");
        let mut plan = plan(Some(target.clone()));
        plan.database = false;

        let work = tempfile::tempdir()?;
        let report = perform_restore(&plan, &RecordingEngine::default(), &remote, None, work.path()).await?;
        assert_eq!(report.media_artifact.as_deref(), Some("dir_20240101-000000.tar.gz"));
        assert_eq!(fs::read(target.join("a.png"))?, b"tarball");
        Ok(())
    }

    #[tokio::test]
    async fn test_only_incomplete_mirrors_is_not_found() -> Result<()> {
        let work = tempfile::tempdir()?;
        let remote = MemoryTransport::default();
        remote.insert("/srv/backups/backup_20240101-000000.sql", b"sql");
        remote.insert("/srv/backups/dir_20240102-000000/media/a.png", b"partial");

        let engine = RecordingEngine::default();
        let err = perform_restore(&plan(Some(work.path().join("media"))), &engine, &remote, None, work.path())
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::NotFound(_))));
        assert!(engine.restored.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_mirror_restore_needs_sftp() -> Result<()> {
        let work = tempfile::tempdir()?;
        let remote = MemoryTransport::default();
        remote.insert("/srv/backups/dir_20240102-000000/media/a.png", b"a");
        remote.insert("/srv/backups/dir_20240102-000000/__good_backup", b"");
        let mut plan = plan(Some(work.path().join("media")));
        plan.database = false;

        let err = perform_restore(&plan, &RecordingEngine::default(), &remote, None, work.path())
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::Transport(_))));
        Ok(())
    }
}
