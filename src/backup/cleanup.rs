// backuptool/src/backup/cleanup.rs
//! Applies retention decisions to a local backup directory or a remote store.
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};

use crate::retention::{TieredPolicy, decide_remove};
use crate::transfer::{Transport, remote_join};
use crate::utils::naming::{ArtifactKind, classify, is_backup};

fn list_local(backup_dir: &Path) -> Result<Vec<String>> {
    if !backup_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(backup_dir)
        .with_context(|| format!("Failed to list {}", backup_dir.display()))?
    {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

fn remove_local_path(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
    .with_context(|| format!("Failed to remove {}", path.display()))
}

fn of_kind(names: Vec<String>, kind: ArtifactKind) -> Vec<String> {
    let mut names: Vec<String> = names.into_iter().filter(|n| classify(n) == kind).collect();
    names.sort();
    names
}

/// Deletes the local artifacts of `kind` that `policy` does not keep.
pub fn clean_local(
    backup_dir: &Path,
    kind: ArtifactKind,
    policy: &TieredPolicy,
    now: NaiveDateTime,
) -> Result<Vec<String>> {
    let backups = of_kind(list_local(backup_dir)?, kind);
    tracing::info!(kind = ?kind, found = ?backups, "Local backups found");

    let remove_list = decide_remove(&backups, policy, now);
    tracing::info!(kind = ?kind, remove = ?remove_list, "Local backups to clean");

    for name in &remove_list {
        remove_local_path(&backup_dir.join(name))?;
    }
    Ok(remove_list)
}

/// Deletes the remote artifacts of `kind` that `policy` does not keep.
pub async fn clean_remote<T: Transport>(
    transport: &T,
    remote_dir: &str,
    kind: ArtifactKind,
    policy: &TieredPolicy,
    now: NaiveDateTime,
) -> Result<Vec<String>> {
    let backups = of_kind(transport.list(remote_dir).await?, kind);
    tracing::info!(kind = ?kind, found = ?backups, "Remote backups found");

    let remove_list = decide_remove(&backups, policy, now);
    tracing::info!(kind = ?kind, remove = ?remove_list, "Remote backups to clean");

    for name in &remove_list {
        let target_path = remote_join(remote_dir, name);
        tracing::info!(path = %target_path, "Removing");
        match kind {
            // media backups may be mirror directories
            ArtifactKind::Media => transport.remove_all(&target_path).await?,
            _ => transport.remove(&target_path).await?,
        }
    }
    Ok(remove_list)
}

/// Removes every local backup artifact, of both kinds.
pub fn delete_all_local(backup_dir: &Path) -> Result<Vec<String>> {
    let mut backups: Vec<String> = list_local(backup_dir)?
        .into_iter()
        .filter(|n| is_backup(n))
        .collect();
    backups.sort();
    tracing::info!(found = ?backups, "Deleting all local db and media backups");
    for name in &backups {
        remove_local_path(&backup_dir.join(name))?;
    }
    Ok(backups)
}

/// Removes the given local files, used once they have reached the remote.
pub fn remove_local_files(paths: &[PathBuf]) -> Result<()> {
    tracing::info!(files = ?paths, "Local files to remove");
    for path in paths {
        remove_local_path(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::memory::MemoryTransport;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 15)
            .and_then(|d| d.and_hms_opt(14, 30, 0))
            .unwrap()
    }

    fn daily(n: u32) -> TieredPolicy {
        TieredPolicy { monthly: 0, weekly: 0, daily: n, hourly: 0 }
    }

    #[test]
    fn test_clean_local_only_touches_requested_kind() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        for name in [
            "backup_20240101-010000.sql.gz",
            "backup_20240515-010000.sql.gz",
            "dir_20240101-010000.tar.gz",
            "notes.txt",
        ] {
            fs::write(tmp.path().join(name), b"x")?;
        }
        fs::create_dir_all(tmp.path().join("dir_20240102-010000/media"))?;

        let removed = clean_local(tmp.path(), ArtifactKind::Database, &daily(1), now())?;
        assert_eq!(removed, vec!["backup_20240101-010000.sql.gz".to_string()]);
        assert!(tmp.path().join("backup_20240515-010000.sql.gz").exists());
        assert!(tmp.path().join("dir_20240101-010000.tar.gz").exists());

        let removed = clean_local(tmp.path(), ArtifactKind::Media, &daily(1), now())?;
        assert_eq!(removed.len(), 2);
        assert!(!tmp.path().join("dir_20240102-010000").exists());
        assert!(tmp.path().join("notes.txt").exists());
        Ok(())
    }

    #[test]
    fn test_clean_local_missing_directory() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let removed = clean_local(&tmp.path().join("nope"), ArtifactKind::Database, &daily(1), now())?;
        assert!(removed.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_clean_remote() -> Result<()> {
        let remote = MemoryTransport::with_files(
            "/home/ops/backups",
            &[
                "backup_20140101-010000.sql",
                "backup_20140102-010000.sql",
                "backup_20240515-010000.sql",
                "dir_20140101-010000.tar.gz",
            ],
        );
        remote.insert("/home/ops/backups/dir_20140102-010000/media/a.png", b"a");

        let removed = clean_remote(&remote, "/home/ops/backups", ArtifactKind::Database, &daily(1), now()).await?;
        assert_eq!(
            removed,
            vec![
                "backup_20140101-010000.sql".to_string(),
                "backup_20140102-010000.sql".to_string()
            ]
        );

        let removed = clean_remote(&remote, "/home/ops/backups", ArtifactKind::Media, &daily(1), now()).await?;
        assert_eq!(removed.len(), 2);
        assert_eq!(
            remote.names_in("/home/ops/backups"),
            vec!["backup_20240515-010000.sql".to_string()]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_clean_remote_unreachable() {
        let remote = MemoryTransport {
            unreachable: true,
            ..Default::default()
        };
        assert!(
            clean_remote(&remote, "/x", ArtifactKind::Database, &daily(1), now())
                .await
                .is_err()
        );
    }

    #[test]
    fn test_delete_all_local_keeps_strays() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        fs::write(tmp.path().join("backup_20240101-010000.sql"), b"")?;
        fs::write(tmp.path().join("keep.me"), b"")?;
        fs::create_dir_all(tmp.path().join("dir_20240101-010000/media"))?;

        let removed = delete_all_local(tmp.path())?;
        assert_eq!(removed.len(), 2);
        assert!(tmp.path().join("keep.me").exists());
        Ok(())
    }
}
