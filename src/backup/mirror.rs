// backuptool/src/backup/mirror.rs
//! Incremental media mirrors: one `dir_<ts>/` tree per run, with files that
//! did not change hard-linked against the previous run.
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

use super::archive::entry_name;
use crate::transfer::{SftpTransport, Transport, remote_join};
use crate::transfer::sftp::shell_quote;
use crate::utils::naming::{CURRENT_LINK, MIRROR_MARKER, is_media_backup, media_mirror_name};
use crate::utils::{find_executable, run_checked};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub linked: usize,
    pub copied: usize,
}

fn unchanged(source: &fs::Metadata, previous: &Path) -> bool {
    match fs::metadata(previous) {
        Ok(prev) => {
            prev.is_file()
                && prev.len() == source.len()
                && prev.modified().ok().is_some()
                && prev.modified().ok() == source.modified().ok()
        }
        Err(_) => false,
    }
}

fn copy_preserving_mtime(source: &Path, target: &Path, meta: &fs::Metadata) -> Result<()> {
    fs::copy(source, target)
        .with_context(|| format!("Failed to copy {} to {}", source.display(), target.display()))?;
    if let Ok(mtime) = meta.modified() {
        File::options()
            .write(true)
            .open(target)
            .and_then(|f| f.set_modified(mtime))
            .with_context(|| format!("Failed to set modification time of {}", target.display()))?;
    }
    Ok(())
}

/// Points `backup_dir/current` at `target_name`, replacing any old link.
fn repoint_current(backup_dir: &Path, target_name: &str) -> Result<()> {
    let link = backup_dir.join(CURRENT_LINK);
    if fs::symlink_metadata(&link).is_ok() {
        fs::remove_file(&link)
            .with_context(|| format!("Failed to remove old link {}", link.display()))?;
    }
    std::os::unix::fs::symlink(target_name, &link)
        .with_context(|| format!("Failed to link {} to {}", link.display(), target_name))?;
    Ok(())
}

/// Builds `backup_dir/dir_<suffix>/` from `directories`.
///
/// Each source directory lands under its base name. The completion marker is
/// written only after every file is in place, then `current` is moved.
pub fn local_mirror(backup_dir: &Path, directories: &[PathBuf], suffix: &str) -> Result<(PathBuf, MirrorStats)> {
    let name = media_mirror_name(suffix);
    let target = backup_dir.join(&name);
    let current = backup_dir.join(CURRENT_LINK);
    let previous = fs::metadata(&current).map(|m| m.is_dir()).unwrap_or(false);

    tracing::info!(
        target = %target.display(),
        link_dest = previous,
        "Doing local media mirror backup"
    );
    fs::create_dir_all(&target)
        .with_context(|| format!("Failed to create mirror directory {}", target.display()))?;

    let mut stats = MirrorStats::default();
    for source_dir in directories {
        if !source_dir.is_dir() {
            anyhow::bail!("Source for mirroring is not a directory: {}", source_dir.display());
        }
        let base = entry_name(source_dir)?;
        for entry in WalkDir::new(source_dir).follow_links(true) {
            let entry = entry
                .with_context(|| format!("Failed to walk directory: {}", source_dir.display()))?;
            let relative = entry.path().strip_prefix(source_dir)?;
            let dest = target.join(&base).join(relative);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest)
                    .with_context(|| format!("Failed to create {}", dest.display()))?;
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let meta = entry.metadata()?;
            let prev = current.join(&base).join(relative);
            if previous && unchanged(&meta, &prev) && fs::hard_link(&prev, &dest).is_ok() {
                stats.linked += 1;
            } else {
                copy_preserving_mtime(entry.path(), &dest, &meta)?;
                stats.copied += 1;
            }
        }
    }

    File::create(target.join(MIRROR_MARKER))
        .with_context(|| format!("Failed to mark {} as complete", target.display()))?;
    repoint_current(backup_dir, &name)?;

    tracing::info!(
        target = %target.display(),
        linked = stats.linked,
        copied = stats.copied,
        "Local media mirror finished"
    );
    Ok((target, stats))
}

/// Pushes `directories` to `<remote_dir>/dir_<suffix>/` with rsync over SSH,
/// hard-linking against `<remote_dir>/current`.
pub async fn remote_mirror(
    sftp: &SftpTransport,
    remote_dir: &str,
    directories: &[PathBuf],
    suffix: &str,
) -> Result<String> {
    let rsync = find_executable("rsync", None)?;
    let target = remote_join(remote_dir, &media_mirror_name(suffix));
    let current = remote_join(remote_dir, CURRENT_LINK);
    tracing::info!(target = %target, "Doing remote media mirror backup");

    sftp.mkdir(remote_dir).await?;

    let mut cmd = Command::new(rsync);
    cmd.arg("-az")
        .arg("--copy-dirlinks")
        .arg("-e")
        .arg(sftp.rsync_shell())
        .arg(format!("--link-dest={}", current));
    for dir in directories {
        // no trailing slash: rsync then recreates the directory itself
        let trimmed = dir.to_string_lossy().trim_end_matches('/').to_string();
        cmd.arg(trimmed);
    }
    cmd.arg(sftp.rsync_location(&target));
    tokio::task::spawn_blocking(move || run_checked(&mut cmd, "rsync"))
        .await
        .context("rsync task panicked")??;

    sftp.exec(&format!(
        "touch {marker} && rm -f {current} && ln -s {target} {current}",
        marker = shell_quote(&remote_join(&target, MIRROR_MARKER)),
        current = shell_quote(&current),
        target = shell_quote(&target),
    ))
    .await
    .with_context(|| format!("Failed to finalise remote mirror {}", target))?;

    tracing::info!(target = %target, "Remote media mirror finished");
    Ok(target)
}

/// Pulls `<remote_mirror>/<entry>/` into `destination` with rsync.
pub async fn pull_remote_mirror(
    sftp: &SftpTransport,
    remote_mirror: &str,
    entry: &str,
    destination: &Path,
) -> Result<()> {
    let rsync = find_executable("rsync", None)?;
    // trailing slash: copy the contents, not the directory itself
    let source = format!("{}/", remote_join(remote_mirror, entry));
    tracing::info!(source = %source, destination = %destination.display(), "Running rsync restore");

    let mut cmd = Command::new(rsync);
    cmd.arg("-az")
        .arg("-e")
        .arg(sftp.rsync_shell())
        .arg(sftp.rsync_location(&source))
        .arg(destination);
    tokio::task::spawn_blocking(move || run_checked(&mut cmd, "rsync"))
        .await
        .context("rsync task panicked")??;
    Ok(())
}

/// Removes every local `dir_*` directory that lacks the completion marker.
pub fn clean_local_broken_mirrors(backup_dir: &Path) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    if !backup_dir.is_dir() {
        return Ok(removed);
    }
    let mut names: Vec<String> = fs::read_dir(backup_dir)
        .with_context(|| format!("Failed to list {}", backup_dir.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| is_media_backup(n))
        .collect();
    names.sort();
    tracing::info!(found = ?names, "Local media mirrors found");

    for name in names {
        let path = backup_dir.join(&name);
        if path.join(MIRROR_MARKER).exists() {
            continue;
        }
        tracing::warn!(path = %path.display(), "Removing broken mirror");
        fs::remove_dir_all(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        removed.push(name);
    }
    Ok(removed)
}

/// Remote counterpart of [`clean_local_broken_mirrors`].
pub async fn clean_remote_broken_mirrors<T: Transport>(transport: &T, remote_dir: &str) -> Result<Vec<String>> {
    let mut names: Vec<String> = transport
        .list(remote_dir)
        .await?
        .into_iter()
        .filter(|n| is_media_backup(n))
        .collect();
    names.sort();
    tracing::info!(found = ?names, "Remote media backups found");

    let mut removed = Vec::new();
    for name in names {
        let path = remote_join(remote_dir, &name);
        if !transport.is_dir(&path).await? {
            continue;
        }
        if transport.exists(&remote_join(&path, MIRROR_MARKER)).await? {
            continue;
        }
        tracing::warn!(path = %path, "Removing broken remote mirror");
        transport.remove_all(&path).await?;
        removed.push(name);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::memory::MemoryTransport;
    use std::os::unix::fs::MetadataExt;

    fn media_tree(root: &Path) -> Result<PathBuf> {
        let media = root.join("site/media");
        fs::create_dir_all(media.join("img"))?;
        fs::write(media.join("img/logo.png"), b"logo")?;
        fs::write(media.join("notes.txt"), b"v1")?;
        Ok(media)
    }

    #[test]
    fn test_first_mirror_copies_everything() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let media = media_tree(tmp.path())?;
        let backups = tmp.path().join("backups");

        let (target, stats) = local_mirror(&backups, &[media], "20240101-000000")?;
        assert_eq!(stats, MirrorStats { linked: 0, copied: 2 });
        assert_eq!(fs::read(target.join("media/img/logo.png"))?, b"logo");
        assert!(target.join(MIRROR_MARKER).exists());
        assert_eq!(
            fs::read_link(backups.join(CURRENT_LINK))?,
            PathBuf::from("dir_20240101-000000")
        );
        Ok(())
    }

    #[test]
    fn test_second_mirror_links_unchanged_files() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let media = media_tree(tmp.path())?;
        let backups = tmp.path().join("backups");

        let (first, _) = local_mirror(&backups, &[media.clone()], "20240101-000000")?;
        fs::write(media.join("notes.txt"), b"version two")?;
        let (second, stats) = local_mirror(&backups, &[media], "20240102-000000")?;

        assert_eq!(stats, MirrorStats { linked: 1, copied: 1 });
        let a = fs::metadata(first.join("media/img/logo.png"))?;
        let b = fs::metadata(second.join("media/img/logo.png"))?;
        assert_eq!(a.ino(), b.ino());
        assert_eq!(fs::read(second.join("media/notes.txt"))?, b"version two");
        assert_eq!(fs::read(first.join("media/notes.txt"))?, b"v1");
        assert_eq!(
            fs::read_link(backups.join(CURRENT_LINK))?,
            PathBuf::from("dir_20240102-000000")
        );
        Ok(())
    }

    #[test]
    fn test_clean_local_broken_mirrors() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let good = tmp.path().join("dir_20240101-000000");
        let broken = tmp.path().join("dir_20240102-000000");
        fs::create_dir_all(&good)?;
        fs::create_dir_all(broken.join("media"))?;
        File::create(good.join(MIRROR_MARKER))?;
        fs::write(tmp.path().join("dir_20240103-000000.tar.gz"), b"")?;
        fs::write(tmp.path().join("backup_20240103-000000.sql"), b"")?;

        let removed = clean_local_broken_mirrors(tmp.path())?;
        assert_eq!(removed, vec!["dir_20240102-000000".to_string()]);
        assert!(good.exists());
        assert!(!broken.exists());
        assert!(tmp.path().join("dir_20240103-000000.tar.gz").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_clean_remote_broken_mirrors() -> Result<()> {
        let remote = MemoryTransport::default();
        remote.insert("/srv/b/dir_20240101-000000/__good_backup", b"");
        remote.insert("/srv/b/dir_20240101-000000/media/a.png", b"a");
        remote.insert("/srv/b/dir_20240102-000000/media/a.png", b"a");
        remote.insert("/srv/b/dir_20240103-000000.tar.gz", b"tgz");

        let removed = clean_remote_broken_mirrors(&remote, "/srv/b").await?;
        assert_eq!(removed, vec!["dir_20240102-000000".to_string()]);
        assert_eq!(
            remote.names_in("/srv/b"),
            vec!["dir_20240101-000000".to_string(), "dir_20240103-000000.tar.gz".to_string()]
        );
        Ok(())
    }
}
