// backuptool/src/backup/archive.rs
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tar::Builder;
use walkdir::WalkDir;

/// Name a directory gets inside a media archive or mirror.
pub fn entry_name(directory: &Path) -> Result<String> {
    directory
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .last()
        .with_context(|| format!("Cannot back up a directory without a name: {}", directory.display()))
}

/// Creates a GZipped TAR archive holding several directories.
///
/// Each directory's contents are stored under its base name, so
/// `/srv/site/media/a.png` lands at `media/a.png`.
pub fn create_tar_gz_archive(directories: &[PathBuf], archive_dest_path: &Path) -> Result<PathBuf> {
    for dir in directories {
        if !dir.is_dir() {
            anyhow::bail!("Source for archival is not a directory: {}", dir.display());
        }
    }
    if let Some(parent) = archive_dest_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create parent directory for archive: {}", parent.display())
        })?;
    }

    tracing::info!(
        archive = %archive_dest_path.display(),
        directories = directories.len(),
        "Creating media archive"
    );

    let archive_file = File::create(archive_dest_path)
        .with_context(|| format!("Failed to create archive file: {}", archive_dest_path.display()))?;
    let enc = GzEncoder::new(archive_file, Compression::default());
    let mut tar_builder = Builder::new(enc);

    for source_dir in directories {
        let prefix = PathBuf::from(entry_name(source_dir)?);
        for entry in WalkDir::new(source_dir).follow_links(true) {
            let entry = entry
                .with_context(|| format!("Failed to walk directory: {}", source_dir.display()))?;
            let path = entry.path();
            let relative = path.strip_prefix(source_dir).with_context(|| {
                format!("Failed to strip prefix {} from {}", source_dir.display(), path.display())
            })?;
            let name = prefix.join(relative);

            if entry.file_type().is_dir() {
                tar_builder
                    .append_dir(&name, path)
                    .with_context(|| format!("Failed to append directory {} to archive", path.display()))?;
            } else if entry.file_type().is_file() {
                tar_builder.append_path_with_name(path, &name).with_context(|| {
                    format!("Failed to append file {} as {} to archive", path.display(), name.display())
                })?;
            }
        }
    }

    let encoder = tar_builder.into_inner().with_context(|| {
        format!("Failed to finish tar stream for archive: {}", archive_dest_path.display())
    })?;
    encoder.finish().with_context(|| {
        format!("Failed to finish Gzip encoding for archive: {}", archive_dest_path.display())
    })?;

    tracing::info!(archive = %archive_dest_path.display(), "Media archive created");
    Ok(archive_dest_path.to_path_buf())
}

/// Extracts the `entry` directory of a media archive into `extract_to_dir`.
///
/// Returns how many files were written. Other top-level entries are skipped.
pub fn extract_tar_gz_entry(archive_path: &Path, entry: &str, extract_to_dir: &Path) -> Result<usize> {
    if !archive_path.is_file() {
        anyhow::bail!("Archive for extraction is not a file: {}", archive_path.display());
    }
    if extract_to_dir.exists() && !extract_to_dir.is_dir() {
        anyhow::bail!(
            "Extraction path exists but is not a directory: {}",
            extract_to_dir.display()
        );
    }
    std::fs::create_dir_all(extract_to_dir).with_context(|| {
        format!("Failed to create extraction directory: {}", extract_to_dir.display())
    })?;

    tracing::info!(
        archive = %archive_path.display(),
        entry,
        destination = %extract_to_dir.display(),
        "Extracting media archive"
    );

    let archive_file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive file: {}", archive_path.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(archive_file));

    let mut written = 0;
    for item in archive
        .entries()
        .with_context(|| format!("Failed to read archive {}", archive_path.display()))?
    {
        let mut item = item?;
        let path = item.path()?.into_owned();
        let Ok(relative) = path.strip_prefix(entry) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            anyhow::bail!(
                "Archive {} holds an entry outside its directory: {}",
                archive_path.display(),
                path.display()
            );
        }
        let target = extract_to_dir.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        item.unpack(&target)
            .with_context(|| format!("Failed to unpack {} to {}", path.display(), target.display()))?;
        if item.header().entry_type().is_file() {
            written += 1;
        }
    }

    tracing::info!(files = written, destination = %extract_to_dir.display(), "Media archive extracted");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_entry_name() -> Result<()> {
        assert_eq!(entry_name(Path::new("/srv/site/media"))?, "media");
        assert_eq!(entry_name(Path::new("/srv/site/media/"))?, "media");
        assert!(entry_name(Path::new("/")).is_err());
        Ok(())
    }

    #[test]
    fn test_archive_keeps_directory_names() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let media = tmp.path().join("media");
        let uploads = tmp.path().join("uploads");
        fs::create_dir_all(media.join("img"))?;
        fs::create_dir_all(&uploads)?;
        fs::write(media.join("img/logo.png"), b"png")?;
        fs::write(uploads.join("report.pdf"), b"pdf")?;

        let archive = tmp.path().join("out/dir_20240101-000000.tar.gz");
        create_tar_gz_archive(&[media, uploads], &archive)?;

        let mut names: Vec<String> = tar::Archive::new(GzDecoder::new(File::open(&archive)?))
            .entries()?
            .map(|e| -> Result<String> {
                Ok(e?.path()?.to_string_lossy().trim_end_matches('/').to_string())
            })
            .collect::<Result<_>>()?;
        names.sort();
        assert!(names.contains(&"media/img/logo.png".to_string()));
        assert!(names.contains(&"uploads/report.pdf".to_string()));
        Ok(())
    }

    #[test]
    fn test_extract_only_requested_entry() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let media = tmp.path().join("media");
        let other = tmp.path().join("static");
        fs::create_dir_all(media.join("a"))?;
        fs::create_dir_all(&other)?;
        fs::write(media.join("a/one.txt"), b"1")?;
        fs::write(other.join("two.txt"), b"2")?;

        let archive = tmp.path().join("dir_20240101-000000.tar.gz");
        create_tar_gz_archive(&[media, other], &archive)?;

        let restored = tmp.path().join("restored");
        let count = extract_tar_gz_entry(&archive, "media", &restored)?;
        assert_eq!(count, 1);
        assert_eq!(fs::read(restored.join("a/one.txt"))?, b"1");
        assert!(!restored.join("two.txt").exists());
        Ok(())
    }

    #[test]
    fn test_extract_rejects_parent_dir_entries() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let archive = tmp.path().join("dir_20240101-000000.tar.gz");
        let data = b"outside";
        let mut builder = Builder::new(GzEncoder::new(File::create(&archive)?, Compression::default()));
        let mut header = tar::Header::new_gnu();
        let raw_name = b"media/../../escaped.txt";
        header.as_old_mut().name[..raw_name.len()].copy_from_slice(raw_name);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, &data[..])?;
        builder.into_inner()?.finish()?;

        let media_root = tmp.path().join("site/media");
        assert!(extract_tar_gz_entry(&archive, "media", &media_root).is_err());
        assert!(!tmp.path().join("escaped.txt").exists());
        assert!(!tmp.path().join("site/escaped.txt").exists());
        Ok(())
    }

    #[test]
    fn test_missing_source_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let result = create_tar_gz_archive(
            &[tmp.path().join("missing")],
            &tmp.path().join("dir_20240101-000000.tar.gz"),
        );
        assert!(result.is_err());
    }
}
