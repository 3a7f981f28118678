// backuptool/src/backup/compress.rs
//! Post-processing of the dump file: gzip and password-protected zip.
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::utils::{find_executable, run_checked};

fn with_extension_appended(path: &Path, ext: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

fn strip_extension(path: &Path, ext: &str) -> Result<PathBuf> {
    if path.extension().and_then(|e| e.to_str()) != Some(ext) {
        anyhow::bail!("{} does not end in .{}", path.display(), ext);
    }
    Ok(path.with_extension(""))
}

/// Compresses `path` into `path.gz` and removes the original.
pub fn compress(path: &Path) -> Result<PathBuf> {
    let target = with_extension_appended(path, "gz");
    tracing::info!(source = %path.display(), target = %target.display(), "Compressing backup file");

    let mut input = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
    );
    let output = File::create(&target)
        .with_context(|| format!("Failed to create {}", target.display()))?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    io::copy(&mut input, &mut encoder)
        .with_context(|| format!("Failed to compress {}", path.display()))?;
    encoder.finish()?;

    fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    Ok(target)
}

/// Inverse of [`compress`]: `x.sql.gz` becomes `x.sql`.
pub fn decompress(path: &Path) -> Result<PathBuf> {
    let target = strip_extension(path, "gz")?;
    tracing::info!(source = %path.display(), target = %target.display(), "Uncompressing");

    let mut decoder = GzDecoder::new(BufReader::new(
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
    ));
    let mut output = BufWriter::new(
        File::create(&target).with_context(|| format!("Failed to create {}", target.display()))?,
    );
    io::copy(&mut decoder, &mut output)
        .with_context(|| format!("Failed to uncompress {}", path.display()))?;

    fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    Ok(target)
}

/// Wraps `path` into a password-protected `path.zip` and removes the original.
pub fn encrypt(path: &Path, password: &str) -> Result<PathBuf> {
    let zip = find_executable("zip", None)?;
    let target = with_extension_appended(path, "zip");
    tracing::info!(source = %path.display(), target = %target.display(), "Zipping and encrypting backup file");

    run_checked(
        Command::new(zip)
            .arg("-q")
            .arg("-j")
            .arg("-P")
            .arg(password)
            .arg(&target)
            .arg(path),
        "zip",
    )?;

    fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    Ok(target)
}

/// Inverse of [`encrypt`]; the archive is unpacked next to itself.
pub fn decrypt(path: &Path, password: &str) -> Result<PathBuf> {
    let unzip = find_executable("unzip", None)?;
    let target = strip_extension(path, "zip")?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tracing::info!(source = %path.display(), target = %target.display(), "Decrypting backup file");

    run_checked(
        Command::new(unzip)
            .arg("-o")
            .arg("-q")
            .arg("-P")
            .arg(password)
            .arg(path)
            .arg("-d")
            .arg(dir),
        "unzip",
    )?;

    if !target.is_file() {
        anyhow::bail!(
            "{} did not contain {}",
            path.display(),
            target.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        );
    }
    fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    Ok(target)
}

/// Undoes whatever the artifact's extensions say was applied, outermost first.
pub fn unpack_database_artifact(path: &Path, password: Option<&str>) -> Result<PathBuf> {
    let mut current = path.to_path_buf();
    loop {
        match current.extension().and_then(|e| e.to_str()) {
            Some("zip") => {
                let password = password.context(
                    "The backup is encrypted; set BACKUP_PASSWORD to restore it",
                )?;
                current = decrypt(&current, password)?;
            }
            Some("gz") => current = decompress(&current)?,
            _ => return Ok(current),
        }
    }
}
