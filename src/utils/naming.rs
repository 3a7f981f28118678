// backuptool/src/utils/naming.rs
//! Artifact naming: `<kind-prefix><YYYYMMDD-HHMMSS><suffix>`.
//!
//! The timestamp width is fixed, so sorting names of one kind lexicographically
//! also sorts them chronologically.

use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::LazyLock;

use crate::errors::{AppError, Result};

pub const DB_PREFIX: &str = "backup_";
pub const MEDIA_PREFIX: &str = "dir_";
pub const TIME_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Written into a mirror directory once the run that produced it completed.
pub const MIRROR_MARKER: &str = "__good_backup";

/// Symlink pointing at the most recent complete mirror.
pub const CURRENT_LINK: &str = "current";

static TIMESTAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{8}-\d{6}").expect("static timestamp pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Database,
    Media,
    NotABackup,
}

pub fn classify(name: &str) -> ArtifactKind {
    if name.starts_with(DB_PREFIX) {
        ArtifactKind::Database
    } else if name.starts_with(MEDIA_PREFIX) {
        ArtifactKind::Media
    } else {
        ArtifactKind::NotABackup
    }
}

pub fn is_media_backup(name: &str) -> bool {
    classify(name) == ArtifactKind::Media
}

pub fn is_backup(name: &str) -> bool {
    classify(name) != ArtifactKind::NotABackup
}

/// Returns the creation time embedded in an artifact name.
///
/// Uses the first `8 digits - 6 digits` run in the name, read in the local
/// calendar. A run that is not a valid date (month 13, hour 25...) is treated
/// the same as no run at all.
pub fn extract_timestamp(name: &str) -> Result<NaiveDateTime> {
    let found = TIMESTAMP_RE
        .find(name)
        .ok_or_else(|| AppError::NoTimestamp(name.to_string()))?;
    NaiveDateTime::parse_from_str(found.as_str(), TIME_FORMAT)
        .map_err(|_| AppError::NoTimestamp(name.to_string()))
}

pub fn time_suffix(at: NaiveDateTime) -> String {
    at.format(TIME_FORMAT).to_string()
}

/// `backup_<ts>.sql`; compression and encryption append their own extensions.
pub fn db_artifact_name(suffix: &str) -> String {
    format!("{}{}.sql", DB_PREFIX, suffix)
}

pub fn media_archive_name(suffix: &str) -> String {
    format!("{}{}.tar.gz", MEDIA_PREFIX, suffix)
}

pub fn media_mirror_name(suffix: &str) -> String {
    format!("{}{}", MEDIA_PREFIX, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_classify() {
        assert_eq!(classify("backup_X"), ArtifactKind::Database);
        assert_eq!(classify("dir_X"), ArtifactKind::Media);
        assert_eq!(classify("other"), ArtifactKind::NotABackup);
        assert_eq!(classify("current"), ArtifactKind::NotABackup);
        assert!(is_backup("dir_20140101-000000.tar.gz"));
        assert!(!is_backup("notes.txt"));
    }

    #[test]
    fn test_extract_timestamp() -> anyhow::Result<()> {
        let ts = extract_timestamp("backup_20140102-031502.sql.gz.zip")?;
        let expected = NaiveDate::from_ymd_opt(2014, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 15, 2))
            .unwrap();
        assert_eq!(ts, expected);
        Ok(())
    }

    #[test]
    fn test_extract_timestamp_uses_first_match() -> anyhow::Result<()> {
        let ts = extract_timestamp("dir_20200101-000000_copy_of_20210101-000000")?;
        assert_eq!(time_suffix(ts), "20200101-000000");
        Ok(())
    }

    #[test]
    fn test_extract_timestamp_missing() {
        assert!(matches!(
            extract_timestamp("backup_latest.sql"),
            Err(AppError::NoTimestamp(_))
        ));
        assert!(matches!(
            extract_timestamp("backup_2014010-000000.sql"),
            Err(AppError::NoTimestamp(_))
        ));
        assert!(matches!(
            extract_timestamp("backup_20141301-000000.sql"),
            Err(AppError::NoTimestamp(_))
        ));
    }

    #[test]
    fn test_names_round_trip_through_extract() -> anyhow::Result<()> {
        let at = NaiveDate::from_ymd_opt(2023, 7, 9)
            .and_then(|d| d.and_hms_opt(23, 59, 1))
            .unwrap();
        let suffix = time_suffix(at);
        assert_eq!(db_artifact_name(&suffix), "backup_20230709-235901.sql");
        assert_eq!(media_archive_name(&suffix), "dir_20230709-235901.tar.gz");
        assert_eq!(extract_timestamp(&media_mirror_name(&suffix))?, at);
        Ok(())
    }
}
