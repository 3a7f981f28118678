// backuptool/src/backup/notify.rs
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::utils::run_checked;

/// Runs `command RECIPIENT <artifact>...` once the backup files exist.
pub fn notify(command: &Path, recipient: &str, artifacts: &[PathBuf]) -> Result<()> {
    tracing::info!(
        recipient,
        command = %command.display(),
        artifacts = artifacts.len(),
        "Sending notification with backups"
    );
    run_checked(Command::new(command).arg(recipient).args(artifacts), "notify_command")
        .with_context(|| format!("Notification to '{}' failed", recipient))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;

    #[test]
    fn test_notify_success() -> Result<()> {
        let ok = which::which("true")?;
        notify(&ok, "ops@example.com", &[PathBuf::from("backup_20240101-000000.sql")])
    }

    #[test]
    fn test_notify_failure_is_tool_error() -> Result<()> {
        let fail = which::which("false")?;
        let err = notify(&fail, "ops@example.com", &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AppError>(),
            Some(AppError::ToolInvocation { .. })
        ));
        Ok(())
    }
}
