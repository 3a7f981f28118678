pub mod databases;
pub mod logger;
pub mod naming;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use which::which;

use crate::errors::AppError;

/// Resolves an external tool, preferring an explicitly configured path.
pub fn find_executable(name: &str, configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return which(path).with_context(|| {
            format!("Configured {} executable not found: {}", name, path.display())
        });
    }
    which(name).with_context(|| {
        format!("{} executable not found in PATH. Please ensure it is installed and in your PATH.", name)
    })
}

/// Runs a prepared command and fails unless it exits successfully.
///
/// Arguments are not logged since some carry passwords.
pub fn run_checked(cmd: &mut Command, tool: &str) -> Result<Output> {
    tracing::debug!(tool, program = %cmd.get_program().to_string_lossy(), "Running external command");
    let output = cmd
        .output()
        .with_context(|| format!("Failed to execute {}", tool))?;
    if !output.status.success() {
        return Err(AppError::tool(tool, &output).into());
    }
    Ok(output)
}
