// backuptool/src/restore/db_restore.rs
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::backup::db_dump::mysql_connection_args;
use crate::utils::databases::ConnectionInfo;
use crate::utils::{find_executable, run_checked};

pub(crate) fn psql_args(conn: &ConnectionInfo, sql_file_path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-X".into(), // Do not read psqlrc
        "-q".into(),
        "-v".into(),
        "ON_ERROR_STOP=1".into(),
    ];
    if let Some(user) = &conn.user {
        args.push("-U".into());
        args.push(user.into());
    }
    if let Some(host) = &conn.host {
        args.push("-h".into());
        args.push(host.into());
    }
    if let Some(port) = conn.port {
        args.push("-p".into());
        args.push(port.to_string().into());
    }
    args.push("-d".into());
    args.push(conn.name.clone().into());
    args.push("-f".into());
    args.push(sql_file_path.into());
    args
}

/// Executes a SQL dump against the configured database with `psql`.
pub fn restore_postgres(conn: &ConnectionInfo, sql_file_path: &Path) -> Result<()> {
    if !sql_file_path.is_file() {
        anyhow::bail!("SQL file for restoration not found: {}", sql_file_path.display());
    }
    let psql = find_executable("psql", None)?;
    tracing::info!(
        database = %conn.name,
        source = %sql_file_path.display(),
        "Doing PostgreSQL restore"
    );

    let mut cmd = Command::new(psql);
    cmd.args(psql_args(conn, sql_file_path));
    if let Some(password) = &conn.password {
        cmd.env("PGPASSWORD", password);
    }
    run_checked(&mut cmd, "psql")
        .with_context(|| format!("psql restore of {} failed", sql_file_path.display()))?;

    tracing::info!(database = %conn.name, "PostgreSQL restore finished");
    Ok(())
}

/// Feeds a SQL dump to the `mysql` client on stdin.
pub fn restore_mysql(conn: &ConnectionInfo, sql_file_path: &Path) -> Result<()> {
    let mysql = find_executable("mysql", None)?;
    let input = File::open(sql_file_path)
        .with_context(|| format!("SQL file for restoration not found: {}", sql_file_path.display()))?;
    tracing::info!(
        database = %conn.name,
        source = %sql_file_path.display(),
        "Doing MySQL restore"
    );

    let mut cmd = Command::new(mysql);
    cmd.args(mysql_connection_args(conn))
        .arg(&conn.name)
        .stdin(Stdio::from(input));
    if let Some(password) = &conn.password {
        cmd.env("MYSQL_PWD", password);
    }
    run_checked(&mut cmd, "mysql")
        .with_context(|| format!("mysql restore of {} failed", sql_file_path.display()))?;

    tracing::info!(database = %conn.name, "MySQL restore finished");
    Ok(())
}
