// backuptool/src/backup/db_dump.rs
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::utils::databases::{ConnectionInfo, DumpOptions};
use crate::utils::{find_executable, run_checked};

/// Arguments for `pg_dump`, minus the output file.
///
/// Without a table filter the dump carries `--clean` so that it replaces the
/// target schema on restore. A table filter produces a data-only dump.
pub(crate) fn postgres_dump_args(conn: &ConnectionInfo, options: &DumpOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if let Some(user) = &conn.user {
        args.push(format!("--username={}", user).into());
    }
    if let Some(host) = &conn.host {
        args.push(format!("--host={}", host).into());
    }
    if let Some(port) = conn.port {
        args.push(format!("--port={}", port).into());
    }
    args.push("--no-password".into());

    if options.only_tables.is_empty() {
        args.push("--clean".into());
        args.push("--if-exists".into());
    } else {
        args.push("--data-only".into());
        for table in &options.only_tables {
            args.push("-t".into());
            args.push(table.into());
        }
    }
    for table in &options.exclude_tables {
        args.push(format!("--exclude-table-data={}", table).into());
    }
    args.push(conn.name.clone().into());
    args
}

/// Connection arguments shared by `mysqldump` and `mysql`.
///
/// The password is passed through `MYSQL_PWD`, never on the command line.
pub(crate) fn mysql_connection_args(conn: &ConnectionInfo) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if let Some(user) = &conn.user {
        args.push(format!("--user={}", user).into());
    }
    match (&conn.socket, &conn.host) {
        (Some(socket), _) => args.push(format!("--socket={}", socket).into()),
        (None, Some(host)) if host.starts_with('/') => {
            args.push(format!("--socket={}", host).into())
        }
        (None, Some(host)) => args.push(format!("--host={}", host).into()),
        (None, None) => {}
    }
    if let Some(port) = conn.port {
        args.push(format!("--port={}", port).into());
    }
    args
}

pub(crate) fn mysql_dump_args(conn: &ConnectionInfo, options: &DumpOptions) -> Vec<OsString> {
    let mut args = mysql_connection_args(conn);
    for table in &options.exclude_tables {
        args.push(format!("--ignore-table={}.{}", conn.name, table).into());
    }
    args.push(conn.name.clone().into());
    args
}

/// Dumps only the structure of the blacklisted tables.
pub(crate) fn mysql_structure_args(conn: &ConnectionInfo, tables: &[String]) -> Vec<OsString> {
    let mut args = mysql_connection_args(conn);
    args.push("--no-data".into());
    args.push(conn.name.clone().into());
    args.extend(tables.iter().map(OsString::from));
    args
}

/// Writes a plain SQL dump of a PostgreSQL database with `pg_dump`.
pub fn dump_postgres(
    conn: &ConnectionInfo,
    dump_binary: Option<&Path>,
    destination: &Path,
    options: &DumpOptions,
) -> Result<()> {
    let pg_dump = find_executable("pg_dump", dump_binary)?;
    tracing::info!(
        database = %conn.name,
        destination = %destination.display(),
        "Dumping PostgreSQL database"
    );

    let mut cmd = Command::new(&pg_dump);
    cmd.args(postgres_dump_args(conn, options)).arg("-f").arg(destination);
    if let Some(password) = &conn.password {
        cmd.env("PGPASSWORD", password);
    }
    run_checked(&mut cmd, "pg_dump")
        .with_context(|| format!("pg_dump for database {} failed", conn.name))?;

    tracing::info!(database = %conn.name, "PostgreSQL dump finished");
    Ok(())
}

/// Writes a MySQL dump with `mysqldump`.
///
/// Blacklisted tables are left out of the main dump and their structure is
/// appended by a second `--no-data` run.
pub fn dump_mysql(
    conn: &ConnectionInfo,
    dump_binary: Option<&Path>,
    destination: &Path,
    options: &DumpOptions,
) -> Result<()> {
    if !options.only_tables.is_empty() {
        anyhow::bail!("Backing up only certain tables is not implemented for MySQL");
    }
    let mysqldump = find_executable("mysqldump", dump_binary)?;
    tracing::info!(
        database = %conn.name,
        destination = %destination.display(),
        "Dumping MySQL database"
    );

    let out = File::create(destination)
        .with_context(|| format!("Failed to create dump file: {}", destination.display()))?;
    let mut cmd = Command::new(&mysqldump);
    cmd.args(mysql_dump_args(conn, options)).stdout(Stdio::from(out));
    if let Some(password) = &conn.password {
        cmd.env("MYSQL_PWD", password);
    }
    run_checked(&mut cmd, "mysqldump")
        .with_context(|| format!("mysqldump for database {} failed", conn.name))?;

    if !options.exclude_tables.is_empty() {
        tracing::info!(tables = ?options.exclude_tables, "Appending structure of blacklisted tables");
        let out = OpenOptions::new()
            .append(true)
            .open(destination)
            .with_context(|| format!("Failed to reopen dump file: {}", destination.display()))?;
        let mut cmd = Command::new(&mysqldump);
        cmd.args(mysql_structure_args(conn, &options.exclude_tables))
            .stdout(Stdio::from(out));
        if let Some(password) = &conn.password {
            cmd.env("MYSQL_PWD", password);
        }
        run_checked(&mut cmd, "mysqldump")
            .with_context(|| format!("mysqldump --no-data for database {} failed", conn.name))?;
    }

    tracing::info!(database = %conn.name, "MySQL dump finished");
    Ok(())
}
