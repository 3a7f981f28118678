// backuptool/src/utils/databases.rs
use anyhow::{Context, Result};
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use url::Url;

use crate::backup::db_dump;
use crate::errors::AppError;
use crate::restore::db_restore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseEngine {
    Postgres,
    Mysql,
}

/// Connection details extracted from `database_url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub engine: DatabaseEngine,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub name: String,
    /// MySQL unix socket, given as `?socket=/path`.
    pub socket: Option<String>,
}

impl ConnectionInfo {
    pub fn from_url(database_url: &str) -> Result<Self> {
        let parsed = Url::parse(database_url)
            .with_context(|| format!("Invalid database URL format: {}", redact(database_url)))?;

        let engine = match parsed.scheme() {
            "postgres" | "postgresql" => DatabaseEngine::Postgres,
            "mysql" => DatabaseEngine::Mysql,
            other => {
                return Err(AppError::Config(format!(
                    "Backup of '{}' databases is not implemented",
                    other
                ))
                .into());
            }
        };

        let name = parsed.path().trim_start_matches('/').to_string();
        if name.is_empty() {
            return Err(AppError::Config(format!(
                "Database name not found in URL path: {}",
                redact(database_url)
            ))
            .into());
        }

        let user = Some(decode(parsed.username())).filter(|u| !u.is_empty());
        let password = parsed.password().map(decode);
        let socket = parsed
            .query_pairs()
            .find(|(k, _)| k == "socket")
            .map(|(_, v)| v.into_owned());

        Ok(ConnectionInfo {
            engine,
            host: parsed.host_str().filter(|h| !h.is_empty()).map(str::to_string),
            port: parsed.port(),
            user,
            password,
            name,
            socket,
        })
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Strips the password before a URL ends up in a log line or error.
pub fn redact(database_url: &str) -> String {
    match Url::parse(database_url) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("***"));
            url.to_string()
        }
        _ => database_url.to_string(),
    }
}

/// Which tables a dump should cover.
#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    /// Tables whose data is skipped; their structure is still dumped.
    pub exclude_tables: Vec<String>,
    /// When set, only the data of these tables (PostgreSQL patterns) is dumped.
    pub only_tables: Vec<String>,
}

/// Produces and consumes opaque database dumps.
pub trait DumpEngine {
    fn dump(&self, destination: &Path, options: &DumpOptions) -> Result<()>;
    fn restore(&self, source: &Path) -> Result<()>;
}

/// Dump engine that shells out to the database's own client tools.
#[derive(Debug, Clone)]
pub struct CommandDumpEngine {
    conn: ConnectionInfo,
    dump_binary: Option<PathBuf>,
}

impl CommandDumpEngine {
    pub fn new(conn: ConnectionInfo, dump_binary: Option<PathBuf>) -> Self {
        Self { conn, dump_binary }
    }
}

impl DumpEngine for CommandDumpEngine {
    fn dump(&self, destination: &Path, options: &DumpOptions) -> Result<()> {
        match self.conn.engine {
            DatabaseEngine::Postgres => {
                db_dump::dump_postgres(&self.conn, self.dump_binary.as_deref(), destination, options)
            }
            DatabaseEngine::Mysql => {
                db_dump::dump_mysql(&self.conn, self.dump_binary.as_deref(), destination, options)
            }
        }
    }

    fn restore(&self, source: &Path) -> Result<()> {
        match self.conn.engine {
            DatabaseEngine::Postgres => db_restore::restore_postgres(&self.conn, source),
            DatabaseEngine::Mysql => db_restore::restore_mysql(&self.conn, source),
        }
    }
}
