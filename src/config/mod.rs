// backuptool/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::AppError;
use crate::retention::TieredPolicy;
use crate::utils::databases::{ConnectionInfo, DatabaseEngine};

pub const DEFAULT_BACKUP_DIR: &str = "./backups";
pub const DEFAULT_SFTP_PORT: u16 = 22;

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonRemoteConfig {
    Sftp {
        server: Option<String>,
        username: Option<String>,
        password: Option<String>,
        private_key: Option<PathBuf>,
        directory: Option<String>,
        restore_directory: Option<String>,
    },
    Spaces {
        bucket_name: Option<String>,
        region: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        endpoint_url: Option<String>,
        folder_prefix: Option<String>,
        restore_prefix: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub database_url: Option<String>,
    pub pg_dump_path: Option<PathBuf>,
    pub mysqldump_path: Option<PathBuf>,
    pub local_backup_dir: Option<PathBuf>,
    pub media_root: Option<PathBuf>,
    pub tables_blacklist: Option<Vec<String>>,
    pub remote: Option<JsonRemoteConfig>,
    pub database_copies: Option<BTreeMap<String, u32>>,
    pub media_copies: Option<BTreeMap<String, u32>>,
    pub notify_command: Option<PathBuf>,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub connection: ConnectionInfo,
    pub dump_binary: Option<PathBuf>,
    pub tables_blacklist: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SpacesConfig {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
}

#[derive(Debug, Clone)]
pub enum RemoteKind {
    Sftp(SftpConfig),
    Spaces(SpacesConfig),
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub kind: RemoteKind,
    /// Where backups are stored.
    pub directory: String,
    /// Where restore looks for backups.
    pub restore_directory: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: Option<DatabaseConfig>,
    pub local_backup_dir: PathBuf,
    pub media_root: Option<PathBuf>,
    pub remote: Option<RemoteConfig>,
    pub notify_command: Option<PathBuf>,
    database_copies: Option<BTreeMap<String, u32>>,
    media_copies: Option<BTreeMap<String, u32>>,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;
        Self::from_raw(raw_json_config)
    }

    pub fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let database = match raw.database_url.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(url) => {
                let connection = ConnectionInfo::from_url(url)
                    .context("database_url in config.json is not usable")?;
                let dump_binary = match connection.engine {
                    DatabaseEngine::Postgres => raw.pg_dump_path.clone(),
                    DatabaseEngine::Mysql => raw.mysqldump_path.clone(),
                };
                Some(DatabaseConfig {
                    connection,
                    dump_binary,
                    tables_blacklist: raw.tables_blacklist.clone().unwrap_or_default(),
                })
            }
            None => None,
        };

        let local_backup_dir = raw
            .local_backup_dir
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR));

        let remote = raw.remote.as_ref().map(load_remote_config).transpose()?;

        Ok(AppConfig {
            database,
            local_backup_dir,
            media_root: raw.media_root,
            remote,
            notify_command: raw.notify_command,
            database_copies: raw.database_copies,
            media_copies: raw.media_copies,
        })
    }

    pub fn database(&self) -> Result<&DatabaseConfig> {
        self.database
            .as_ref()
            .ok_or_else(|| AppError::Config("database_url must be set in config.json".into()).into())
    }

    pub fn remote(&self) -> Result<&RemoteConfig> {
        self.remote
            .as_ref()
            .ok_or_else(|| AppError::Config("remote must be configured in config.json".into()).into())
    }

    pub fn media_root(&self) -> Result<&Path> {
        self.media_root
            .as_deref()
            .ok_or_else(|| AppError::Config("media_root must be set in config.json".into()).into())
    }

    pub fn database_policy(&self) -> Result<TieredPolicy> {
        load_policy("database_copies", self.database_copies.as_ref())
    }

    pub fn media_policy(&self) -> Result<TieredPolicy> {
        load_policy("media_copies", self.media_copies.as_ref())
    }
}

fn load_policy(setting: &str, raw: Option<&BTreeMap<String, u32>>) -> Result<TieredPolicy> {
    let map = raw.ok_or_else(|| {
        AppError::Config(format!("cleaned nothing, because {} is missing", setting))
    })?;
    Ok(TieredPolicy::from_map(setting, map)?)
}

fn required(value: &Option<String>, key: &str) -> Result<String> {
    value
        .as_ref()
        .filter(|s| !s.trim().is_empty())
        .cloned()
        .ok_or_else(|| AppError::Config(format!("remote.{} must be set in config.json", key)).into())
}

fn load_remote_config(raw: &JsonRemoteConfig) -> Result<RemoteConfig> {
    match raw {
        JsonRemoteConfig::Sftp {
            server,
            username,
            password,
            private_key,
            directory,
            restore_directory,
        } => {
            let (host, port) = split_server(&required(server, "server")?)?;
            let username = required(username, "username")?;
            if password.is_none() && private_key.is_none() {
                return Err(AppError::Config(
                    "remote requires either a password or a private_key".into(),
                )
                .into());
            }
            let directory = absolute_remote_dir(directory.as_deref().unwrap_or(""), &username);
            let restore_directory = restore_directory
                .as_deref()
                .map(|d| absolute_remote_dir(d, &username))
                .unwrap_or_else(|| directory.clone());
            Ok(RemoteConfig {
                kind: RemoteKind::Sftp(SftpConfig {
                    host,
                    port,
                    username,
                    password: password.clone(),
                    private_key: private_key.clone(),
                }),
                directory,
                restore_directory,
            })
        }
        JsonRemoteConfig::Spaces {
            bucket_name,
            region,
            access_key_id,
            secret_access_key,
            endpoint_url,
            folder_prefix,
            restore_prefix,
        } => {
            let directory = folder_prefix
                .as_deref()
                .unwrap_or("")
                .trim_matches('/')
                .to_string();
            let restore_directory = restore_prefix
                .as_deref()
                .map(|p| p.trim_matches('/').to_string())
                .unwrap_or_else(|| directory.clone());
            Ok(RemoteConfig {
                kind: RemoteKind::Spaces(SpacesConfig {
                    bucket_name: required(bucket_name, "bucket_name")?,
                    region: required(region, "region")?,
                    access_key_id: required(access_key_id, "access_key_id")?,
                    secret_access_key: required(secret_access_key, "secret_access_key")?,
                    endpoint_url: required(endpoint_url, "endpoint_url")?,
                }),
                directory,
                restore_directory,
            })
        }
    }
}

/// Splits `host[:port]`, defaulting to port 22.
fn split_server(server: &str) -> Result<(String, u16)> {
    match server.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| AppError::Config(format!("Invalid port in remote.server: {}", server)))?;
            Ok((host.to_string(), port))
        }
        _ => Ok((server.to_string(), DEFAULT_SFTP_PORT)),
    }
}

/// Relative remote directories live under the user's home.
fn absolute_remote_dir(dir: &str, username: &str) -> String {
    if dir.starts_with('/') {
        dir.to_string()
    } else {
        format!("/home/{}/{}", username, dir)
    }
}
