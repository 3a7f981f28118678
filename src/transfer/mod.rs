// backuptool/src/transfer/mod.rs
//! Remote stores the backups are shipped to.

pub(crate) mod sftp;
pub(crate) mod spaces;

use anyhow::Result;
use std::path::Path;

use crate::config::{RemoteConfig, RemoteKind};
pub use sftp::SftpTransport;
pub use spaces::SpacesTransport;

/// File operations the orchestrators need from a remote store.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Names (not paths) of the entries directly inside `remote_dir`.
    async fn list(&self, remote_dir: &str) -> Result<Vec<String>>;
    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<()>;
    async fn get(&self, remote_path: &str, local_path: &Path) -> Result<()>;
    async fn remove(&self, remote_path: &str) -> Result<()>;
    /// Removes a file or a whole directory tree.
    async fn remove_all(&self, remote_path: &str) -> Result<()>;
    /// Creates `remote_dir`; an existing directory is not an error.
    async fn mkdir(&self, remote_dir: &str) -> Result<()>;
    async fn exists(&self, remote_path: &str) -> Result<bool>;
    async fn is_dir(&self, remote_path: &str) -> Result<bool>;
}

/// The configured remote, whichever kind it is.
pub enum RemoteStore {
    Sftp(SftpTransport),
    Spaces(SpacesTransport),
}

impl RemoteStore {
    pub async fn connect(remote: &RemoteConfig) -> Result<Self> {
        match &remote.kind {
            RemoteKind::Sftp(cfg) => Ok(RemoteStore::Sftp(SftpTransport::connect(cfg).await?)),
            RemoteKind::Spaces(cfg) => Ok(RemoteStore::Spaces(SpacesTransport::connect(cfg).await)),
        }
    }

    /// Shell access, which only SFTP remotes have.
    pub fn as_sftp(&self) -> Option<&SftpTransport> {
        match self {
            RemoteStore::Sftp(t) => Some(t),
            RemoteStore::Spaces(_) => None,
        }
    }
}

impl Transport for RemoteStore {
    async fn list(&self, remote_dir: &str) -> Result<Vec<String>> {
        match self {
            RemoteStore::Sftp(t) => t.list(remote_dir).await,
            RemoteStore::Spaces(t) => t.list(remote_dir).await,
        }
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        match self {
            RemoteStore::Sftp(t) => t.put(local_path, remote_path).await,
            RemoteStore::Spaces(t) => t.put(local_path, remote_path).await,
        }
    }

    async fn get(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        match self {
            RemoteStore::Sftp(t) => t.get(remote_path, local_path).await,
            RemoteStore::Spaces(t) => t.get(remote_path, local_path).await,
        }
    }

    async fn remove(&self, remote_path: &str) -> Result<()> {
        match self {
            RemoteStore::Sftp(t) => t.remove(remote_path).await,
            RemoteStore::Spaces(t) => t.remove(remote_path).await,
        }
    }

    async fn remove_all(&self, remote_path: &str) -> Result<()> {
        match self {
            RemoteStore::Sftp(t) => t.remove_all(remote_path).await,
            RemoteStore::Spaces(t) => t.remove_all(remote_path).await,
        }
    }

    async fn mkdir(&self, remote_dir: &str) -> Result<()> {
        match self {
            RemoteStore::Sftp(t) => t.mkdir(remote_dir).await,
            RemoteStore::Spaces(t) => t.mkdir(remote_dir).await,
        }
    }

    async fn exists(&self, remote_path: &str) -> Result<bool> {
        match self {
            RemoteStore::Sftp(t) => t.exists(remote_path).await,
            RemoteStore::Spaces(t) => t.exists(remote_path).await,
        }
    }

    async fn is_dir(&self, remote_path: &str) -> Result<bool> {
        match self {
            RemoteStore::Sftp(t) => t.is_dir(remote_path).await,
            RemoteStore::Spaces(t) => t.is_dir(remote_path).await,
        }
    }
}

/// Joins a remote directory and an entry name with `/`.
pub fn remote_join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}
