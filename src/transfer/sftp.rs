// backuptool/src/transfer/sftp.rs
use anyhow::{Context, Result};
use ssh2::Session;
use std::fs::File;
use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::Transport;
use crate::config::SftpConfig;
use crate::errors::AppError;

/// SFTP remote over an authenticated SSH session.
///
/// ssh2 is blocking, so every operation runs on the blocking thread pool with
/// a fresh SFTP channel.
pub struct SftpTransport {
    session: Arc<Session>,
    config: SftpConfig,
}

impl SftpTransport {
    pub async fn connect(config: &SftpConfig) -> Result<Self> {
        tracing::info!(host = %config.host, port = config.port, "Connecting to remote");
        let cfg = config.clone();
        let session = tokio::task::spawn_blocking(move || open_session(&cfg))
            .await
            .context("SSH connect task panicked")??;
        tracing::info!(host = %config.host, "Connected");
        Ok(Self {
            session: Arc::new(session),
            config: config.clone(),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || op(&session))
            .await
            .context("SFTP task panicked")?
    }

    /// Runs a shell command on the remote host and returns its stdout.
    pub async fn exec(&self, command: &str) -> Result<String> {
        let command = command.to_string();
        self.blocking(move |sess| exec_ssh(sess, &command)).await
    }

    /// `user@host:path`, the form rsync expects for a remote side.
    pub fn rsync_location(&self, remote_path: &str) -> String {
        format!("{}@{}:{}", self.config.username, self.config.host, remote_path)
    }

    /// The `-e` argument that makes rsync reach the same host and key.
    pub fn rsync_shell(&self) -> String {
        let mut shell = format!("ssh -p {}", self.config.port);
        if let Some(key) = &self.config.private_key {
            shell.push_str(&format!(" -i {}", shell_quote(&key.to_string_lossy())));
        }
        shell
    }
}

fn open_session(config: &SftpConfig) -> Result<Session> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
        AppError::Transport(format!("Cannot reach {}:{}: {}", config.host, config.port, e))
    })?;
    let mut sess = Session::new()?;
    sess.set_tcp_stream(tcp);
    sess.handshake()
        .map_err(|e| AppError::Transport(format!("SSH handshake failed: {}", e)))?;

    match (&config.private_key, &config.password) {
        (Some(key), passphrase) => sess
            .userauth_pubkey_file(&config.username, None, key, passphrase.as_deref())
            .map_err(|e| AppError::Transport(format!("SSH key authentication failed: {}", e)))?,
        (None, Some(password)) => sess
            .userauth_password(&config.username, password)
            .map_err(|e| AppError::Transport(format!("SSH authentication failed: {}", e)))?,
        (None, None) => {
            return Err(AppError::Config("remote requires either a password or a private_key".into()).into());
        }
    }

    if !sess.authenticated() {
        return Err(AppError::Transport("SSH authentication failed".into()).into());
    }
    Ok(sess)
}

fn exec_ssh(sess: &Session, command: &str) -> Result<String> {
    let mut channel = sess.channel_session()?;
    channel.exec(command)?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout)?;
    let mut stderr = String::new();
    channel.stderr().read_to_string(&mut stderr)?;
    channel.wait_close()?;

    let status = channel.exit_status()?;
    if status != 0 {
        return Err(AppError::ToolInvocation {
            tool: "remote shell".to_string(),
            status: status.to_string(),
            stderr: stderr.trim().to_string(),
        }
        .into());
    }
    Ok(stdout)
}

/// Single-quotes a value for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl Transport for SftpTransport {
    async fn list(&self, remote_dir: &str) -> Result<Vec<String>> {
        let dir = remote_dir.to_string();
        self.blocking(move |sess| {
            let sftp = sess.sftp()?;
            let entries = sftp.readdir(Path::new(&dir)).map_err(|_| {
                AppError::Transport(format!("Remote directory {} does not exist", dir))
            })?;
            Ok(entries
                .into_iter()
                .filter_map(|(path, _)| {
                    path.file_name()
                        .map(|n| n.to_string_lossy().trim().to_string())
                })
                .collect())
        })
        .await
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let local = local_path.to_path_buf();
        let remote = remote_path.to_string();
        self.blocking(move |sess| {
            let sftp = sess.sftp()?;
            let mut source = File::open(&local)
                .with_context(|| format!("Failed to open {} for upload", local.display()))?;
            let mut target = sftp
                .create(Path::new(&remote))
                .with_context(|| format!("Failed to create remote file {}", remote))?;
            std::io::copy(&mut source, &mut target)
                .with_context(|| format!("Failed to upload {} to {}", local.display(), remote))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let local: PathBuf = local_path.to_path_buf();
        let remote = remote_path.to_string();
        self.blocking(move |sess| {
            let sftp = sess.sftp()?;
            let mut source = sftp
                .open(Path::new(&remote))
                .map_err(|e| AppError::Transport(format!("Cannot open remote {}: {}", remote, e)))?;
            let mut target = File::create(&local)
                .with_context(|| format!("Failed to create {}", local.display()))?;
            std::io::copy(&mut source, &mut target)
                .with_context(|| format!("Failed to download {} to {}", remote, local.display()))?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, remote_path: &str) -> Result<()> {
        let remote = remote_path.to_string();
        self.blocking(move |sess| {
            sess.sftp()?
                .unlink(Path::new(&remote))
                .with_context(|| format!("Failed to remove remote file {}", remote))?;
            Ok(())
        })
        .await
    }

    async fn remove_all(&self, remote_path: &str) -> Result<()> {
        self.exec(&format!("rm -rf {}", shell_quote(remote_path)))
            .await
            .with_context(|| format!("Failed to remove remote path {}", remote_path))?;
        Ok(())
    }

    async fn mkdir(&self, remote_dir: &str) -> Result<()> {
        let dir = remote_dir.to_string();
        self.blocking(move |sess| {
            let sftp = sess.sftp()?;
            if let Err(e) = sftp.mkdir(Path::new(&dir), 0o755) {
                match sftp.stat(Path::new(&dir)) {
                    Ok(stat) if stat.is_dir() => {}
                    _ => {
                        return Err(AppError::Transport(format!(
                            "Cannot create remote directory {}: {}",
                            dir, e
                        ))
                        .into());
                    }
                }
            }
            Ok(())
        })
        .await
    }

    async fn exists(&self, remote_path: &str) -> Result<bool> {
        let remote = remote_path.to_string();
        self.blocking(move |sess| Ok(sess.sftp()?.stat(Path::new(&remote)).is_ok()))
            .await
    }

    async fn is_dir(&self, remote_path: &str) -> Result<bool> {
        let remote = remote_path.to_string();
        self.blocking(move |sess| {
            Ok(sess
                .sftp()?
                .stat(Path::new(&remote))
                .map(|stat| stat.is_dir())
                .unwrap_or(false))
        })
        .await
    }
}
