// backuptool/src/transfer/spaces.rs
use anyhow::{Context, Result};
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::Transport;
use crate::config::SpacesConfig;
use crate::errors::AppError;

/// S3-compatible object storage (DigitalOcean Spaces and friends).
///
/// Keys are treated as `/`-separated paths; "directories" are key prefixes.
pub struct SpacesTransport {
    client: s3::Client,
    bucket: String,
}

impl SpacesTransport {
    pub async fn connect(spaces_config: &SpacesConfig) -> Self {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&spaces_config.endpoint_url)
            .region(Region::new(spaces_config.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &spaces_config.access_key_id,
                &spaces_config.secret_access_key,
                None,
                None,
                "Static",
            ))
            .load()
            .await;

        tracing::info!(
            endpoint = %spaces_config.endpoint_url,
            bucket = %spaces_config.bucket_name,
            "Using object storage remote"
        );
        Self {
            client: s3::Client::new(&sdk_config),
            bucket: spaces_config.bucket_name.clone(),
        }
    }

    async fn keys_under(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                AppError::Transport(format!("Failed to list s3://{}/{}: {}", self.bucket, prefix, e))
            })?;
            keys.extend(page.contents().iter().filter_map(|o| o.key().map(str::to_string)));
        }
        Ok(keys)
    }
}

fn dir_prefix(remote_dir: &str) -> String {
    let dir = remote_dir.trim_matches('/');
    if dir.is_empty() {
        String::new()
    } else {
        format!("{}/", dir)
    }
}

fn object_key(remote_path: &str) -> &str {
    remote_path.trim_start_matches('/')
}

impl Transport for SpacesTransport {
    async fn list(&self, remote_dir: &str) -> Result<Vec<String>> {
        let prefix = dir_prefix(remote_dir);
        let mut names = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .delimiter("/")
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                AppError::Transport(format!("Failed to list s3://{}/{}: {}", self.bucket, prefix, e))
            })?;
            for object in page.contents() {
                if let Some(name) = object.key().and_then(|k| k.strip_prefix(&prefix)) {
                    if !name.is_empty() {
                        names.push(name.to_string());
                    }
                }
            }
            for common in page.common_prefixes() {
                if let Some(name) = common.prefix().and_then(|p| p.strip_prefix(&prefix)) {
                    names.push(name.trim_end_matches('/').to_string());
                }
            }
        }
        Ok(names)
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let key = object_key(remote_path);
        let body = ByteStream::from_path(local_path)
            .await
            .with_context(|| format!("Failed to create ByteStream from file: {}", local_path.display()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                AppError::Transport(format!(
                    "Failed to upload {} to s3://{}/{}: {}",
                    local_path.display(),
                    self.bucket,
                    key,
                    e
                ))
            })?;
        Ok(())
    }

    async fn get(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let key = object_key(remote_path);
        let mut object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                AppError::Transport(format!("Failed to get object s3://{}/{}: {}", self.bucket, key, e))
            })?;

        let mut output_file = File::create(local_path)
            .await
            .with_context(|| format!("Failed to create destination file: {}", local_path.display()))?;

        while let Some(chunk) = object
            .body
            .try_next()
            .await
            .with_context(|| format!("Failed reading s3://{}/{}", self.bucket, key))?
        {
            output_file
                .write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write to {}", local_path.display()))?;
        }
        output_file.flush().await?;
        Ok(())
    }

    async fn remove(&self, remote_path: &str) -> Result<()> {
        let key = object_key(remote_path);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                AppError::Transport(format!("Failed to delete s3://{}/{}: {}", self.bucket, key, e))
            })?;
        Ok(())
    }

    async fn remove_all(&self, remote_path: &str) -> Result<()> {
        for key in self.keys_under(&dir_prefix(remote_path)).await? {
            self.remove(&key).await?;
        }
        if self.exists(remote_path).await? {
            self.remove(remote_path).await?;
        }
        Ok(())
    }

    // Object stores have no directories.
    async fn mkdir(&self, _remote_dir: &str) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, remote_path: &str) -> Result<bool> {
        let key = object_key(remote_path);
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(_) => self.is_dir(remote_path).await,
        }
    }

    async fn is_dir(&self, remote_path: &str) -> Result<bool> {
        let prefix = dir_prefix(remote_path);
        let listing = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| {
                AppError::Transport(format!("Failed to list s3://{}/{}: {}", self.bucket, prefix, e))
            })?;
        Ok(!listing.contents().is_empty())
    }
}
