// erpload/src/store/s3.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use aws_sdk_s3::error::DisplayErrorContext;
use chrono::{DateTime, Utc};
use s3::config::Region;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::{RemoteFile, RemoteStore, file_name_of};
use crate::config::S3StorageConfig;
use crate::errors::{AppError, Result};
use crate::utils::progress::{ProgressMeter, Reporter};

/// S3-compatible object storage (AWS, DigitalOcean Spaces, MinIO).
pub struct S3Store {
    client: s3::Client,
    bucket: String,
    folder_prefix: Option<String>,
}

fn storage_error<E: std::error::Error>(what: &str, key: &str, err: E) -> AppError {
    AppError::Storage(format!("{} s3 object {}: {}", what, key, DisplayErrorContext(err)))
}

impl S3Store {
    pub async fn connect(config: &S3StorageConfig) -> Self {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None,
                None,
                "Static",
            ))
            .load()
            .await;

        Self {
            client: s3::Client::new(&sdk_config),
            bucket: config.bucket_name.clone(),
            folder_prefix: config
                .folder_prefix
                .as_ref()
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
        }
    }

    fn directory_prefix(&self, directory: &str) -> String {
        let directory = directory.trim_matches('/');
        match (&self.folder_prefix, directory.is_empty()) {
            (Some(prefix), true) => format!("{}/", prefix),
            (Some(prefix), false) => format!("{}/{}/", prefix, directory),
            (None, true) => String::new(),
            (None, false) => format!("{}/", directory),
        }
    }
}

#[async_trait]
impl RemoteStore for S3Store {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn list(&self, directory: &str) -> Result<Vec<RemoteFile>> {
        let prefix = self.directory_prefix(directory);
        let mut files = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/")
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| storage_error("listing", &prefix, e))?;

            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                if key.ends_with('/') {
                    continue;
                }
                let Some(last_modified) = object
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
                else {
                    tracing::warn!("ignoring s3://{}/{}: no last-modified time", self.bucket, key);
                    continue;
                };
                files.push(RemoteFile {
                    path: key.to_string(),
                    name: file_name_of(key),
                    last_modified,
                    size: object.size().and_then(|s| u64::try_from(s).ok()),
                });
            }

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }
        Ok(files)
    }

    async fn download(&self, path: &str, destination: &Path, reporter: &Reporter) -> Result<PathBuf> {
        reporter.say(format!(
            "Downloading s3://{}/{} to {}",
            self.bucket,
            path,
            destination.display()
        ));
        let mut object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| storage_error("downloading", path, e))?;

        let total = object.content_length().and_then(|l| u64::try_from(l).ok());
        let mut meter = ProgressMeter::new(reporter.clone(), "Downloaded", total);
        let mut output_file = File::create(destination).await?;
        while let Some(bytes_chunk) = object
            .body
            .try_next()
            .await
            .map_err(|e| storage_error("reading", path, e))?
        {
            output_file.write_all(&bytes_chunk).await?;
            meter.advance(bytes_chunk.len());
        }
        output_file.flush().await?;
        meter.finish();
        Ok(destination.to_path_buf())
    }

    async fn size(&self, path: &str) -> Result<Option<u64>> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| storage_error("inspecting", path, e))?;
        Ok(head.content_length().and_then(|l| u64::try_from(l).ok()))
    }

    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .range(format!("bytes={}-{}", offset, offset + len - 1))
            .send()
            .await
            .map_err(|e| storage_error("reading range of", path, e))?;
        let bytes = object
            .body
            .collect()
            .await
            .map_err(|e| storage_error("reading range of", path, e))?
            .into_bytes();
        Ok(bytes.to_vec())
    }
}
