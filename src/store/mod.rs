// erpload/src/store/mod.rs
pub(crate) mod local;
pub(crate) mod range;
pub(crate) mod s3;
pub(crate) mod webdav;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::RemoteStoreConfig;
use crate::errors::Result;
use crate::utils::progress::Reporter;

pub use range::RemoteRangeReader;

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Backend-specific path used for downloads and range reads.
    pub path: String,
    /// File name without directories.
    pub name: String,
    pub last_modified: DateTime<Utc>,
    pub size: Option<u64>,
}

/// Capability the restore engine needs from an archive store, whatever the
/// backend.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Lists the files (not directories) directly under `directory`.
    async fn list(&self, directory: &str) -> Result<Vec<RemoteFile>>;

    /// Downloads `path` in full to `destination`.
    async fn download(&self, path: &str, destination: &Path, reporter: &Reporter) -> Result<PathBuf>;

    /// Size in bytes, when the backend reports one.
    async fn size(&self, path: &str) -> Result<Option<u64>>;

    /// Reads exactly `len` bytes starting at `offset`.
    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// Whether `read_range` is served without fetching the whole file.
    async fn supports_range(&self, _path: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Opens `file` as a blocking, seekable reader backed by range requests.
///
/// Returns `None` when the size is unknown or the backend cannot serve byte
/// ranges; the caller should download the file instead. The reader must only
/// be used from a blocking context (`tokio::task::spawn_blocking`).
pub async fn open_for_streaming_read(
    store: Arc<dyn RemoteStore>,
    file: &RemoteFile,
) -> Result<Option<RemoteRangeReader>> {
    let size = match file.size.filter(|size| *size > 0) {
        Some(size) => Some(size),
        None => store.size(&file.path).await?.filter(|size| *size > 0),
    };
    let Some(size) = size else {
        return Ok(None);
    };
    if !store.supports_range(&file.path).await? {
        return Ok(None);
    }
    Ok(Some(RemoteRangeReader::new(
        store,
        file.path.clone(),
        size,
        tokio::runtime::Handle::current(),
    )))
}

/// Builds the backend selected in the configuration.
pub async fn from_config(config: &RemoteStoreConfig) -> Result<Arc<dyn RemoteStore>> {
    let store: Arc<dyn RemoteStore> = match config {
        RemoteStoreConfig::Webdav(cfg) => Arc::new(webdav::WebDavStore::new(cfg)?),
        RemoteStoreConfig::S3(cfg) => Arc::new(s3::S3Store::connect(cfg).await),
        RemoteStoreConfig::Local(cfg) => Arc::new(local::LocalStore::new(&cfg.root)),
    };
    tracing::debug!("using {} remote store", store.backend_name());
    Ok(store)
}

/// Last path component of a remote path.
pub fn file_name_of(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}
