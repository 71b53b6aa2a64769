// erpload/src/store/local.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::{RemoteFile, RemoteStore};
use crate::errors::{AppError, Result};
use crate::utils::progress::{ProgressMeter, Reporter};

/// A directory tree on the local file system exposed as an archive store.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn list(&self, directory: &str) -> Result<Vec<RemoteFile>> {
        let dir = self.resolve(directory);
        let mut entries = fs::read_dir(&dir).await.map_err(|e| {
            AppError::Storage(format!("cannot list {}: {}", dir.display(), e))
        })?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = format!("{}/{}", directory.trim_end_matches('/'), name);
            files.push(RemoteFile {
                path: path.trim_start_matches('/').to_string(),
                name,
                last_modified: DateTime::<Utc>::from(metadata.modified()?),
                size: Some(metadata.len()),
            });
        }
        Ok(files)
    }

    async fn download(&self, path: &str, destination: &Path, reporter: &Reporter) -> Result<PathBuf> {
        let source = self.resolve(path);
        let mut input = File::open(&source).await.map_err(|e| {
            AppError::Storage(format!("cannot open {}: {}", source.display(), e))
        })?;
        let total = input.metadata().await?.len();
        let mut output = File::create(destination).await?;
        let mut meter = ProgressMeter::new(reporter.clone(), "Downloaded", Some(total));
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            output.write_all(&buf[..n]).await?;
            meter.advance(n);
        }
        output.flush().await?;
        meter.finish();
        Ok(destination.to_path_buf())
    }

    async fn size(&self, path: &str) -> Result<Option<u64>> {
        let metadata = fs::metadata(self.resolve(path)).await?;
        Ok(Some(metadata.len()))
    }

    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        let mut file = File::open(self.resolve(path)).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_files_but_not_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("OCG_Backups")).unwrap();
        std::fs::create_dir(dir.path().join("OCG_Backups/nested")).unwrap();
        std::fs::write(dir.path().join("OCG_Backups/HQ_OCA-Mon.zip"), b"zip").unwrap();

        let store = LocalStore::new(dir.path());
        let files = store.list("OCG_Backups").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "HQ_OCA-Mon.zip");
        assert_eq!(files[0].path, "OCG_Backups/HQ_OCA-Mon.zip");
        assert_eq!(files[0].size, Some(3));
    }

    #[tokio::test]
    async fn missing_directory_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        assert!(matches!(store.list("nope").await, Err(AppError::Storage(_))));
    }

    #[tokio::test]
    async fn download_and_range_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"0123456789").unwrap();
        let store = LocalStore::new(dir.path());

        assert_eq!(store.read_range("a.bin", 3, 4).await.unwrap(), b"3456");

        let dest = dir.path().join("copy.bin");
        store.download("a.bin", &dest, &Reporter::silent()).await.unwrap();
        assert_eq!(std::fs::read(dest).unwrap(), b"0123456789");
    }
}
