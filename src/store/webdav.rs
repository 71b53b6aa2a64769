// erpload/src/store/webdav.rs
//! WebDAV archive store (ownCloud / Nextcloud style servers).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, RANGE};
use reqwest::{Client, Method, StatusCode, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::{RemoteFile, RemoteStore, file_name_of};
use crate::config::WebDavConfig;
use crate::errors::{AppError, Result};
use crate::utils::progress::{ProgressMeter, Reporter};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop><d:getlastmodified/><d:getcontentlength/><d:resourcetype/></d:prop>
</d:propfind>"#;

pub struct WebDavStore {
    base_url: Url,
    username: String,
    password: String,
    http: Client,
}

impl WebDavStore {
    pub fn new(config: &WebDavConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(AppError::Config("WebDAV endpoint cannot be empty".into()));
        }
        let mut base_url = Url::parse(config.endpoint.trim())?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            http,
        })
    }

    /// Absolute server paths (as returned by PROPFIND) replace the endpoint
    /// path; relative ones are resolved below it.
    fn build_url(&self, path: &str) -> Result<Url> {
        if path.starts_with('/') {
            let mut url = self.base_url.clone();
            url.set_path(path);
            Ok(url)
        } else {
            Ok(self.base_url.join(path)?)
        }
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    fn check(status: StatusCode, what: &str, path: &str) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(AppError::Storage(format!("WebDAV {} {} returned {}", what, path, status)))
        }
    }
}

/// Parses a multistatus PROPFIND response into file entries, skipping
/// collections.
pub(crate) fn parse_propfind(xml: &str) -> Result<Vec<RemoteFile>> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| AppError::Storage(format!("unparsable PROPFIND response: {}", e)))?;
    let dav_ns = "DAV:";
    let mut files = Vec::new();

    for response in doc
        .descendants()
        .filter(|n| n.has_tag_name((dav_ns, "response")))
    {
        let href = response
            .descendants()
            .find(|n| n.has_tag_name((dav_ns, "href")))
            .and_then(|n| n.text())
            .unwrap_or_default();
        let is_collection = response
            .descendants()
            .any(|n| n.has_tag_name((dav_ns, "collection")));
        if href.is_empty() || href.ends_with('/') || is_collection {
            continue;
        }
        let path = urlencoding::decode(href)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| href.to_string());

        let Some(last_modified) = response
            .descendants()
            .find(|n| n.has_tag_name((dav_ns, "getlastmodified")))
            .and_then(|n| n.text())
            .and_then(|s| DateTime::parse_from_rfc2822(s.trim()).ok())
            .map(|dt| dt.with_timezone(&Utc))
        else {
            tracing::warn!("ignoring {}: no usable last-modified time", path);
            continue;
        };

        let size = response
            .descendants()
            .find(|n| n.has_tag_name((dav_ns, "getcontentlength")))
            .and_then(|n| n.text())
            .and_then(|s| s.trim().parse::<u64>().ok());

        files.push(RemoteFile {
            name: file_name_of(&path),
            path,
            last_modified,
            size,
        });
    }
    Ok(files)
}

/// `None` when the header is missing or unreadable.
fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

#[async_trait]
impl RemoteStore for WebDavStore {
    fn backend_name(&self) -> &'static str {
        "webdav"
    }

    async fn list(&self, directory: &str) -> Result<Vec<RemoteFile>> {
        let dir = format!("{}/", directory.trim_matches('/'));
        let url = self.build_url(&dir)?;
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| AppError::Storage(format!("invalid WebDAV method: {}", e)))?;
        let response = self
            .request(method, url)
            .header("Depth", "1")
            .header("Content-Type", "application/xml")
            .body(PROPFIND_BODY)
            .send()
            .await?;
        Self::check(response.status(), "PROPFIND", &dir)?;
        let xml = response.text().await?;
        parse_propfind(&xml)
    }

    async fn download(&self, path: &str, destination: &Path, reporter: &Reporter) -> Result<PathBuf> {
        let response = self.request(Method::GET, self.build_url(path)?).send().await?;
        Self::check(response.status(), "GET", path)?;

        let mut meter = ProgressMeter::new(reporter.clone(), "Downloaded", response.content_length());
        let mut output = File::create(destination).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            output.write_all(&chunk).await?;
            meter.advance(chunk.len());
        }
        output.flush().await?;
        meter.finish();
        Ok(destination.to_path_buf())
    }

    async fn size(&self, path: &str) -> Result<Option<u64>> {
        let response = self.request(Method::HEAD, self.build_url(path)?).send().await?;
        Self::check(response.status(), "HEAD", path)?;
        Ok(content_length(response.headers()))
    }

    async fn supports_range(&self, path: &str) -> Result<bool> {
        let response = self
            .request(Method::GET, self.build_url(path)?)
            .header(RANGE, "bytes=0-0")
            .send()
            .await?;
        Self::check(response.status(), "ranged GET", path)?;
        Ok(response.status() == StatusCode::PARTIAL_CONTENT)
    }

    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let end = offset + len - 1;
        let response = self
            .request(Method::GET, self.build_url(path)?)
            .header(RANGE, format!("bytes={}-{}", offset, end))
            .send()
            .await?;
        let status = response.status();
        Self::check(status, "ranged GET", path)?;
        // A server ignoring Range answers 200 with the whole body.
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(AppError::Storage(format!(
                "server ignored the byte range for {}",
                path
            )));
        }
        let bytes = response.bytes().await?;
        if (bytes.len() as u64) < len {
            return Err(AppError::Storage(format!(
                "wanted {} bytes of {}, got {} bytes",
                len,
                path,
                bytes.len()
            )));
        }
        Ok(bytes[..len as usize].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/remote.php/webdav/OCG_Backups/</d:href>
    <d:propstat><d:prop>
      <d:getlastmodified>Mon, 14 Mar 2016 03:31:40 GMT</d:getlastmodified>
      <d:resourcetype><d:collection/></d:resourcetype>
    </d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/webdav/OCG_Backups/OCG_SZ1_NHL-Wed.zip</d:href>
    <d:propstat><d:prop>
      <d:getlastmodified>Mon, 14 Mar 2016 03:31:40 GMT</d:getlastmodified>
      <d:getcontentlength>1024</d:getcontentlength>
      <d:resourcetype/>
    </d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/webdav/OCG_Backups/HQ%20OCA-Fri.zip</d:href>
    <d:propstat><d:prop>
      <d:getlastmodified>Fri, 11 Mar 2016 22:00:00 GMT</d:getlastmodified>
      <d:resourcetype/>
    </d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn propfind_skips_collections_and_decodes_hrefs() {
        let files = parse_propfind(LISTING).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "OCG_SZ1_NHL-Wed.zip");
        assert_eq!(files[0].size, Some(1024));
        assert_eq!(
            files[0].last_modified.to_rfc3339(),
            "2016-03-14T03:31:40+00:00"
        );
        assert_eq!(files[1].path, "/remote.php/webdav/OCG_Backups/HQ OCA-Fri.zip");
        assert_eq!(files[1].size, None);
    }

    #[test]
    fn missing_content_length_is_unknown() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length(&headers), None);
        headers.insert(CONTENT_LENGTH, "2048".parse().unwrap());
        assert_eq!(content_length(&headers), Some(2048));
    }

    #[test]
    fn garbage_listing_is_an_error() {
        assert!(parse_propfind("<not xml").is_err());
    }

    #[test]
    fn urls_resolve_against_endpoint() {
        let store = WebDavStore::new(&WebDavConfig {
            endpoint: "https://cloud.example.org/remote.php/webdav".into(),
            username: "u".into(),
            password: "p".into(),
        })
        .unwrap();
        assert_eq!(
            store.build_url("OCG_Backups/").unwrap().as_str(),
            "https://cloud.example.org/remote.php/webdav/OCG_Backups/"
        );
        assert_eq!(
            store
                .build_url("/remote.php/webdav/OCG_Backups/A-Mon.zip")
                .unwrap()
                .as_str(),
            "https://cloud.example.org/remote.php/webdav/OCG_Backups/A-Mon.zip"
        );
    }
}
