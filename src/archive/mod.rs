// erpload/src/archive/mod.rs
//! Backup archive validation.
//!
//! A usable archive holds exactly one entry, the database dump. Anything else
//! (empty, several entries, unreadable container) is reported and rejected so
//! the caller can try an older candidate.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use tar::Archive;
use zip::ZipArchive;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }

    /// Zip archives can be inspected through range reads; tarballs have no
    /// central directory and must be fetched in full first.
    pub fn supports_streaming(self) -> bool {
        matches!(self, ArchiveKind::Zip)
    }
}

/// Name and uncompressed size of the single dump inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadInfo {
    pub name: String,
    pub size: u64,
}

/// Opens a fresh blocking reader over a payload.
pub trait PayloadSource: Send {
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>>;
}

/// A dump ready to be streamed into the engine.
pub struct Payload {
    pub name: String,
    /// Uncompressed size, if known. Used for progress only.
    pub size: Option<u64>,
    source: Box<dyn PayloadSource>,
}

impl Payload {
    pub fn new(name: impl Into<String>, size: Option<u64>, source: Box<dyn PayloadSource>) -> Self {
        Self {
            name: name.into(),
            size,
            source,
        }
    }

    /// A plain (not archived) dump file on disk.
    pub fn plain_file(path: &Path) -> Result<Self> {
        let size = std::fs::metadata(path)?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::InvalidInput(format!("not a file: {}", path.display())))?;
        Ok(Self::new(
            name,
            Some(size),
            Box::new(PlainFileSource {
                path: path.to_path_buf(),
            }),
        ))
    }

    pub fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        self.source.open()
    }
}

struct PlainFileSource {
    path: PathBuf,
}

impl PayloadSource for PlainFileSource {
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(&self.path)?))
    }
}

struct ZipEntrySource<R> {
    archive: ZipArchive<R>,
}

impl<R: Read + Seek + Send> PayloadSource for ZipEntrySource<R> {
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        let entry = self.archive.by_index(0).map_err(io::Error::other)?;
        Ok(Box::new(entry))
    }
}

struct TarGzEntrySource {
    path: PathBuf,
    archive: Option<Archive<GzDecoder<File>>>,
}

impl PayloadSource for TarGzEntrySource {
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        let file = File::open(&self.path)?;
        let archive = self.archive.insert(Archive::new(GzDecoder::new(file)));
        let mut entries = archive.entries()?;
        match entries.next() {
            Some(entry) => Ok(Box::new(entry?)),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} has no entries", self.path.display()),
            )),
        }
    }
}

/// An archive that passed validation, holding what is needed to stream its
/// payload later.
pub struct ValidatedArchive {
    pub info: PayloadInfo,
    source: Box<dyn PayloadSource>,
}

impl ValidatedArchive {
    pub fn into_payload(self) -> Payload {
        Payload::new(self.info.name, Some(self.info.size), self.source)
    }
}

fn check_entry_names(label: &str, names: &[String]) -> bool {
    match names.len() {
        0 => {
            tracing::warn!("{}: no files in archive", label);
            false
        }
        1 => true,
        _ => {
            tracing::warn!("{}: unexpected files in archive: {:?}", label, names);
            false
        }
    }
}

/// Validates a zip container read from any seekable source, local or remote.
pub fn validate_zip<R>(reader: R, label: &str) -> Option<ValidatedArchive>
where
    R: Read + Seek + Send + 'static,
{
    let mut archive = match ZipArchive::new(reader) {
        Ok(archive) => archive,
        Err(e) => {
            tracing::warn!("{}: unreadable zip archive: {}", label, e);
            return None;
        }
    };
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    if !check_entry_names(label, &names) {
        return None;
    }
    let info = match archive.by_index(0) {
        Ok(entry) => PayloadInfo {
            name: entry.name().to_string(),
            size: entry.size(),
        },
        Err(e) => {
            tracing::warn!("{}: cannot read archive entry: {}", label, e);
            return None;
        }
    };
    Some(ValidatedArchive {
        info,
        source: Box::new(ZipEntrySource { archive }),
    })
}

fn tar_gz_entries(path: &Path) -> io::Result<Vec<(String, u64)>> {
    let mut archive = Archive::new(GzDecoder::new(File::open(path)?));
    let mut entries = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        entries.push((name, entry.size()));
    }
    Ok(entries)
}

/// Validates a gzipped tarball that has been downloaded in full.
pub fn validate_tar_gz(path: &Path, label: &str) -> Option<ValidatedArchive> {
    let entries = match tar_gz_entries(path) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("{}: unreadable tar.gz archive: {}", label, e);
            return None;
        }
    };
    let names: Vec<String> = entries.iter().map(|(n, _)| n.clone()).collect();
    if !check_entry_names(label, &names) {
        return None;
    }
    let (name, size) = entries.into_iter().next()?;
    Some(ValidatedArchive {
        info: PayloadInfo { name, size },
        source: Box::new(TarGzEntrySource {
            path: path.to_path_buf(),
            archive: None,
        }),
    })
}

/// Validates an archive already present on the local file system.
pub fn validate_local(path: &Path, kind: ArchiveKind) -> Option<ValidatedArchive> {
    let label = path.display().to_string();
    match kind {
        ArchiveKind::Zip => match File::open(path) {
            Ok(file) => validate_zip(file, &label),
            Err(e) => {
                tracing::warn!("{}: cannot open archive: {}", label, e);
                None
            }
        },
        ArchiveKind::TarGz => validate_tar_gz(path, &label),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    pub(crate) fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn tar_gz_file(dir: &Path, entries: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join("backup.tar.gz");
        let enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(enc);
        for (name, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *body).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    #[test]
    fn kind_is_taken_from_extension() {
        assert_eq!(ArchiveKind::from_name("A-Mon.zip"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_name("A-Mon.ZIP"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_name("A-Mon.tar.gz"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_name("A-Mon.tgz"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_name("A-Mon.dump"), None);
    }

    #[test]
    fn single_entry_zip_yields_name_and_size() {
        let bytes = zip_bytes(&[("HQ_OCA-20161116-010203-A.dump", b"PGDMP-data")]);
        let validated = validate_zip(Cursor::new(bytes), "test").unwrap();
        assert_eq!(
            validated.info,
            PayloadInfo {
                name: "HQ_OCA-20161116-010203-A.dump".into(),
                size: 10
            }
        );

        let mut payload = validated.into_payload();
        let mut content = String::new();
        payload.open().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "PGDMP-data");
    }

    #[test]
    fn empty_or_ambiguous_zip_is_rejected() {
        assert!(validate_zip(Cursor::new(zip_bytes(&[])), "empty").is_none());
        let two = zip_bytes(&[("a.dump", b"a"), ("b.dump", b"b")]);
        assert!(validate_zip(Cursor::new(two), "two").is_none());
    }

    #[test]
    fn corrupt_zip_is_rejected_not_fatal() {
        assert!(validate_zip(Cursor::new(b"this is not a zip".to_vec()), "junk").is_none());
    }

    #[test]
    fn tar_gz_with_one_entry_validates_and_streams() {
        let dir = tempfile::tempdir().unwrap();
        let path = tar_gz_file(dir.path(), &[("X-20160831-220427-A.dump", b"0123456789abc")]);
        let validated = validate_local(&path, ArchiveKind::TarGz).unwrap();
        assert_eq!(validated.info.name, "X-20160831-220427-A.dump");
        assert_eq!(validated.info.size, 13);

        let mut payload = validated.into_payload();
        let mut content = Vec::new();
        payload.open().unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, b"0123456789abc");
    }

    #[test]
    fn tar_gz_with_two_entries_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = tar_gz_file(dir.path(), &[("a.dump", b"a"), ("b.dump", b"b")]);
        assert!(validate_local(&path, ArchiveKind::TarGz).is_none());
    }

    #[test]
    fn plain_dump_payload_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("X-20160831-220427.dump");
        std::fs::write(&path, b"dump").unwrap();
        let mut payload = Payload::plain_file(&path).unwrap();
        assert_eq!(payload.size, Some(4));
        assert_eq!(payload.name, "X-20160831-220427.dump");
        let mut content = Vec::new();
        payload.open().unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, b"dump");
    }
}
