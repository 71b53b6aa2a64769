// erpload/src/store/range.rs
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use tokio::runtime::Handle;

use super::RemoteStore;

/// Bytes fetched per range request; one buffer of this size is held at a time.
const READ_AHEAD: u64 = 1024 * 1024;

/// Range-addressable view of a remote file.
///
/// Zip archives can be inspected through this without downloading them: only
/// the central directory and the entry being read are fetched.
pub struct RemoteRangeReader {
    store: Arc<dyn RemoteStore>,
    path: String,
    size: u64,
    offset: u64,
    handle: Handle,
    buffer: Vec<u8>,
    buffer_start: u64,
}

impl RemoteRangeReader {
    pub fn new(store: Arc<dyn RemoteStore>, path: String, size: u64, handle: Handle) -> Self {
        Self {
            store,
            path,
            size,
            offset: 0,
            handle,
            buffer: Vec::new(),
            buffer_start: 0,
        }
    }

    fn buffered(&self) -> Option<&[u8]> {
        let end = self.buffer_start + self.buffer.len() as u64;
        if self.offset >= self.buffer_start && self.offset < end {
            let start = (self.offset - self.buffer_start) as usize;
            Some(&self.buffer[start..])
        } else {
            None
        }
    }

    fn fill(&mut self, wanted: usize) -> io::Result<()> {
        let remaining = self.size - self.offset;
        let len = (wanted as u64).max(READ_AHEAD).min(remaining);
        let store = self.store.clone();
        let path = self.path.clone();
        let offset = self.offset;
        let bytes = self
            .handle
            .block_on(async move { store.read_range(&path, offset, len).await })
            .map_err(|e| io::Error::other(e.to_string()))?;
        if (bytes.len() as u64) < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("wanted {} bytes, got {} bytes", len, bytes.len()),
            ));
        }
        self.buffer = bytes;
        self.buffer.truncate(len as usize);
        self.buffer_start = offset;
        Ok(())
    }
}

impl Read for RemoteRangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.offset >= self.size {
            return Ok(0);
        }
        if self.buffered().is_none() {
            self.fill(buf.len())?;
        }
        let available = self.buffered().unwrap_or_default();
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n as u64;
        Ok(n)
    }
}

impl Seek for RemoteRangeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
        };
        match target {
            Some(n) => {
                self.offset = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}
