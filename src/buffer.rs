//! Seekable staging buffer for member content
//!
//! A `MemberBuffer` keeps its bytes in memory until they grow past the spill
//! threshold, then rolls over to an anonymous temporary file. Either way it
//! behaves as a single seekable stream.

use std::io::{self, Read, Seek, SeekFrom, Write};
use tempfile::SpooledTempFile;

/// Default spill threshold (1 MiB)
pub const DEFAULT_SPILL_THRESHOLD: usize = 1024 * 1024;

/// Spooled byte store used to stage one member
#[derive(Debug)]
pub struct MemberBuffer {
    inner: SpooledTempFile,
}

impl MemberBuffer {
    /// Create an empty buffer that spills to disk above `threshold` bytes
    pub fn new(threshold: usize) -> Self {
        Self {
            inner: SpooledTempFile::new(threshold),
        }
    }

    /// Create a buffer holding `data`, positioned at offset 0
    pub fn with_contents(threshold: usize, data: &[u8]) -> io::Result<Self> {
        let mut buffer = Self::new(threshold);
        buffer.inner.write_all(data)?;
        buffer.rewind()?;
        Ok(buffer)
    }

    /// Read everything from the current position to the end
    pub fn read_rest(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.inner.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Whole content, leaving the position at the end
    pub fn contents(&mut self) -> io::Result<Vec<u8>> {
        self.rewind()?;
        self.read_rest()
    }

    /// Move to an absolute offset
    pub fn seek_to(&mut self, pos: u64) -> io::Result<u64> {
        self.inner.seek(SeekFrom::Start(pos))
    }

    pub fn rewind(&mut self) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(0)).map(|_| ())
    }

    /// Move to the end, returning the length
    pub fn seek_end(&mut self) -> io::Result<u64> {
        self.inner.seek(SeekFrom::End(0))
    }

    /// Current position
    pub fn tell(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }

    /// Total length; the position is preserved
    pub fn len(&mut self) -> io::Result<u64> {
        let pos = self.tell()?;
        let len = self.seek_end()?;
        self.seek_to(pos)?;
        Ok(len)
    }

    pub fn is_empty(&mut self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Cut the content at the current position
    pub fn truncate(&mut self) -> io::Result<()> {
        let pos = self.tell()?;
        self.inner.set_len(pos)
    }

    /// True once the content has rolled over to a temp file
    pub fn is_spilled(&self) -> bool {
        self.inner.is_rolled()
    }
}

impl Read for MemberBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for MemberBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for MemberBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}
