use crate::buffer::MemberBuffer;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Borrowed read handle on a member buffer owned by an [`Archive`](crate::Archive)
///
/// The handle holds a mutable borrow of the archive, so it cannot outlive it
/// and no other member operation can run while it is alive.
#[derive(Debug)]
pub struct MemberReader<'a> {
    name: String,
    buffer: &'a mut MemberBuffer,
}

impl<'a> MemberReader<'a> {
    pub(crate) fn new(name: &str, buffer: &'a mut MemberBuffer) -> Self {
        Self {
            name: name.to_string(),
            buffer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read from the current position to the end
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        self.buffer.read_rest()
    }

    pub fn len(&mut self) -> io::Result<u64> {
        self.buffer.len()
    }

    pub fn is_empty(&mut self) -> io::Result<bool> {
        self.buffer.is_empty()
    }

    pub fn tell(&mut self) -> io::Result<u64> {
        self.buffer.tell()
    }
}

impl Read for MemberReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.buffer.read(buf)
    }
}

impl Seek for MemberReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.buffer.seek(pos)
    }
}

/// Borrowed write handle on a pending member buffer
#[derive(Debug)]
pub struct MemberWriter<'a> {
    name: String,
    buffer: &'a mut MemberBuffer,
}

impl<'a> MemberWriter<'a> {
    pub(crate) fn new(name: &str, buffer: &'a mut MemberBuffer) -> Self {
        Self {
            name: name.to_string(),
            buffer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop everything after the current position
    pub fn truncate(&mut self) -> io::Result<()> {
        self.buffer.truncate()
    }

    pub fn len(&mut self) -> io::Result<u64> {
        self.buffer.len()
    }

    pub fn is_empty(&mut self) -> io::Result<bool> {
        self.buffer.is_empty()
    }

    pub fn tell(&mut self) -> io::Result<u64> {
        self.buffer.tell()
    }

    /// Move to the end, for appending
    pub fn seek_end(&mut self) -> io::Result<u64> {
        self.buffer.seek_end()
    }
}

impl Write for MemberWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.buffer.flush()
    }
}

impl Seek for MemberWriter<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.buffer.seek(pos)
    }
}
