use super::{EntryKind, MemberInfo, StagedMember};
use crate::buffer::MemberBuffer;
use crate::config::TarCompression;
use crate::detect::{detect_bytes, Detected};
use crate::error::{ArchiveError, Result};
use bzip2::read::MultiBzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tar::{EntryType, Header};

/// Default permission bits for rewritten members
const MEMBER_MODE: u32 = 0o644;

/// Upper bound on read preallocation; sizes come from untrusted headers
const PREALLOC_LIMIT: u64 = 1024 * 1024;

/// Tar container adapter
///
/// Reads re-open the file in streaming mode on every call. Compression on
/// read is taken from the stream's magic bytes, so a tar written with
/// another compression still opens; writes always use the configured mode.
#[derive(Debug, Clone)]
pub struct TarBackend {
    path: PathBuf,
    compression: TarCompression,
}

impl TarBackend {
    pub fn new(path: &Path, compression: TarCompression) -> Self {
        Self {
            path: path.to_path_buf(),
            compression,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn compression(&self) -> TarCompression {
        self.compression
    }

    pub fn retarget(&self, path: &Path) -> Self {
        Self::new(path, self.compression)
    }

    /// Open the container for a single streaming pass
    ///
    /// A zero-length file is an empty container and yields `None`.
    fn open_stream(&self) -> Result<Option<tar::Archive<Box<dyn Read>>>> {
        let file = File::open(&self.path).map_err(|e| ArchiveError::path_io(&self.path, e))?;
        let mut reader = BufReader::new(file);

        let detected = {
            let head = reader
                .fill_buf()
                .map_err(|e| ArchiveError::path_io(&self.path, e))?;
            if head.is_empty() {
                return Ok(None);
            }
            detect_bytes(head)
        };

        let stream: Box<dyn Read> = match detected {
            Some(Detected::Tar(TarCompression::Gzip)) => Box::new(MultiGzDecoder::new(reader)),
            Some(Detected::Tar(TarCompression::Bzip2)) => Box::new(MultiBzDecoder::new(reader)),
            Some(Detected::Zip) => {
                return Err(ArchiveError::corrupt(
                    &self.path,
                    None,
                    "zip container opened as tar",
                ))
            }
            _ => Box::new(reader),
        };

        Ok(Some(tar::Archive::new(stream)))
    }

    /// Visit every entry in on-disk order until the visitor returns false
    fn scan<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&mut tar::Entry<'_, Box<dyn Read>>, String) -> Result<bool>,
    {
        let Some(mut archive) = self.open_stream()? else {
            return Ok(());
        };

        let entries = archive
            .entries()
            .map_err(|e| ArchiveError::corrupt(&self.path, None, e))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| ArchiveError::corrupt(&self.path, None, e))?;
            let name = entry
                .path()
                .map_err(|e| ArchiveError::corrupt(&self.path, None, e))?
                .to_string_lossy()
                .into_owned();
            if !visit(&mut entry, name)? {
                break;
            }
        }
        Ok(())
    }

    pub fn list_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        self.scan(|_, name| {
            names.push(name);
            Ok(true)
        })?;
        Ok(names)
    }

    pub fn members(&self) -> Result<Vec<MemberInfo>> {
        let mut infos = Vec::new();
        self.scan(|entry, name| {
            let header = entry.header();
            let kind = match header.entry_type() {
                EntryType::Regular | EntryType::Continuous => EntryKind::File,
                EntryType::Directory => EntryKind::Directory,
                EntryType::Symlink => EntryKind::Symlink,
                _ => EntryKind::Other,
            };
            infos.push(MemberInfo {
                name,
                size: entry.size(),
                mtime: header.mtime().ok(),
                mode: header.mode().ok(),
                kind,
                compressed_size: None,
                linkname: entry
                    .link_name_bytes()
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
                uid: header.uid().ok(),
                gid: header.gid().ok(),
                uname: owner_name(header.username()),
                gname: owner_name(header.groupname()),
            });
            Ok(true)
        })?;
        Ok(infos)
    }

    /// Read one member; the last entry wins when a name repeats
    pub fn read_member(&self, name: &str) -> Result<Vec<u8>> {
        let mut found = None;
        self.scan(|entry, entry_name| {
            if entry_name == name {
                let mut data = Vec::with_capacity(entry.size().min(PREALLOC_LIMIT) as usize);
                copy_entry(entry, &mut data)
                    .map_err(|e| ArchiveError::corrupt(&self.path, Some(name), e))?;
                found = Some(data);
            }
            Ok(true)
        })?;

        found.ok_or_else(|| ArchiveError::not_found(&self.path, name))
    }

    /// Stream the container once, buffering every wanted member
    pub fn read_members(
        &self,
        names: &HashSet<&str>,
        threshold: usize,
    ) -> Result<HashMap<String, MemberBuffer>> {
        let mut found = HashMap::with_capacity(names.len());
        self.scan(|entry, name| {
            if names.contains(name.as_str()) {
                let mut buffer = MemberBuffer::new(threshold);
                copy_entry(entry, &mut buffer)
                    .map_err(|e| ArchiveError::corrupt(&self.path, Some(name.as_str()), e))?;
                buffer
                    .rewind()
                    .map_err(|e| ArchiveError::member_io(&self.path, &name, e))?;
                // a repeated name replaces the earlier entry
                found.insert(name, buffer);
            }
            Ok(true)
        })?;
        Ok(found)
    }

    /// First member whose data cannot be read through
    ///
    /// Header checksums are checked while scanning; a bad header is a
    /// `CorruptContainer` error rather than a named member.
    pub fn verify(&self) -> Result<Option<String>> {
        let mut bad = None;
        self.scan(|entry, name| {
            if copy_entry(entry, &mut io::sink()).is_err() {
                bad = Some(name);
                return Ok(false);
            }
            Ok(true)
        })?;
        Ok(bad)
    }

    pub fn write_all<'a, I>(&self, members: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<StagedMember<'a>>>,
    {
        let file = File::create(&self.path).map_err(|e| ArchiveError::path_io(&self.path, e))?;
        let sink = TarSink::new(BufWriter::new(file), self.compression);
        let mut builder = tar::Builder::new(sink);

        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut count = 0;
        for member in members {
            let StagedMember { name, mut source } = member?;
            let buffer = source.buffer();
            let size = buffer
                .seek_end()
                .and_then(|size| buffer.rewind().map(|_| size))
                .map_err(|e| ArchiveError::member_io(&self.path, &name, e))?;

            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_size(size);
            header.set_mode(MEMBER_MODE);
            header.set_mtime(mtime);

            builder
                .append_data(&mut header, &name, buffer)
                .map_err(|e| ArchiveError::member_io(&self.path, &name, e))?;
            tracing::trace!(member = %name, size, "appended tar entry");
            count += 1;
        }

        let file = builder
            .into_inner()
            .and_then(TarSink::finish)
            .and_then(|writer| writer.into_inner().map_err(|e| e.into_error()))
            .map_err(|e| ArchiveError::path_io(&self.path, e))?;
        file.sync_all()
            .map_err(|e| ArchiveError::path_io(&self.path, e))?;

        tracing::debug!(path = %self.path.display(), members = count, compression = self.compression.code(), "wrote tar container");
        Ok(count)
    }
}

/// Copy an entry's data; a stream that ends before the declared size is an error
fn copy_entry<W: Write + ?Sized>(
    entry: &mut tar::Entry<'_, Box<dyn Read>>,
    out: &mut W,
) -> io::Result<u64> {
    let expected = entry.size();
    let copied = io::copy(entry, out)?;
    if copied != expected {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("entry data ends after {copied} of {expected} bytes"),
        ));
    }
    Ok(copied)
}

fn owner_name(name: std::result::Result<Option<&str>, std::str::Utf8Error>) -> Option<String> {
    name.ok()
        .flatten()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Output stream with the archive's whole-stream compression applied
enum TarSink<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Bzip2(BzEncoder<W>),
}

impl<W: Write> TarSink<W> {
    fn new(writer: W, compression: TarCompression) -> Self {
        match compression {
            TarCompression::None => TarSink::Plain(writer),
            TarCompression::Gzip => {
                TarSink::Gzip(GzEncoder::new(writer, flate2::Compression::default()))
            }
            TarCompression::Bzip2 => {
                TarSink::Bzip2(BzEncoder::new(writer, bzip2::Compression::default()))
            }
        }
    }

    fn finish(self) -> io::Result<W> {
        match self {
            TarSink::Plain(mut writer) => {
                writer.flush()?;
                Ok(writer)
            }
            TarSink::Gzip(encoder) => encoder.finish(),
            TarSink::Bzip2(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for TarSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TarSink::Plain(writer) => writer.write(buf),
            TarSink::Gzip(encoder) => encoder.write(buf),
            TarSink::Bzip2(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TarSink::Plain(writer) => writer.flush(),
            TarSink::Gzip(encoder) => encoder.flush(),
            TarSink::Bzip2(encoder) => encoder.flush(),
        }
    }
}
