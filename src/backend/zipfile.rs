use super::{EntryKind, MemberInfo, StagedMember};
use crate::buffer::MemberBuffer;
use crate::config::ZipCompression;
use crate::error::{ArchiveError, Result};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{AesMode, CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// Permission bits recorded for rewritten members
const MEMBER_MODE: u32 = 0o644;

/// Upper bound on read preallocation; sizes come from untrusted headers
const PREALLOC_LIMIT: u64 = 1024 * 1024;

/// Largest member size that fits without zip64 records
const ZIP32_LIMIT: u64 = u32::MAX as u64;

/// Zip container adapter
///
/// Lookups go through the central directory. The password, when set, is
/// used to decrypt on read and to encrypt every member on write; it is
/// never checked against existing content up front.
#[derive(Clone)]
pub struct ZipBackend {
    path: PathBuf,
    compression: ZipCompression,
    password: Option<String>,
    allow_zip64: bool,
}

impl std::fmt::Debug for ZipBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipBackend")
            .field("path", &self.path)
            .field("compression", &self.compression)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("allow_zip64", &self.allow_zip64)
            .finish()
    }
}

impl ZipBackend {
    pub fn new(path: &Path, compression: ZipCompression) -> Self {
        Self {
            path: path.to_path_buf(),
            compression,
            password: None,
            allow_zip64: false,
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn with_zip64(mut self, allow: bool) -> Self {
        self.allow_zip64 = allow;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn retarget(&self, path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            ..self.clone()
        }
    }

    fn method(&self) -> CompressionMethod {
        match self.compression {
            ZipCompression::Stored => CompressionMethod::Stored,
            ZipCompression::Deflate => CompressionMethod::Deflated,
            ZipCompression::Bzip2 => CompressionMethod::Bzip2,
        }
    }

    fn zip_error(&self, member: Option<&str>, err: ZipError) -> ArchiveError {
        match (err, member) {
            (ZipError::FileNotFound, Some(name)) => ArchiveError::not_found(&self.path, name),
            (ZipError::Io(e), Some(name)) => ArchiveError::member_io(&self.path, name, e),
            (ZipError::Io(e), None) => ArchiveError::path_io(&self.path, e),
            (other, member) => ArchiveError::corrupt(&self.path, member, other),
        }
    }

    /// Open the central directory; a zero-length file has none
    fn open_archive(&self) -> Result<Option<ZipArchive<BufReader<File>>>> {
        let file = File::open(&self.path).map_err(|e| ArchiveError::path_io(&self.path, e))?;
        let len = file
            .metadata()
            .map_err(|e| ArchiveError::path_io(&self.path, e))?
            .len();
        if len == 0 {
            return Ok(None);
        }

        ZipArchive::new(BufReader::new(file))
            .map(Some)
            .map_err(|e| self.zip_error(None, e))
    }

    pub fn list_names(&self) -> Result<Vec<String>> {
        Ok(self
            .members()?
            .into_iter()
            .map(|info| info.name)
            .collect())
    }

    pub fn members(&self) -> Result<Vec<MemberInfo>> {
        let Some(mut archive) = self.open_archive()? else {
            return Ok(Vec::new());
        };

        let mut infos = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive
                .by_index_raw(index)
                .map_err(|e| self.zip_error(None, e))?;
            infos.push(MemberInfo {
                name: entry.name().to_string(),
                size: entry.size(),
                mtime: entry.last_modified().map(unix_seconds),
                mode: entry.unix_mode(),
                kind: if entry.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                compressed_size: Some(entry.compressed_size()),
                linkname: None,
                uid: None,
                gid: None,
                uname: None,
                gname: None,
            });
        }
        Ok(infos)
    }

    pub fn read_member(&self, name: &str) -> Result<Vec<u8>> {
        let Some(mut archive) = self.open_archive()? else {
            return Err(ArchiveError::not_found(&self.path, name));
        };

        let entry = match &self.password {
            Some(password) => archive.by_name_decrypt(name, password.as_bytes()),
            None => archive.by_name(name),
        };
        let mut entry = entry.map_err(|e| self.zip_error(Some(name), e))?;

        let mut data = Vec::with_capacity(entry.size().min(PREALLOC_LIMIT) as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| ArchiveError::corrupt(&self.path, Some(name), e))?;
        Ok(data)
    }

    /// Buffer every wanted member with one open of the central directory
    pub fn read_members(
        &self,
        names: &HashSet<&str>,
        threshold: usize,
    ) -> Result<HashMap<String, MemberBuffer>> {
        let mut found = HashMap::with_capacity(names.len());
        let Some(mut archive) = self.open_archive()? else {
            return Ok(found);
        };

        for &name in names {
            let entry = match &self.password {
                Some(password) => archive.by_name_decrypt(name, password.as_bytes()),
                None => archive.by_name(name),
            };
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(ZipError::FileNotFound) => continue,
                Err(e) => return Err(self.zip_error(Some(name), e)),
            };

            let mut buffer = MemberBuffer::new(threshold);
            io::copy(&mut entry, &mut buffer)
                .map_err(|e| ArchiveError::corrupt(&self.path, Some(name), e))?;
            buffer
                .rewind()
                .map_err(|e| ArchiveError::member_io(&self.path, name, e))?;
            found.insert(name.to_string(), buffer);
        }
        Ok(found)
    }

    /// First member that fails to decrypt, decompress or match its CRC
    pub fn verify(&self) -> Result<Option<String>> {
        let Some(mut archive) = self.open_archive()? else {
            return Ok(None);
        };

        for index in 0..archive.len() {
            let name = archive
                .by_index_raw(index)
                .map_err(|e| self.zip_error(None, e))?
                .name()
                .to_string();
            let entry = match &self.password {
                Some(password) => archive.by_index_decrypt(index, password.as_bytes()),
                None => archive.by_index(index),
            };
            let intact = match entry {
                Ok(mut entry) => io::copy(&mut entry, &mut io::sink()).is_ok(),
                Err(_) => false,
            };
            if !intact {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    pub fn write_all<'a, I>(&self, members: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<StagedMember<'a>>>,
    {
        let file = File::create(&self.path).map_err(|e| ArchiveError::path_io(&self.path, e))?;
        let mut writer = ZipWriter::new(BufWriter::new(file));

        let mut count = 0;
        for member in members {
            let StagedMember { name, mut source } = member?;
            let buffer = source.buffer();
            let size = buffer
                .seek_end()
                .and_then(|size| buffer.rewind().map(|_| size))
                .map_err(|e| ArchiveError::member_io(&self.path, &name, e))?;

            if size > ZIP32_LIMIT && !self.allow_zip64 {
                return Err(ArchiveError::ConfigError(format!(
                    "member {name} is {size} bytes; enable allow_zip64 to store it"
                )));
            }

            let options = SimpleFileOptions::default()
                .compression_method(self.method())
                .unix_permissions(MEMBER_MODE)
                .large_file(size > ZIP32_LIMIT);
            let started = match &self.password {
                Some(password) => writer.start_file(
                    name.as_str(),
                    options.with_aes_encryption(AesMode::Aes256, password),
                ),
                None => writer.start_file(name.as_str(), options),
            };
            started.map_err(|e| self.zip_error(Some(&name), e))?;

            io::copy(buffer, &mut writer)
                .map_err(|e| ArchiveError::member_io(&self.path, &name, e))?;
            tracing::trace!(member = %name, size, "appended zip entry");
            count += 1;
        }

        let file = writer
            .finish()
            .map_err(|e| self.zip_error(None, e))?
            .into_inner()
            .map_err(|e| ArchiveError::path_io(&self.path, e.into_error()))?;
        file.sync_all()
            .map_err(|e| ArchiveError::path_io(&self.path, e))?;

        tracing::debug!(path = %self.path.display(), members = count, encrypted = self.password.is_some(), "wrote zip container");
        Ok(count)
    }
}

/// DOS timestamps carry no zone; they are read as UTC
fn unix_seconds(stamp: DateTime) -> u64 {
    let (year, month, day) = (
        i64::from(stamp.year()),
        i64::from(stamp.month()),
        i64::from(stamp.day()),
    );

    // days since 1970-01-01 in the proleptic Gregorian calendar
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe - 719_468;

    let secs = days * 86_400
        + i64::from(stamp.hour()) * 3_600
        + i64::from(stamp.minute()) * 60
        + i64::from(stamp.second());
    u64::try_from(secs).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Staged;

    fn member(name: &str, data: &[u8]) -> Result<StagedMember<'static>> {
        Ok(StagedMember {
            name: name.to_string(),
            source: Staged::Fresh(MemberBuffer::with_contents(1024, data)?),
        })
    }

    #[test]
    fn test_compression_codes_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let text = b"compressible text ".repeat(200);

        for compression in [
            ZipCompression::Stored,
            ZipCompression::Deflate,
            ZipCompression::Bzip2,
        ] {
            let path = dir.path().join(format!("{compression:?}.zip"));
            let backend = ZipBackend::new(&path, compression);
            backend.write_all(vec![member("text.txt", &text)])?;

            assert_eq!(backend.read_member("text.txt")?, text);
            let info = &backend.members()?[0];
            assert_eq!(info.size, text.len() as u64);
            match compression {
                ZipCompression::Stored => assert_eq!(info.compressed_size, Some(info.size)),
                _ => assert!(info.compressed_size.unwrap() < info.size),
            }
        }
        Ok(())
    }

    #[test]
    fn test_password_applies_on_write_and_read() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("secret.zip");
        let backend = ZipBackend::new(&path, ZipCompression::Deflate)
            .with_password(Some("correct horse".to_string()));
        backend.write_all(vec![member("key.txt", b"s3cr3t")])?;

        assert_eq!(backend.read_member("key.txt")?, b"s3cr3t");

        // listing works without the password; reading does not
        let locked = ZipBackend::new(&path, ZipCompression::Deflate);
        assert_eq!(locked.list_names()?, vec!["key.txt"]);
        assert!(locked.read_member("key.txt").is_err());
        Ok(())
    }

    #[test]
    fn test_empty_container() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.zip");
        let backend = ZipBackend::new(&path, ZipCompression::Deflate);

        backend.write_all(std::iter::empty::<Result<StagedMember<'_>>>())?;
        assert!(std::fs::metadata(&path)?.len() > 0);
        assert!(backend.list_names()?.is_empty());

        File::create(&path)?;
        assert!(backend.list_names()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_garbage_is_corrupt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("garbage.zip");
        std::fs::write(&path, b"this is not a zip file at all")?;

        let backend = ZipBackend::new(&path, ZipCompression::Deflate);
        assert!(matches!(
            backend.list_names(),
            Err(ArchiveError::CorruptContainer { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_dos_time_to_unix() {
        let epoch_2000 = DateTime::from_date_and_time(2000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(unix_seconds(epoch_2000), 946_684_800);

        let leap_day = DateTime::from_date_and_time(2024, 2, 29, 12, 30, 10).unwrap();
        assert_eq!(unix_seconds(leap_day), 1_709_209_810);
    }

    #[test]
    fn test_verify_finds_damaged_member() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("damaged.zip");
        let payload = b"payload that will be damaged on disk";
        let backend = ZipBackend::new(&path, ZipCompression::Stored);
        backend.write_all(vec![member("fine.txt", b"ok"), member("bad.txt", payload)])?;
        assert_eq!(backend.verify()?, None);

        let mut bytes = std::fs::read(&path)?;
        let at = bytes
            .windows(payload.len())
            .position(|window| window == payload)
            .unwrap();
        bytes[at] ^= 0xff;
        std::fs::write(&path, bytes)?;

        assert_eq!(backend.verify()?, Some("bad.txt".to_string()));
        Ok(())
    }

    #[test]
    fn test_debug_hides_password() {
        let backend = ZipBackend::new(Path::new("a.zip"), ZipCompression::Deflate)
            .with_password(Some("hunter2".to_string()));
        let shown = format!("{backend:?}");
        assert!(!shown.contains("hunter2"));
    }
}
