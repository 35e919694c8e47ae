//! Container format sniffing
//!
//! Picks the backend kind and, for tar, the whole-stream compression. Magic
//! bytes of an existing non-empty file win; the file extension is the
//! fallback for new or empty files.

use crate::config::{Format, TarCompression};
use crate::error::{ArchiveError, Result};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const ZIP_LOCAL_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const USTAR_OFFSET: usize = 257;
const USTAR_MAGIC: &[u8] = b"ustar";
/// A tar holding no entries is nothing but zero-filled blocks
const TAR_BLOCK: usize = 512;

/// Result of sniffing a container path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detected {
    Tar(TarCompression),
    Zip,
}

impl Detected {
    pub fn format(self) -> Format {
        match self {
            Detected::Tar(_) => Format::Tar,
            Detected::Zip => Format::Zip,
        }
    }
}

/// Sniff a path by content, then by extension
pub fn detect(path: &Path) -> Result<Option<Detected>> {
    if let Some(found) = detect_content(path)? {
        return Ok(Some(found));
    }
    Ok(detect_extension(path))
}

/// Sniff the leading bytes of an existing file
///
/// Returns `None` for a missing or empty file, or when nothing matches.
pub fn detect_content(path: &Path) -> Result<Option<Detected>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ArchiveError::path_io(path, e)),
    };

    let mut head = Vec::with_capacity(TAR_BLOCK);
    (&mut file)
        .take(TAR_BLOCK as u64)
        .read_to_end(&mut head)
        .map_err(|e| ArchiveError::path_io(path, e))?;

    Ok(detect_bytes(&head))
}

/// Sniff a byte prefix
pub fn detect_bytes(head: &[u8]) -> Option<Detected> {
    if head.starts_with(ZIP_LOCAL_MAGIC) || head.starts_with(ZIP_EMPTY_MAGIC) {
        return Some(Detected::Zip);
    }
    if head.starts_with(GZIP_MAGIC) {
        return Some(Detected::Tar(TarCompression::Gzip));
    }
    if head.starts_with(BZIP2_MAGIC) {
        return Some(Detected::Tar(TarCompression::Bzip2));
    }
    if head.len() >= USTAR_OFFSET + USTAR_MAGIC.len()
        && &head[USTAR_OFFSET..USTAR_OFFSET + USTAR_MAGIC.len()] == USTAR_MAGIC
    {
        return Some(Detected::Tar(TarCompression::None));
    }
    if head.len() >= TAR_BLOCK && head[..TAR_BLOCK].iter().all(|&b| b == 0) {
        return Some(Detected::Tar(TarCompression::None));
    }
    None
}

/// Sniff by file name alone
pub fn detect_extension(path: &Path) -> Option<Detected> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(Detected::Tar(TarCompression::Gzip))
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") || name.ends_with(".tbz") {
        Some(Detected::Tar(TarCompression::Bzip2))
    } else if name.ends_with(".tar") {
        Some(Detected::Tar(TarCompression::None))
    } else if [".zip", ".jar", ".xlsx", ".docx", ".pptx", ".odt"]
        .iter()
        .any(|ext| name.ends_with(ext))
    {
        Some(Detected::Zip)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_extension_detection() {
        assert_eq!(
            detect_extension(Path::new("backup.TGZ")),
            Some(Detected::Tar(TarCompression::Gzip))
        );
        assert_eq!(
            detect_extension(Path::new("dir/data.tar.bz2")),
            Some(Detected::Tar(TarCompression::Bzip2))
        );
        assert_eq!(
            detect_extension(Path::new("plain.tar")),
            Some(Detected::Tar(TarCompression::None))
        );
        assert_eq!(detect_extension(Path::new("sheet.xlsx")), Some(Detected::Zip));
        assert_eq!(detect_extension(Path::new("notes.txt")), None);
    }

    #[test]
    fn test_magic_detection() {
        assert_eq!(detect_bytes(b"PK\x03\x04rest"), Some(Detected::Zip));
        assert_eq!(detect_bytes(b"PK\x05\x06"), Some(Detected::Zip));
        assert_eq!(
            detect_bytes(&[0x1f, 0x8b, 0x08]),
            Some(Detected::Tar(TarCompression::Gzip))
        );
        assert_eq!(
            detect_bytes(b"BZh91AY"),
            Some(Detected::Tar(TarCompression::Bzip2))
        );

        let mut block = vec![0u8; 512];
        block[257..262].copy_from_slice(b"ustar");
        assert_eq!(
            detect_bytes(&block),
            Some(Detected::Tar(TarCompression::None))
        );
        assert_eq!(detect_bytes(b""), None);
    }

    #[test]
    fn test_zero_block_is_empty_tar() {
        assert_eq!(
            detect_bytes(&[0u8; 1024]),
            Some(Detected::Tar(TarCompression::None))
        );
        // too short to be a tar block
        assert_eq!(detect_bytes(&[0u8; 100]), None);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("P");
        std::fs::write(&path, [0u8; 1024]).unwrap();
        assert_eq!(
            detect(&path).unwrap(),
            Some(Detected::Tar(TarCompression::None))
        );
    }

    #[test]
    fn test_content_beats_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("misnamed.tar");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"PK\x05\x06").unwrap();
        drop(file);

        assert_eq!(detect(&path).unwrap(), Some(Detected::Zip));
    }

    #[test]
    fn test_missing_file_falls_back_to_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.zip");
        assert_eq!(detect_content(&path).unwrap(), None);
        assert_eq!(detect(&path).unwrap(), Some(Detected::Zip));
    }
}
