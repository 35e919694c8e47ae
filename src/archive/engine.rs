use super::handle::{MemberReader, MemberWriter};
use crate::backend::{Backend, MemberInfo};
use crate::buffer::MemberBuffer;
use crate::config::{ArchiveOptions, Format};
use crate::error::{ArchiveError, Result};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Mutable view over a tar or zip container
///
/// Edits are staged in per-member buffers and reach the disk only on
/// [`flush`](Archive::flush), which rewrites the whole container and swaps it
/// into place. Dropping an archive with pending edits flushes it; a failure
/// there is logged through `tracing` rather than returned. Use
/// [`close`](Archive::close) to see that error.
///
/// # Example
///
/// ```no_run
/// use memberstore::{Archive, ArchiveOptions};
///
/// let mut archive = Archive::open_with("notes.tar.gz", ArchiveOptions::tar("gz").create(true))?;
/// archive.write("todo.txt", "buy milk")?;
/// assert!(archive.names()?.is_empty()); // nothing committed yet
///
/// archive.flush()?;
/// assert_eq!(archive.read_to_string("todo.txt")?, "buy milk");
/// # Ok::<(), memberstore::ArchiveError>(())
/// ```
pub struct Archive {
    pub(super) path: PathBuf,
    pub(super) options: ArchiveOptions,
    pub(super) backend: Backend,
    /// Pending content, committed on flush
    pub(super) writers: BTreeMap<String, MemberBuffer>,
    /// Cached committed content
    pub(super) readers: BTreeMap<String, MemberBuffer>,
    pub(super) deleted: BTreeSet<String>,
    flush_on_drop: bool,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("backend", &self.backend)
            .field("writers", &self.writers.keys().collect::<Vec<_>>())
            .field("readers", &self.readers.keys().collect::<Vec<_>>())
            .field("deleted", &self.deleted)
            .finish()
    }
}

impl Archive {
    /// Open an existing container, sniffing its format
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ArchiveOptions::default())
    }

    /// Open a container, creating an empty one if it does not exist
    pub fn create<P: AsRef<Path>>(path: P, options: ArchiveOptions) -> Result<Self> {
        Self::open_with(path, options.create(true))
    }

    /// Open a container with explicit options
    pub fn open_with<P: AsRef<Path>>(path: P, options: ArchiveOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let backend = Backend::from_options(&path, &options)?;

        if !path.exists() {
            if !options.create {
                return Err(ArchiveError::path_io(
                    &path,
                    io::Error::new(io::ErrorKind::NotFound, "container does not exist"),
                ));
            }
            backend.create_empty()?;
            tracing::debug!(path = %path.display(), format = %backend.format(), "created empty container");
        }

        Ok(Self {
            path,
            options,
            backend,
            writers: BTreeMap::new(),
            readers: BTreeMap::new(),
            deleted: BTreeSet::new(),
            flush_on_drop: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> Format {
        self.backend.format()
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    /// Committed member names in on-disk order; pending writes are not listed
    pub fn names(&self) -> Result<Vec<String>> {
        self.backend.list_names()
    }

    /// Committed member metadata in on-disk order
    pub fn members(&self) -> Result<Vec<MemberInfo>> {
        self.backend.members()
    }

    /// Committed member metadata keyed by name
    pub fn memberinfo(&self) -> Result<BTreeMap<String, MemberInfo>> {
        Ok(self
            .backend
            .members()?
            .into_iter()
            .map(|info| (info.name.clone(), info))
            .collect())
    }

    /// Read every committed member through to the end
    ///
    /// Returns the name of the first member whose data is damaged: a zip CRC
    /// or decryption failure, or a tar entry cut short. Pending edits are not
    /// checked.
    pub fn verify(&self) -> Result<Option<String>> {
        self.backend.verify()
    }

    /// True when `reader(member)` would succeed right now
    pub fn contains(&self, member: &str) -> Result<bool> {
        if self.deleted.contains(member) {
            return Ok(false);
        }
        if self.writers.contains_key(member) || self.readers.contains_key(member) {
            return Ok(true);
        }
        Ok(self.backend.list_names()?.iter().any(|name| name == member))
    }

    /// True when a flush would rewrite the container
    pub fn is_dirty(&self) -> bool {
        !self.writers.is_empty() || !self.deleted.is_empty()
    }

    /// Names with pending writes
    pub fn pending_writes(&self) -> impl Iterator<Item = &str> + '_ {
        self.writers.keys().map(String::as_str)
    }

    /// Names marked for deletion
    pub fn pending_deletes(&self) -> impl Iterator<Item = &str> + '_ {
        self.deleted.iter().map(String::as_str)
    }

    /// Read handle positioned at offset 0
    ///
    /// Content comes from the pending writer, then the read cache, then the
    /// container (which fills the cache). A member pending deletion is
    /// reported as not found.
    pub fn reader(&mut self, member: &str) -> Result<MemberReader<'_>> {
        check_name(member)?;
        if self.deleted.contains(member) {
            return Err(ArchiveError::not_found(&self.path, member));
        }

        let buffer = if let Some(buffer) = self.writers.get_mut(member) {
            buffer
        } else {
            match self.readers.entry(member.to_string()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let data = self.backend.read_member(member)?;
                    tracing::trace!(member, bytes = data.len(), "cached committed member");
                    entry.insert(MemberBuffer::with_contents(
                        self.options.spill_threshold,
                        &data,
                    )?)
                }
            }
        };

        buffer.rewind()?;
        Ok(MemberReader::new(member, buffer))
    }

    /// Write handle on an empty buffer; the member's content is replaced
    ///
    /// Un-marks a pending deletion and drops any cached read buffer.
    pub fn writer(&mut self, member: &str) -> Result<MemberWriter<'_>> {
        check_name(member)?;
        self.deleted.remove(member);
        self.readers.remove(member);

        let fresh = MemberBuffer::new(self.options.spill_threshold);
        let buffer = match self.writers.entry(member.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.insert(fresh);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(fresh),
        };

        Ok(MemberWriter::new(member, buffer))
    }

    /// Write handle seeded with the member's current content, at offset 0
    ///
    /// Writes overwrite from the front without shrinking the member; call
    /// [`MemberWriter::truncate`] to cut the tail. A new name starts empty.
    pub fn editor(&mut self, member: &str) -> Result<MemberWriter<'_>> {
        check_name(member)?;
        self.deleted.remove(member);

        let buffer = match self.writers.entry(member.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let seeded = match self.readers.remove(member) {
                    Some(cached) => cached,
                    None => match self.backend.read_member(member) {
                        Ok(data) => {
                            MemberBuffer::with_contents(self.options.spill_threshold, &data)?
                        }
                        Err(err) if err.is_not_found() => {
                            MemberBuffer::new(self.options.spill_threshold)
                        }
                        Err(err) => return Err(err),
                    },
                };
                entry.insert(seeded)
            }
        };

        buffer.rewind()?;
        Ok(MemberWriter::new(member, buffer))
    }

    /// Whole content of a member
    pub fn read(&mut self, member: &str) -> Result<Vec<u8>> {
        let mut reader = self.reader(member)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Whole content of a member as UTF-8 text
    pub fn read_to_string(&mut self, member: &str) -> Result<String> {
        String::from_utf8(self.read(member)?).map_err(|_| ArchiveError::Utf8 {
            member: member.to_string(),
        })
    }

    /// Replace a member's content
    pub fn write<D: AsRef<[u8]>>(&mut self, member: &str, data: D) -> Result<()> {
        let mut writer = self.writer(member)?;
        writer.write_all(data.as_ref())?;
        Ok(())
    }

    /// Mark a member for removal and free its buffers
    pub fn delete(&mut self, member: &str) -> Result<()> {
        check_name(member)?;
        self.readers.remove(member);
        self.writers.remove(member);
        self.deleted.insert(member.to_string());
        Ok(())
    }

    /// Cancel a pending deletion; returns whether one was pending
    pub fn undelete(&mut self, member: &str) -> bool {
        self.deleted.remove(member)
    }

    /// Drop a pending write; returns whether one was pending
    pub fn unwrite(&mut self, member: &str) -> bool {
        self.writers.remove(member).is_some()
    }

    /// Undo pending edits for one member, or for all members with `None`
    pub fn revert(&mut self, member: Option<&str>) {
        match member {
            Some(name) => {
                self.undelete(name);
                self.unwrite(name);
            }
            None => {
                self.writers.clear();
                self.deleted.clear();
            }
        }
    }

    /// Committed names matching a glob pattern
    ///
    /// With `remove`, every match is also marked for deletion.
    pub fn search(&mut self, pattern: &str, remove: bool) -> Result<Vec<String>> {
        let pattern = glob::Pattern::new(pattern)?;
        let matches: Vec<String> = self
            .names()?
            .into_iter()
            .filter(|name| pattern.matches(name))
            .collect();

        if remove {
            for name in &matches {
                self.delete(name)?;
            }
        }
        Ok(matches)
    }

    /// Flush pending edits and report any error
    pub fn close(mut self) -> Result<super::FlushReport> {
        self.flush_on_drop = false;
        self.flush()
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        if !self.flush_on_drop || !self.is_dirty() {
            return;
        }
        if let Err(err) = self.flush() {
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "implicit flush on drop failed; pending edits discarded"
            );
        }
    }
}

/// Names must survive a tar rewrite byte for byte: relative, `/`-separated,
/// no empty, `.` or `..` components, no NUL
fn check_name(member: &str) -> Result<()> {
    let verbatim = !member.is_empty()
        && !member.contains('\0')
        && member
            .split('/')
            .all(|part| !matches!(part, "" | "." | ".."));
    if !verbatim {
        return Err(ArchiveError::InvalidMember(member.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};
    use tempfile::TempDir;

    fn fixture(options: ArchiveOptions) -> (TempDir, Archive) {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::create(dir.path().join("store"), options).unwrap();
        (dir, archive)
    }

    fn committed(options: ArchiveOptions) -> (TempDir, Archive) {
        let (dir, mut archive) = fixture(options);
        archive.write("kept.txt", "original content").unwrap();
        archive.write("other.txt", "other").unwrap();
        archive.flush().unwrap();
        (dir, archive)
    }

    #[test]
    fn test_pending_write_visible_before_flush() {
        let (_dir, mut archive) = fixture(ArchiveOptions::tar(""));
        archive.write("a", "hello").unwrap();

        assert!(archive.names().unwrap().is_empty());
        assert_eq!(archive.read("a").unwrap(), b"hello");
        assert!(archive.contains("a").unwrap());
        assert!(archive.is_dirty());
    }

    #[test]
    fn test_empty_name_rejected() {
        let (_dir, mut archive) = fixture(ArchiveOptions::zip());
        assert!(matches!(
            archive.reader(""),
            Err(ArchiveError::InvalidMember(_))
        ));
        assert!(archive.writer("").is_err());
        assert!(archive.delete("").is_err());
    }

    #[test]
    fn test_names_tar_would_rewrite_rejected() {
        let (_dir, mut archive) = fixture(ArchiveOptions::tar(""));
        for name in ["/abs", "./x", "a//b", "../up", "a/./b", "a/..", "dir/", "."] {
            assert!(
                matches!(archive.writer(name), Err(ArchiveError::InvalidMember(_))),
                "{name:?} accepted"
            );
        }
        assert!(!archive.is_dirty());

        for name in ["..x", "x..", ".hidden", "a/.b/c", "a b/c"] {
            archive.write(name, name).unwrap();
        }
        archive.flush().unwrap();
        assert_eq!(archive.read_to_string("..x").unwrap(), "..x");
    }

    #[test]
    fn test_missing_member_not_found() {
        let (_dir, mut archive) = fixture(ArchiveOptions::zip());
        let err = archive.reader("nope").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.member(), Some("nope"));
    }

    #[test]
    fn test_reader_populates_cache() {
        let (_dir, mut archive) = committed(ArchiveOptions::tar(""));
        assert!(archive.readers.is_empty());

        archive.read("kept.txt").unwrap();
        assert!(archive.readers.contains_key("kept.txt"));
        assert!(!archive.is_dirty());
    }

    #[test]
    fn test_reader_starts_at_zero() {
        let (_dir, mut archive) = fixture(ArchiveOptions::tar(""));
        archive.write("a", "abcdef").unwrap();
        {
            let mut reader = archive.reader("a").unwrap();
            reader.seek(SeekFrom::Start(4)).unwrap();
            assert_eq!(reader.read_all().unwrap(), b"ef");
        }
        let mut reader = archive.reader("a").unwrap();
        assert_eq!(reader.tell().unwrap(), 0);
        assert_eq!(reader.len().unwrap(), 6);
    }

    #[test]
    fn test_writer_replaces_whole_content() {
        let (_dir, mut archive) = committed(ArchiveOptions::tar(""));
        archive.read("kept.txt").unwrap();

        archive.write("kept.txt", "new").unwrap();
        assert_eq!(archive.read("kept.txt").unwrap(), b"new");
        assert!(!archive.readers.contains_key("kept.txt"));

        // a second writer starts over as well
        archive.write("kept.txt", "x").unwrap();
        assert_eq!(archive.read("kept.txt").unwrap(), b"x");
    }

    #[test]
    fn test_editor_patches_in_place() {
        let (_dir, mut archive) = committed(ArchiveOptions::zip());
        {
            let mut editor = archive.editor("kept.txt").unwrap();
            editor.write_all(b"ORIG").unwrap();
        }
        assert_eq!(archive.read_to_string("kept.txt").unwrap(), "ORIGinal content");

        {
            let mut editor = archive.editor("kept.txt").unwrap();
            editor.seek(SeekFrom::Start(4)).unwrap();
            editor.truncate().unwrap();
            editor.seek_end().unwrap();
            editor.write_all(b"!").unwrap();
        }
        assert_eq!(archive.read_to_string("kept.txt").unwrap(), "ORIG!");

        let mut fresh = archive.editor("brand-new").unwrap();
        assert!(fresh.is_empty().unwrap());
    }

    #[test]
    fn test_delete_then_writer_undeletes() {
        let (_dir, mut archive) = committed(ArchiveOptions::tar(""));
        archive.delete("kept.txt").unwrap();
        assert!(archive.reader("kept.txt").unwrap_err().is_not_found());
        assert!(!archive.contains("kept.txt").unwrap());

        archive.write("kept.txt", "again").unwrap();
        assert_eq!(archive.pending_deletes().count(), 0);
        assert_eq!(archive.read("kept.txt").unwrap(), b"again");
    }

    #[test]
    fn test_delete_then_editor_reseeds_from_committed() {
        let (_dir, mut archive) = committed(ArchiveOptions::tar(""));
        archive.write("kept.txt", "pending").unwrap();
        archive.delete("kept.txt").unwrap();
        assert!(archive.writers.is_empty());

        archive.editor("kept.txt").unwrap();
        assert!(archive.writers.contains_key("kept.txt"));
        assert_eq!(
            archive.read_to_string("kept.txt").unwrap(),
            "original content"
        );
    }

    #[test]
    fn test_name_never_in_writers_and_deleted() {
        let (_dir, mut archive) = fixture(ArchiveOptions::tar(""));
        archive.write("a", "1").unwrap();
        archive.delete("a").unwrap();
        assert!(!archive.writers.contains_key("a"));
        assert!(archive.deleted.contains("a"));

        archive.writer("a").unwrap();
        assert!(archive.writers.contains_key("a"));
        assert!(!archive.deleted.contains("a"));
    }

    #[test]
    fn test_revert_single_member() {
        let (_dir, mut archive) = committed(ArchiveOptions::tar(""));
        archive.write("kept.txt", "changed").unwrap();
        archive.delete("other.txt").unwrap();

        archive.revert(Some("kept.txt"));
        assert_eq!(archive.read("kept.txt").unwrap(), b"original content");
        assert_eq!(archive.pending_deletes().collect::<Vec<_>>(), vec!["other.txt"]);

        archive.revert(Some("other.txt"));
        assert!(!archive.is_dirty());
    }

    #[test]
    fn test_revert_all() {
        let (_dir, mut archive) = committed(ArchiveOptions::zip());
        archive.write("new.txt", "x").unwrap();
        archive.delete("kept.txt").unwrap();
        archive.revert(None);

        assert!(!archive.is_dirty());
        assert!(archive.reader("new.txt").unwrap_err().is_not_found());
        assert_eq!(archive.read("kept.txt").unwrap(), b"original content");
    }

    #[test]
    fn test_unwrite_and_undelete_report() {
        let (_dir, mut archive) = fixture(ArchiveOptions::tar(""));
        assert!(!archive.unwrite("a"));
        archive.write("a", "1").unwrap();
        assert!(archive.unwrite("a"));

        assert!(!archive.undelete("a"));
        archive.delete("a").unwrap();
        assert!(archive.undelete("a"));
    }

    #[test]
    fn test_search_with_remove() {
        let (_dir, mut archive) = fixture(ArchiveOptions::tar(""));
        for name in ["logs/a.log", "logs/b.log", "data/c.csv"] {
            archive.write(name, name).unwrap();
        }
        archive.flush().unwrap();

        let found = archive.search("logs/*.log", false).unwrap();
        assert_eq!(found, vec!["logs/a.log", "logs/b.log"]);
        assert!(!archive.is_dirty());

        let removed = archive.search("*.csv", true).unwrap();
        assert_eq!(removed, vec!["data/c.csv"]);
        assert_eq!(archive.pending_deletes().collect::<Vec<_>>(), vec!["data/c.csv"]);

        assert!(matches!(
            archive.search("[", false),
            Err(ArchiveError::Pattern(_))
        ));
    }

    #[test]
    fn test_read_to_string_rejects_binary() {
        let (_dir, mut archive) = fixture(ArchiveOptions::zip());
        archive.write("bin", [0xffu8, 0xfe, 0x00]).unwrap();
        assert!(matches!(
            archive.read_to_string("bin"),
            Err(ArchiveError::Utf8 { .. })
        ));
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let err = Archive::open_with(dir.path().join("absent.zip"), ArchiveOptions::zip())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::PathIo { .. }));
    }

    #[test]
    fn test_open_sniffs_format() {
        let (dir, archive) = committed(ArchiveOptions::zip());
        drop(archive);

        let reopened = Archive::open(dir.path().join("store")).unwrap();
        assert_eq!(reopened.format(), Format::Zip);
        assert_eq!(reopened.names().unwrap(), vec!["kept.txt", "other.txt"]);
    }

    #[test]
    fn test_memberinfo_keyed_by_name() {
        let (_dir, archive) = committed(ArchiveOptions::tar("gz"));
        let info = archive.memberinfo().unwrap();
        assert_eq!(info["kept.txt"].size, "original content".len() as u64);
        assert_eq!(info.len(), 2);
    }
}
