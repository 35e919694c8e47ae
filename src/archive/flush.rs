//! Backup-then-swap rewrite of a container
//!
//! A flush never edits the container in place. The merged member set is
//! written to `<path>.new`; the current file is renamed to `.<name>.bu` in
//! the same directory; the new file is renamed onto the true path; the backup
//! is removed. A failure while writing the replacement leaves the original
//! untouched. A crash between the two renames leaves the content at the
//! backup path, to be recovered by hand.

use super::engine::Archive;
use crate::backend::{Staged, StagedMember};
use crate::buffer::MemberBuffer;
use crate::error::{ArchiveError, Result};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Outcome of a flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Whether the container was rewritten at all
    pub rewritten: bool,
    /// Members in the new container
    pub members_written: usize,
    /// Committed members left out of the new container
    pub members_removed: usize,
    /// Members that did not exist before this flush
    pub members_added: usize,
}

/// Sibling path the replacement container is written to
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".new");
    PathBuf::from(name)
}

/// Hidden sibling path the previous container is parked at
pub fn backup_path(path: &Path) -> Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        ArchiveError::ConfigError(format!("{} has no file name", path.display()))
    })?;

    let mut backup = OsString::from(".");
    backup.push(file_name);
    backup.push(".bu");

    Ok(match path.parent() {
        Some(parent) => parent.join(backup),
        None => PathBuf::from(backup),
    })
}

impl Archive {
    /// Commit pending writes and deletions to disk
    ///
    /// Does no I/O when nothing is pending. On failure the pending state is
    /// kept as it was; call [`revert`](Archive::revert) to discard it.
    pub fn flush(&mut self) -> Result<FlushReport> {
        if !self.is_dirty() {
            tracing::trace!(path = %self.path.display(), "flush skipped; nothing pending");
            return Ok(FlushReport::default());
        }

        let report = self
            .rewrite()
            .map_err(|e| ArchiveError::flush_failure(&self.path, e))?;

        tracing::debug!(
            path = %self.path.display(),
            written = report.members_written,
            removed = report.members_removed,
            added = report.members_added,
            "flushed archive"
        );
        Ok(report)
    }

    fn rewrite(&mut self) -> Result<FlushReport> {
        let committed = self.backend.list_names()?;
        let committed_set: HashSet<&str> = committed.iter().map(String::as_str).collect();

        let mut report = FlushReport {
            rewritten: true,
            ..FlushReport::default()
        };

        // on-disk order first, then new names in lexical order
        let mut names = Vec::with_capacity(committed.len() + self.writers.len());
        for name in &committed {
            if self.deleted.contains(name) {
                report.members_removed += 1;
            } else {
                names.push(name.clone());
            }
        }
        for name in self.writers.keys() {
            if !committed_set.contains(name.as_str()) {
                names.push(name.clone());
                report.members_added += 1;
            }
        }

        // everything that can fail before a side file exists
        let backup = backup_path(&self.path)?;
        let threshold = self.options.spill_threshold;
        let unbuffered: HashSet<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| !self.writers.contains_key(*name) && !self.readers.contains_key(*name))
            .collect();
        let mut fresh = if unbuffered.is_empty() {
            HashMap::new()
        } else {
            self.backend.read_members(&unbuffered, threshold)?
        };

        let staging = staging_path(&self.path);
        let target = self.backend.retarget(&staging);
        tracing::debug!(path = %staging.display(), members = names.len(), "writing replacement container");

        let written = {
            let source = &self.path;

            let mut buffered: HashMap<&str, &mut MemberBuffer> =
                HashMap::with_capacity(self.readers.len() + self.writers.len());
            for (name, buffer) in self.readers.iter_mut() {
                buffered.insert(name.as_str(), buffer);
            }
            // pending writes shadow cached reads
            for (name, buffer) in self.writers.iter_mut() {
                buffered.insert(name.as_str(), buffer);
            }

            let staged = names
                .iter()
                .map(|name| stage(source, name, buffered.remove(name.as_str()), &mut fresh));

            target.write_all(staged)
        };

        let written = match written {
            Ok(count) => count,
            Err(err) => {
                discard(&staging);
                return Err(err);
            }
        };
        report.members_written = written;

        if backup.exists() {
            fs::remove_file(&backup).map_err(|e| {
                discard(&staging);
                ArchiveError::path_io(&backup, e)
            })?;
        }

        let had_original = self.path.exists();
        if had_original {
            fs::rename(&self.path, &backup).map_err(|e| {
                discard(&staging);
                ArchiveError::path_io(&self.path, e)
            })?;
        }

        if let Err(e) = fs::rename(&staging, &self.path) {
            if had_original {
                restore(&backup, &self.path);
            }
            return Err(ArchiveError::path_io(&self.path, e));
        }

        self.backend = target.retarget(&self.path);
        self.writers.clear();
        self.readers.clear();
        self.deleted.clear();

        discard(&backup);
        Ok(report)
    }
}

/// Pair a name with its cached buffer, or with the committed content read up front
fn stage<'a>(
    path: &Path,
    name: &str,
    cached: Option<&'a mut MemberBuffer>,
    fresh: &mut HashMap<String, MemberBuffer>,
) -> Result<StagedMember<'a>> {
    let source = match cached {
        Some(buffer) => Staged::Buffered(buffer),
        None => match fresh.remove(name) {
            Some(buffer) => Staged::Fresh(buffer),
            None => return Err(ArchiveError::not_found(path, name)),
        },
    };
    Ok(StagedMember {
        name: name.to_string(),
        source,
    })
}

/// Best-effort removal of a flush side file
fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "could not remove flush side file");
        }
    }
}

/// Put the parked original back after a failed swap
fn restore(backup: &Path, path: &Path) {
    match fs::rename(backup, path) {
        Ok(()) => tracing::warn!(path = %path.display(), "swap failed; original restored from backup"),
        Err(e) => tracing::warn!(
            path = %path.display(),
            backup = %backup.display(),
            error = %e,
            "swap failed and the original could not be restored; recover it from the backup"
        ),
    }
}
