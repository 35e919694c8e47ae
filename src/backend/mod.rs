//! Format-specific container adapters
//!
//! A backend knows how to list, read and rewrite one container file. It holds
//! no open file handle: every call opens the file fresh and drops it before
//! returning. The engine picks the variant once, at construction.

mod tarball;
mod zipfile;

pub use tarball::TarBackend;
pub use zipfile::ZipBackend;

use crate::buffer::MemberBuffer;
use crate::config::{ArchiveOptions, Format};
use crate::error::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Kind of a committed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// Metadata of a committed member
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberInfo {
    pub name: String,
    pub size: u64,
    /// Modification time in unix seconds, when the format records one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
    /// Link target (tar only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gname: Option<String>,
}

/// Byte source for one member of a rewrite
#[derive(Debug)]
pub enum Staged<'a> {
    /// A buffer owned by the engine (pending write or cached read)
    Buffered(&'a mut MemberBuffer),
    /// Committed content read for this rewrite only
    Fresh(MemberBuffer),
}

impl Staged<'_> {
    pub fn buffer(&mut self) -> &mut MemberBuffer {
        match self {
            Staged::Buffered(buffer) => buffer,
            Staged::Fresh(buffer) => buffer,
        }
    }
}

/// One (name, source) pair handed to `write_all`
#[derive(Debug)]
pub struct StagedMember<'a> {
    pub name: String,
    pub source: Staged<'a>,
}

/// Container adapter, chosen once per archive
#[derive(Debug, Clone)]
pub enum Backend {
    Tar(TarBackend),
    Zip(ZipBackend),
}

impl Backend {
    /// Build the adapter for `path` from resolved options
    pub fn from_options(path: &Path, options: &ArchiveOptions) -> Result<Self> {
        options.validate()?;
        match options.resolve_format(path)? {
            Format::Tar => Ok(Backend::Tar(TarBackend::new(
                path,
                options.resolve_tar_compression(path)?,
            ))),
            Format::Zip => Ok(Backend::Zip(
                ZipBackend::new(path, options.resolve_zip_compression()?)
                    .with_password(options.password.clone())
                    .with_zip64(options.allow_zip64),
            )),
        }
    }

    pub fn format(&self) -> Format {
        match self {
            Backend::Tar(_) => Format::Tar,
            Backend::Zip(_) => Format::Zip,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Backend::Tar(backend) => backend.path(),
            Backend::Zip(backend) => backend.path(),
        }
    }

    /// Same adapter and options, pointed at another file
    pub fn retarget(&self, path: &Path) -> Self {
        match self {
            Backend::Tar(backend) => Backend::Tar(backend.retarget(path)),
            Backend::Zip(backend) => Backend::Zip(backend.retarget(path)),
        }
    }

    /// Committed member names in on-disk order, without duplicates
    pub fn list_names(&self) -> Result<Vec<String>> {
        let names = match self {
            Backend::Tar(backend) => backend.list_names()?,
            Backend::Zip(backend) => backend.list_names()?,
        };
        let mut seen = HashSet::with_capacity(names.len());
        Ok(names
            .into_iter()
            .filter(|name| seen.insert(name.clone()))
            .collect())
    }

    pub fn members(&self) -> Result<Vec<MemberInfo>> {
        match self {
            Backend::Tar(backend) => backend.members(),
            Backend::Zip(backend) => backend.members(),
        }
    }

    pub fn read_member(&self, name: &str) -> Result<Vec<u8>> {
        match self {
            Backend::Tar(backend) => backend.read_member(name),
            Backend::Zip(backend) => backend.read_member(name),
        }
    }

    /// Read several members in one pass over the container
    ///
    /// Each buffer is positioned at offset 0. Names the container does not
    /// hold are left out of the result.
    pub fn read_members(
        &self,
        names: &HashSet<&str>,
        threshold: usize,
    ) -> Result<HashMap<String, MemberBuffer>> {
        match self {
            Backend::Tar(backend) => backend.read_members(names, threshold),
            Backend::Zip(backend) => backend.read_members(names, threshold),
        }
    }

    /// Read every member through; returns the first one that fails
    pub fn verify(&self) -> Result<Option<String>> {
        match self {
            Backend::Tar(backend) => backend.verify(),
            Backend::Zip(backend) => backend.verify(),
        }
    }

    /// Write a brand-new container holding exactly `members`, in order
    ///
    /// Returns the number of members written.
    pub fn write_all<'a, I>(&self, members: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<StagedMember<'a>>>,
    {
        match self {
            Backend::Tar(backend) => backend.write_all(members),
            Backend::Zip(backend) => backend.write_all(members),
        }
    }

    /// Write a valid container with no members
    pub fn create_empty(&self) -> Result<()> {
        self.write_all(std::iter::empty::<Result<StagedMember<'_>>>())
            .map(|_| ())
    }
}
