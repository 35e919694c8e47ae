//! memberstore: mutable member storage over tar and zip containers
//!
//! An [`Archive`] presents a container file as a set of named members that
//! can be read, written, patched and deleted. Edits live in per-member
//! buffers (spilling to temporary files when large) until a flush rewrites
//! the whole container next to the original and swaps it into place:
//! - tar, plain or gzip/bzip2 compressed
//! - zip, stored/deflate/bzip2, optionally AES-encrypted
//! - format and compression picked from content or file extension
//!
//! # Example
//!
//! ```no_run
//! use memberstore::{Archive, ArchiveOptions};
//! use std::io::Write;
//!
//! let mut archive = Archive::create("store.zip", ArchiveOptions::zip())?;
//! archive.write("config.json", r#"{"debug": true}"#)?;
//! {
//!     let mut log = archive.writer("log.txt")?;
//!     log.write_all(b"started\n")?;
//! }
//! archive.flush()?;
//!
//! let mut archive = Archive::open("store.zip")?;
//! assert_eq!(archive.read_to_string("log.txt")?, "started\n");
//! archive.delete("config.json")?;
//! archive.close()?;
//! # Ok::<(), memberstore::ArchiveError>(())
//! ```

// Core modules
pub mod archive;
pub mod backend;
pub mod buffer;
pub mod config;
pub mod detect;
pub mod error;

// Re-export commonly used types
pub use archive::{Archive, FlushReport, MemberReader, MemberWriter};
pub use backend::{Backend, EntryKind, MemberInfo};
pub use buffer::{MemberBuffer, DEFAULT_SPILL_THRESHOLD};
pub use config::{ArchiveOptions, Format, TarCompression, ZipCompression};
pub use error::{ArchiveError, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Ensure core types are accessible
        let _format = Format::Tar;
        let _options = ArchiveOptions::zip().with_spill_threshold(DEFAULT_SPILL_THRESHOLD);
        let _report = FlushReport::default();
    }
}
