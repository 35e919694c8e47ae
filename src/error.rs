use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for member store operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Unified error type for archive and backend operations
#[derive(Debug, Error)]
pub enum ArchiveError {
    // Member errors
    #[error("Member not found in {}: {member}", .path.display())]
    NotFound { path: PathBuf, member: String },

    #[error("Invalid member name: {0:?}")]
    InvalidMember(String),

    #[error("Member {member} is not valid UTF-8")]
    Utf8 { member: String },

    // Container errors
    #[error("Corrupt container {}{}: {reason}", .path.display(), member_suffix(.member))]
    CorruptContainer {
        path: PathBuf,
        member: Option<String>,
        reason: String,
    },

    #[error("Flush of {}{} failed: {source}", .path.display(), member_suffix(.member))]
    FlushFailure {
        path: PathBuf,
        member: Option<String>,
        #[source]
        source: Box<ArchiveError>,
    },

    // Configuration errors
    #[error("Invalid archive configuration: {0}")]
    ConfigError(String),

    #[error("Failed to parse archive options: {0}")]
    ConfigParse(String),

    #[error("Invalid search pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    // I/O errors
    #[error("I/O error on {}: {source}", .path.display())]
    PathIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {} (member {member}): {source}", .path.display())]
    MemberIo {
        path: PathBuf,
        member: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn member_suffix(member: &Option<String>) -> String {
    match member {
        Some(name) => format!(" (member {name})"),
        None => String::new(),
    }
}

impl ArchiveError {
    pub(crate) fn not_found(path: &Path, member: &str) -> Self {
        ArchiveError::NotFound {
            path: path.to_path_buf(),
            member: member.to_string(),
        }
    }

    pub(crate) fn corrupt(path: &Path, member: Option<&str>, reason: impl ToString) -> Self {
        ArchiveError::CorruptContainer {
            path: path.to_path_buf(),
            member: member.map(str::to_string),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn path_io(path: &Path, source: io::Error) -> Self {
        ArchiveError::PathIo {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn member_io(path: &Path, member: &str, source: io::Error) -> Self {
        ArchiveError::MemberIo {
            path: path.to_path_buf(),
            member: member.to_string(),
            source,
        }
    }

    /// Wrap a failure from inside the flush sequence
    pub(crate) fn flush_failure(path: &Path, source: ArchiveError) -> Self {
        let member = source.member().map(str::to_string);
        ArchiveError::FlushFailure {
            path: path.to_path_buf(),
            member,
            source: Box::new(source),
        }
    }

    /// Member name this error refers to, when known
    pub fn member(&self) -> Option<&str> {
        match self {
            ArchiveError::NotFound { member, .. }
            | ArchiveError::MemberIo { member, .. }
            | ArchiveError::Utf8 { member } => Some(member),
            ArchiveError::CorruptContainer { member, .. }
            | ArchiveError::FlushFailure { member, .. } => member.as_deref(),
            _ => None,
        }
    }

    /// True for `NotFound`, including one wrapped by a flush failure
    pub fn is_not_found(&self) -> bool {
        match self {
            ArchiveError::NotFound { .. } => true,
            ArchiveError::FlushFailure { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

impl From<toml::de::Error> for ArchiveError {
    fn from(err: toml::de::Error) -> Self {
        ArchiveError::ConfigParse(err.to_string())
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        ArchiveError::ConfigParse(err.to_string())
    }
}
