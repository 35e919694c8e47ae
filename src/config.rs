//! Construction-time archive options
//!
//! Options are fixed for the lifetime of an [`Archive`](crate::Archive). They
//! can be built in code or loaded from a TOML or JSON document:
//!
//! ```toml
//! format = "tar"
//! compression = "gz"
//! spill_threshold = 4194304
//! create = true
//! ```

use crate::buffer::DEFAULT_SPILL_THRESHOLD;
use crate::detect::{self, Detected};
use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Container format backing an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Tar,
    Zip,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Tar => f.write_str("tar"),
            Format::Zip => f.write_str("zip"),
        }
    }
}

/// Whole-stream compression of a tar container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TarCompression {
    #[default]
    None,
    Gzip,
    Bzip2,
}

impl TarCompression {
    /// Parse a compression code: `""`, `"gz"` or `"bz2"`
    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "" => Ok(TarCompression::None),
            "gz" => Ok(TarCompression::Gzip),
            "bz2" => Ok(TarCompression::Bzip2),
            other => Err(ArchiveError::ConfigError(format!(
                "unknown tar compression {other:?} (expected \"\", \"gz\" or \"bz2\")"
            ))),
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            TarCompression::None => "",
            TarCompression::Gzip => "gz",
            TarCompression::Bzip2 => "bz2",
        }
    }
}

/// Per-entry compression of a zip container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZipCompression {
    Stored,
    #[default]
    Deflate,
    Bzip2,
}

impl ZipCompression {
    /// Parse a compression code by name or by zip method number
    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "stored" | "0" => Ok(ZipCompression::Stored),
            "deflate" | "deflated" | "8" => Ok(ZipCompression::Deflate),
            "bzip2" | "12" => Ok(ZipCompression::Bzip2),
            other => Err(ArchiveError::ConfigError(format!(
                "unknown zip compression {other:?} (expected \"stored\", \"deflate\" or \"bzip2\")"
            ))),
        }
    }
}

/// Options chosen once when an archive is opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveOptions {
    /// Backend format; sniffed from the file when absent
    pub format: Option<Format>,

    /// Tar compression code; inferred from content or extension when absent
    pub compression: Option<String>,

    /// Zip compression code (default "deflate")
    pub zip_compression: Option<String>,

    /// Zip password, applied to every member written
    pub password: Option<String>,

    /// Allow zip64 records for members over 4 GiB
    pub allow_zip64: bool,

    /// Member buffers spill to a temp file above this size
    pub spill_threshold: usize,

    /// Write an empty container when the file does not exist
    pub create: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            format: None,
            compression: None,
            zip_compression: None,
            password: None,
            allow_zip64: false,
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            create: false,
        }
    }
}

impl ArchiveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a tar archive with the given compression code
    pub fn tar(compression: &str) -> Self {
        Self::new()
            .with_format(Format::Tar)
            .with_compression(compression)
    }

    /// Options for a zip archive with default deflate compression
    pub fn zip() -> Self {
        Self::new().with_format(Format::Zip)
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_compression(mut self, code: &str) -> Self {
        self.compression = Some(code.to_string());
        self
    }

    pub fn with_zip_compression(mut self, code: &str) -> Self {
        self.zip_compression = Some(code.to_string());
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_zip64(mut self, allow: bool) -> Self {
        self.allow_zip64 = allow;
        self
    }

    pub fn with_spill_threshold(mut self, bytes: usize) -> Self {
        self.spill_threshold = bytes;
        self
    }

    /// Create the container if it does not exist yet
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Parse options from a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: Self = toml::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Parse options from a JSON document
    pub fn from_json_str(text: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a `.toml` or `.json` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| ArchiveError::path_io(path, e))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&text),
            Some("json") => Self::from_json_str(&text),
            _ => Err(ArchiveError::ConfigError(format!(
                "unsupported options file {} (expected .toml or .json)",
                path.display()
            ))),
        }
    }

    /// Check codes and reject options that contradict the chosen format
    pub fn validate(&self) -> Result<()> {
        if let Some(code) = &self.compression {
            TarCompression::from_code(code)?;
        }
        if let Some(code) = &self.zip_compression {
            ZipCompression::from_code(code)?;
        }

        match self.format {
            Some(Format::Zip) if self.compression.as_deref().is_some_and(|c| !c.is_empty()) => {
                Err(ArchiveError::ConfigError(
                    "tar compression given for a zip archive".to_string(),
                ))
            }
            Some(Format::Tar) if self.password.is_some() => Err(ArchiveError::ConfigError(
                "password given for a tar archive".to_string(),
            )),
            Some(Format::Tar) if self.zip_compression.is_some() => Err(ArchiveError::ConfigError(
                "zip compression given for a tar archive".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Format for `path`: the explicit one, else sniffed
    pub fn resolve_format(&self, path: &Path) -> Result<Format> {
        if let Some(format) = self.format {
            return Ok(format);
        }
        detect::detect(path)?
            .map(Detected::format)
            .ok_or_else(|| {
                ArchiveError::ConfigError(format!(
                    "cannot determine container format of {}",
                    path.display()
                ))
            })
    }

    /// Tar compression for `path`: the explicit code, else sniffed, else none
    pub fn resolve_tar_compression(&self, path: &Path) -> Result<TarCompression> {
        if let Some(code) = &self.compression {
            return TarCompression::from_code(code);
        }
        match detect::detect(path)? {
            Some(Detected::Tar(compression)) => Ok(compression),
            _ => Ok(TarCompression::None),
        }
    }

    pub fn resolve_zip_compression(&self) -> Result<ZipCompression> {
        match &self.zip_compression {
            Some(code) => ZipCompression::from_code(code),
            None => Ok(ZipCompression::default()),
        }
    }
}
