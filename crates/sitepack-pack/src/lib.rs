//! Payload embedding and extraction for sitepack installers.
//!
//! An installer is a template executable with a compressed site archive
//! appended to its tail, followed by a small self-describing footer:
//!
//! ```text
//! [template bytes][APPDATA\0][archive][archive_len u32 LE][APPDATA\0]
//! ```
//!
//! [`packer`] writes that layout, [`detect`] finds and validates it in the
//! running executable, and [`archive`] converts between a directory tree
//! and the archive blob.

pub mod archive;
pub mod detect;
pub mod format;
pub mod packer;

use std::path::{Path, PathBuf};
use thiserror::Error;

pub use archive::{ArchiveSummary, EntryInfo, Progress};
pub use detect::{LocatedPayload, PayloadSource};
pub use format::{FooterLocation, ProductInfo, FOOTER_OVERHEAD, MAGIC};
pub use packer::{PackedInfo, Packer};

/// Result type alias for pack operations.
pub type Result<T> = std::result::Result<T, PackError>;

/// Errors from embedding or extracting a payload.
#[derive(Error, Debug)]
pub enum PackError {
    /// Source directory does not exist.
    #[error("source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Source directory contains no files.
    #[error("source directory contains no files: {}", .0.display())]
    EmptySource(PathBuf),

    /// A source file could not be opened for reading.
    #[error("source file is locked or unreadable: {}: {source}", path.display())]
    SourceLocked {
        /// File that failed to open.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A source path cannot be stored as an archive entry name.
    #[error("source path cannot be stored in the archive: {}", .0.display())]
    InvalidSourcePath(PathBuf),

    /// Template executable does not exist or is not a file.
    #[error("template executable not found: {}", .0.display())]
    TemplateNotFound(PathBuf),

    /// The output executable could not be created.
    #[error("cannot write output executable {}: {source}", path.display())]
    OutputPathUnwritable {
        /// Output path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The output path names the template executable itself.
    #[error("output {} is the template executable", .0.display())]
    OutputIsTemplate(PathBuf),

    /// Archive does not fit the 32-bit footer length field.
    #[error("payload archive too large for footer: {0} bytes")]
    PayloadTooLarge(u64),

    /// No valid footer at the end of the image.
    #[error("no embedded payload found")]
    FooterNotFound,

    /// An archive entry would be written outside the target directory.
    #[error("unsafe archive entry path: {0}")]
    UnsafeEntryPath(String),

    /// Two source files map to the same entry name.
    #[error("duplicate archive entry: {0}")]
    DuplicateEntry(String),

    /// Archive container could not be encoded or decoded.
    #[error("archive error: {0}")]
    Archive(String),

    /// Extraction was cancelled between entries.
    #[error("extraction cancelled")]
    Cancelled,

    /// Filesystem error with the failing operation and file.
    #[error("{op} {}: {source}", path.display())]
    Io {
        /// Operation that failed (e.g. "read", "create").
        op: &'static str,
        /// File the operation was applied to.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

impl PackError {
    /// Wrap an I/O error with the operation and path it came from.
    pub fn io(op: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether this error means "no payload" rather than a real failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FooterNotFound)
    }
}

impl From<zip::result::ZipError> for PackError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(source) => Self::Io {
                op: "archive",
                path: PathBuf::new(),
                source,
            },
            other => Self::Archive(other.to_string()),
        }
    }
}
