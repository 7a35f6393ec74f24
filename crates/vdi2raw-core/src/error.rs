//! Error types for the vdi2raw core library.

use std::fmt;
use std::path::PathBuf;

/// The storage operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Seek,
    Read,
    Write,
    Truncate,
    Sync,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoOp::Seek => write!(f, "seek"),
            IoOp::Read => write!(f, "read"),
            IoOp::Write => write!(f, "write"),
            IoOp::Truncate => write!(f, "truncate"),
            IoOp::Sync => write!(f, "sync"),
        }
    }
}

/// The main error type for vdi2raw operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The image does not follow the VDI layout.
    #[error("format error in {field}: {message}")]
    Format {
        field: &'static str,
        message: String,
    },

    /// The source ended before the header or allocation map was complete.
    #[error("truncated input: {what} needs {needed} bytes, only {available} available")]
    Truncated {
        what: &'static str,
        needed: u64,
        available: u64,
    },

    /// A seek, read, write, truncate or sync against an open handle failed
    /// or transferred fewer bytes than requested.
    #[error("I/O error during {op} at offset {offset}{}: {source}", block.map(|b| format!(" (block {b})")).unwrap_or_default())]
    Io {
        op: IoOp,
        offset: u64,
        block: Option<u64>,
        source: std::io::Error,
    },

    /// A source or destination file could not be opened.
    #[error("cannot open '{}': {source}", path.display())]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The copy was cancelled before `block` was transferred.
    #[error("interrupted before block {block}")]
    Interrupted { block: u64 },

    /// The requested options cannot be applied to this image.
    #[error("invalid options: {message}")]
    InvalidOptions { message: String },
}

/// A specialized Result type for vdi2raw operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or truncated image content.
    Format,
    /// Failure of the underlying storage.
    Io,
    /// Deliberate external cancellation.
    Interrupted,
    /// Options that do not fit the image.
    Usage,
}

impl Error {
    /// Create a format error for the named header or map field.
    pub fn format(field: &'static str, message: impl Into<String>) -> Self {
        Self::Format {
            field,
            message: message.into(),
        }
    }

    /// Create a truncation error.
    pub fn truncated(what: &'static str, needed: u64, available: u64) -> Self {
        Self::Truncated {
            what,
            needed,
            available,
        }
    }

    /// Create an I/O error outside the block loop.
    pub fn io(op: IoOp, offset: u64, source: std::io::Error) -> Self {
        Self::Io {
            op,
            offset,
            block: None,
            source,
        }
    }

    /// Create an I/O error for a specific logical block.
    pub fn io_at_block(op: IoOp, offset: u64, block: u64, source: std::io::Error) -> Self {
        Self::Io {
            op,
            offset,
            block: Some(block),
            source,
        }
    }

    /// Create an error for a file that could not be opened.
    pub fn file(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid-options error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Format { .. } | Error::Truncated { .. } => ErrorKind::Format,
            Error::Io { .. } | Error::File { .. } => ErrorKind::Io,
            Error::Interrupted { .. } => ErrorKind::Interrupted,
            Error::InvalidOptions { .. } => ErrorKind::Usage,
        }
    }
}
