//! Error types for the relayspool-spool crate.
//!
//! Spool errors cover directory and file access, message errors cover
//! malformed mail files.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Top-level spool error type.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// I/O operation failed (directory listing, file read or removal).
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Spool file is not (or no longer) present.
    #[error("Spool file not found: {0}")]
    NotFound(PathBuf),

    /// Spool directory validation failed.
    #[error("Spool validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl SpoolError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Spool directory validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Spool path does not exist.
    #[error("Spool path does not exist: {0}")]
    PathNotFound(String),

    /// Spool path is not a directory.
    #[error("Spool path is not a directory: {0}")]
    NotDirectory(String),

    /// Spool path could not be resolved to an absolute path.
    #[error("Unable to resolve spool path {path}: {reason}")]
    Unresolvable { path: String, reason: String },
}

/// Errors raised while turning a spool file into a deliverable message.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The header section could not be parsed at all.
    #[error("Malformed header section: {0}")]
    MalformedHeaders(#[from] mailparse::MailParseError),

    /// A recipient header is present but is not a valid address list.
    #[error("Unable to parse \"{header}\" header: {reason}")]
    InvalidAddressList { header: &'static str, reason: String },
}

/// Specialized `Result` type for spool operations.
pub type Result<T> = std::result::Result<T, SpoolError>;
