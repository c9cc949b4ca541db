//! Typed error handling for the delivery core.
//!
//! Only [`TransportError`] feeds into the per-recipient retry state; the
//! remaining errors are reported per file or per pass and never take the
//! process down.

use std::path::PathBuf;

use relayspool_spool::{MessageError, SpoolError};
use thiserror::Error;

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Reading, removing or listing spool files failed.
    #[error("Spool error: {0}")]
    Spool(#[from] SpoolError),

    /// A spool file could not be parsed into a message.
    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    /// The persisted ledger could not be read or written.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// System-level error (configuration, initialisation).
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Persistence errors for the ledger snapshot.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid ledger snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// System-level errors that indicate internal problems.
#[derive(Debug, Error)]
pub enum SystemError {
    /// Delivery processor not initialized.
    #[error("Delivery processor not initialized: {0}")]
    NotInitialized(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// A failed send of one message to one recipient.
///
/// Both kinds count as a failed attempt; the split only shows up in logs and
/// in the recorded error text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Worth retrying (4xx reply, network trouble, timeout).
    #[error("Temporary failure: {0}")]
    Temporary(String),

    /// Refused by the relay (5xx reply).
    #[error("Permanent failure: {0}")]
    Permanent(String),
}

impl TransportError {
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}
