//! Error types for the SMTP client.

use std::{io, time::Duration};

use thiserror::Error;

/// Errors that can occur while talking to the relay.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse an SMTP reply from the server.
    #[error("Failed to parse SMTP reply: {0}")]
    Parse(String),

    /// The server answered a command with a non-success reply.
    #[error("Server rejected {stage}: {code} {message}")]
    Rejected {
        stage: &'static str,
        code: u16,
        message: String,
    },

    /// A step did not complete within its configured timeout.
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    /// TLS negotiation failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Authentication could not be performed.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,
}

impl ClientError {
    /// Whether the relay refused the delivery outright (5xx reply).
    ///
    /// Everything else (4xx replies, network trouble, timeouts) is worth
    /// another attempt later.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Rejected { code, .. } if *code >= 500 && *code < 600)
    }
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
