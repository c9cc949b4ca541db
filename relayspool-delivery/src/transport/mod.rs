//! The outbound side: sending one message to one recipient.

mod smtp;

use async_trait::async_trait;

pub use smtp::{SmtpSettings, SmtpTransport};

use crate::error::TransportError;

/// Delivers a payload to a single recipient via the configured relay.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send `payload` from `sender` (empty for the null reverse path) to
    /// `recipient`.
    ///
    /// # Errors
    ///
    /// Any failure; the caller treats every error as a failed attempt.
    async fn send(
        &self,
        sender: &str,
        recipient: &str,
        payload: &[u8],
    ) -> Result<(), TransportError>;
}
