//! Outbound SMTP for the relay queue.
//!
//! [`client::SmtpClient`] speaks the protocol one command at a time;
//! [`SmtpTransaction`] drives a complete single-recipient delivery against
//! the configured relay, including opportunistic STARTTLS and optional
//! authentication.

pub mod client;
mod transaction;

pub use client::{ClientError, Credentials, Response, SmtpClient};
pub use transaction::{SmtpTransaction, TransactionConfig};
