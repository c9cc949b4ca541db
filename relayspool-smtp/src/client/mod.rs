//! Minimal async SMTP client.
//!
//! Supports plain TCP with an in-place STARTTLS upgrade, multi-line replies,
//! AUTH PLAIN and AUTH CRAM-MD5, and dot-stuffed DATA transmission.

mod auth;
mod error;
mod response;
mod smtp_client;

pub use auth::Credentials;
pub use error::{ClientError, Result};
pub use response::Response;
pub use smtp_client::SmtpClient;
