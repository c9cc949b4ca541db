//! Spool access for the relay queue
//!
//! This crate provides the two collaborators the delivery core depends on:
//! - [`Spool`]: enumerating, reading and removing spooled mail files
//! - [`SpooledMessage`]: parsing a spooled file into its envelope and the
//!   payload that is actually transmitted (with `Bcc` stripped)

pub mod backends;
pub mod error;
pub mod message;
pub mod r#trait;

pub use backends::{FileSpool, MemorySpool};
pub use error::{MessageError, Result, SpoolError, ValidationError};
pub use message::SpooledMessage;
pub use r#trait::Spool;
