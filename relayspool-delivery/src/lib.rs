//! Delivery core for the relay queue
//!
//! This crate tracks, per spool file and per recipient, what has been sent,
//! what is waiting and what has been given up on:
//! - [`DeliveryLedger`]: the record of progress, persisted as a JSON snapshot
//! - [`RetryPolicy`]: when a pending recipient may be tried again
//! - [`DeliveryProcessor`]: scan passes, dispatch of concurrent attempts and
//!   removal of drained spool files
//! - [`Transport`]: the outbound send, with an SMTP implementation

mod clock;
mod error;
pub mod ledger;
pub mod policy;
mod processor;
mod transport;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DeliveryError, LedgerError, SystemError, TransportError};
pub use ledger::{DeliveryLedger, StateFile};
pub use policy::RetryPolicy;
pub use processor::{DeliveryProcessor, PassSummary, ProcessOutcome, ScanMode};
pub use transport::{SmtpSettings, SmtpTransport, Transport};
pub use types::{MailRecord, RecipientState, RecipientStatus, Role, UnknownState};
