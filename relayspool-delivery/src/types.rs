//! Core types for per-recipient delivery tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Where a single recipient stands.
///
/// Persisted as an integer: 0 = pending, 1 = in flight, 2 = done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RecipientState {
    /// Waiting for `next_attempt_at`
    Pending,
    /// An attempt is running right now
    InFlight,
    /// Delivered, or abandoned after too many attempts
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown recipient status {0}")]
pub struct UnknownState(pub u8);

impl From<RecipientState> for u8 {
    fn from(state: RecipientState) -> Self {
        match state {
            RecipientState::Pending => 0,
            RecipientState::InFlight => 1,
            RecipientState::Done => 2,
        }
    }
}

impl TryFrom<u8> for RecipientState {
    type Error = UnknownState;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::InFlight),
            2 => Ok(Self::Done),
            other => Err(UnknownState(other)),
        }
    }
}

/// Header a recipient was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    To,
    Cc,
    Bcc,
}

impl Role {
    pub const ALL: [Self; 3] = [Self::To, Self::Cc, Self::Bcc];
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::To => "to",
            Self::Cc => "cc",
            Self::Bcc => "bcc",
        })
    }
}

/// Delivery progress for one recipient of one spool file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientStatus {
    #[serde(rename = "Address")]
    pub address: String,

    #[serde(rename = "Status")]
    pub state: RecipientState,

    #[serde(rename = "Attempts")]
    pub attempts: u32,

    /// Not eligible before this instant
    #[serde(rename = "NextAttempt")]
    pub next_attempt_at: DateTime<Utc>,

    /// Last failure, cleared on success; kept when the recipient is abandoned
    #[serde(
        rename = "Error",
        default,
        serialize_with = "none_as_empty",
        deserialize_with = "empty_as_none"
    )]
    pub last_error: Option<String>,
}

impl RecipientStatus {
    /// A recipient that has never been tried and is eligible from `now`
    #[must_use]
    pub fn new(address: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            address: address.into(),
            state: RecipientState::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
        }
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.state, RecipientState::Done)
    }
}

/// Everything tracked for one spool file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailRecord {
    pub from: String,
    pub to: Vec<RecipientStatus>,
    pub cc: Vec<RecipientStatus>,
    pub bcc: Vec<RecipientStatus>,
    /// When the file was first seen
    pub enqueued_at: DateTime<Utc>,
}

impl MailRecord {
    /// Fresh record with every recipient pending and eligible immediately
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        to: &[String],
        cc: &[String],
        bcc: &[String],
        now: DateTime<Utc>,
    ) -> Self {
        let statuses = |addresses: &[String]| {
            addresses
                .iter()
                .map(|address| RecipientStatus::new(address.as_str(), now))
                .collect()
        };

        Self {
            from: from.into(),
            to: statuses(to),
            cc: statuses(cc),
            bcc: statuses(bcc),
            enqueued_at: now,
        }
    }

    #[must_use]
    pub fn recipients(&self, role: Role) -> &[RecipientStatus] {
        match role {
            Role::To => &self.to,
            Role::Cc => &self.cc,
            Role::Bcc => &self.bcc,
        }
    }

    pub fn recipients_mut(&mut self, role: Role) -> &mut Vec<RecipientStatus> {
        match role {
            Role::To => &mut self.to,
            Role::Cc => &mut self.cc,
            Role::Bcc => &mut self.bcc,
        }
    }

    /// Every recipient across `to`, `cc` and `bcc`, in that order
    pub fn iter(&self) -> impl Iterator<Item = &RecipientStatus> {
        self.to.iter().chain(&self.cc).chain(&self.bcc)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RecipientStatus> {
        self.to
            .iter_mut()
            .chain(self.cc.iter_mut())
            .chain(self.bcc.iter_mut())
    }

    /// Whether every recipient is done, so the spool file may be removed
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.iter().all(RecipientStatus::is_done)
    }

    /// Recipients that are pending or in flight
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.iter().filter(|status| !status.is_done()).count()
    }
}

#[allow(clippy::ref_option, reason = "Signature is dictated by serde")]
fn none_as_empty<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(value.as_deref().unwrap_or_default())
}

fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|error| !error.is_empty()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_state_integer_codes() {
        assert_eq!(u8::from(RecipientState::Pending), 0);
        assert_eq!(u8::from(RecipientState::InFlight), 1);
        assert_eq!(u8::from(RecipientState::Done), 2);
        assert_eq!(RecipientState::try_from(1), Ok(RecipientState::InFlight));
        assert_eq!(RecipientState::try_from(7), Err(UnknownState(7)));
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = MailRecord::new(
            "a@example.org",
            &["b@example.org".to_string()],
            &[],
            &["c@example.org".to_string()],
            now(),
        );

        assert_eq!(record.pending_count(), 2);
        assert!(!record.is_drained());
        for status in record.iter() {
            assert_eq!(status.state, RecipientState::Pending);
            assert_eq!(status.attempts, 0);
            assert!(status.next_attempt_at <= record.enqueued_at);
        }
    }

    #[test]
    fn test_record_without_recipients_is_drained() {
        let record = MailRecord::new("a@example.org", &[], &[], &[], now());
        assert!(record.is_drained());
        assert_eq!(record.pending_count(), 0);
    }

    #[test]
    fn test_recipient_serialises_with_integer_status() {
        let mut status = RecipientStatus::new("b@example.org", now());
        status.state = RecipientState::Done;
        status.attempts = 2;

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "Address": "b@example.org",
                "Status": 2,
                "Attempts": 2,
                "NextAttempt": "2024-05-01T12:00:00Z",
                "Error": "",
            })
        );
    }

    #[test]
    fn test_recipient_error_empty_or_null_reads_as_none() {
        for error in [serde_json::json!(""), serde_json::Value::Null] {
            let status: RecipientStatus = serde_json::from_value(serde_json::json!({
                "Address": "b@example.org",
                "Status": 0,
                "Attempts": 0,
                "NextAttempt": "2024-05-01T12:00:00Z",
                "Error": error,
            }))
            .unwrap();
            assert_eq!(status.last_error, None);
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let result: Result<RecipientStatus, _> = serde_json::from_value(serde_json::json!({
            "Address": "b@example.org",
            "Status": 9,
            "Attempts": 0,
            "NextAttempt": "2024-05-01T12:00:00Z",
        }));
        assert!(result.is_err());
    }
}
