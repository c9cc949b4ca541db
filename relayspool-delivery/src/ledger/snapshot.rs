//! Persisted form of the ledger.
//!
//! The document is a JSON object keyed by absolute spool path:
//!
//! ```json
//! {
//!   "/var/spool/relay/msg-1": {
//!     "From": "alice@example.org",
//!     "To": [{ "Address": "bob@example.com", "Status": 0, "Attempts": 1,
//!              "NextAttempt": "2024-05-01T12:01:00Z", "Error": "451 later" }],
//!     "Cc": [],
//!     "Bcc": [],
//!     "Attempts": 0,
//!     "Enqueued": "2024-05-01T12:00:00Z"
//!   }
//! }
//! ```
//!
//! The record-level `Attempts` is always written as zero and ignored when
//! read; per-recipient counts are authoritative.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use relayspool_common::internal;
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, sync::Mutex};

use super::DeliveryLedger;
use crate::{
    error::LedgerError,
    types::{MailRecord, RecipientState, RecipientStatus},
};

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RecordOut<'a> {
    from: &'a str,
    to: &'a [RecipientStatus],
    cc: &'a [RecipientStatus],
    bcc: &'a [RecipientStatus],
    attempts: u32,
    enqueued: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordIn {
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: Option<Vec<RecipientStatus>>,
    #[serde(default)]
    cc: Option<Vec<RecipientStatus>>,
    #[serde(default)]
    bcc: Option<Vec<RecipientStatus>>,
    enqueued: DateTime<Utc>,
}

impl From<RecordIn> for MailRecord {
    fn from(record: RecordIn) -> Self {
        let mut restored = Self {
            from: record.from,
            to: record.to.unwrap_or_default(),
            cc: record.cc.unwrap_or_default(),
            bcc: record.bcc.unwrap_or_default(),
            enqueued_at: record.enqueued,
        };

        // Nobody can tell whether an attempt running at the time of the
        // snapshot finished.
        for status in restored.iter_mut() {
            if status.state == RecipientState::InFlight {
                status.state = RecipientState::Pending;
            }
        }

        restored
    }
}

pub(super) fn encode(records: Vec<(PathBuf, MailRecord)>) -> Result<Vec<u8>, LedgerError> {
    let document: BTreeMap<String, RecordOut<'_>> = records
        .iter()
        .map(|(key, record)| {
            (
                key.to_string_lossy().into_owned(),
                RecordOut {
                    from: &record.from,
                    to: &record.to,
                    cc: &record.cc,
                    bcc: &record.bcc,
                    attempts: 0,
                    enqueued: record.enqueued_at,
                },
            )
        })
        .collect();

    Ok(serde_json::to_vec_pretty(&document)?)
}

pub(super) fn decode(bytes: &[u8]) -> Result<Vec<(PathBuf, MailRecord)>, LedgerError> {
    let document: BTreeMap<PathBuf, RecordIn> = serde_json::from_slice(bytes)?;
    Ok(document
        .into_iter()
        .map(|(key, record)| (key, MailRecord::from(record)))
        .collect())
}

/// The on-disk snapshot and the lock that serialises writers.
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    tmp_path: PathBuf,
    write_lock: Mutex<()>,
}

impl StateFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        Self {
            path,
            tmp_path,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `path` is the state file or its temporary sibling
    #[must_use]
    pub fn owns(&self, path: &Path) -> bool {
        path == self.path || path == self.tmp_path
    }

    /// Write a full snapshot of `ledger`, replacing the previous one.
    ///
    /// The snapshot is taken after acquiring the write lock, so a write that
    /// finishes later never carries older state than one that finished
    /// earlier. The temporary file is synced to disk before it replaces the
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be encoded or written.
    pub async fn save(&self, ledger: &DeliveryLedger) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().await;
        let bytes = ledger.snapshot()?;

        let mut file = tokio::fs::File::create(&self.tmp_path)
            .await
            .map_err(|e| LedgerError::io(&self.tmp_path, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| LedgerError::io(&self.tmp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| LedgerError::io(&self.tmp_path, e))?;
        drop(file);

        tokio::fs::rename(&self.tmp_path, &self.path)
            .await
            .map_err(|e| LedgerError::io(&self.path, e))?;

        internal!(
            records = ledger.len(),
            "Wrote ledger snapshot to {}",
            self.path.display()
        );
        Ok(())
    }

    /// Read the last snapshot. A missing file is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub async fn load(&self) -> Result<Option<DeliveryLedger>, LedgerError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LedgerError::io(&self.path, e)),
        };

        DeliveryLedger::restore(&bytes).map(Some)
    }
}
