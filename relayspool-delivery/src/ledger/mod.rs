//! The delivery ledger: spool file path to per-recipient progress.
//!
//! Records are mutated from the scan loop and from completing delivery
//! attempts, so every access goes through the map's per-entry locks. No
//! entry guard is ever held across an `.await` or while the whole map is
//! walked for a snapshot.

mod snapshot;

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;

pub use snapshot::StateFile;

use crate::{error::LedgerError, types::MailRecord};

#[derive(Debug, Clone)]
struct Tracked {
    record: MailRecord,
    /// Distinguishes a record from an earlier one stored under the same path
    generation: u64,
}

/// Concurrent map of spool file path to [`MailRecord`].
#[derive(Debug, Clone, Default)]
pub struct DeliveryLedger {
    records: Arc<DashMap<PathBuf, Tracked>>,
    generations: Arc<AtomicU64>,
}

impl DeliveryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    /// A copy of the record for `key`
    pub fn get(&self, key: &Path) -> Option<MailRecord> {
        self.records.get(key).map(|entry| entry.record.clone())
    }

    /// Insert or replace the record for `key`, returning its generation
    pub fn put(&self, key: impl Into<PathBuf>, record: MailRecord) -> u64 {
        let generation = self.next_generation();
        self.records
            .insert(key.into(), Tracked { record, generation });
        generation
    }

    pub fn delete(&self, key: &Path) -> Option<MailRecord> {
        self.records.remove(key).map(|(_, tracked)| tracked.record)
    }

    pub fn contains(&self, key: &Path) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Tracked spool paths, sorted
    pub fn keys(&self) -> Vec<PathBuf> {
        let mut keys: Vec<PathBuf> = self
            .records
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Generation of the record currently stored under `key`
    #[cfg(test)]
    pub(crate) fn generation(&self, key: &Path) -> Option<u64> {
        self.records.get(key).map(|entry| entry.generation)
    }

    /// Mutate the record for `key` in place.
    ///
    /// `f` runs under the entry lock and must not touch the ledger.
    pub(crate) fn update<R>(
        &self,
        key: &Path,
        f: impl FnOnce(&mut MailRecord, u64) -> R,
    ) -> Option<R> {
        self.records.get_mut(key).map(|mut entry| {
            let tracked = entry.value_mut();
            f(&mut tracked.record, tracked.generation)
        })
    }

    /// Mutate every record in place, one entry lock at a time
    pub(crate) fn update_all(&self, mut f: impl FnMut(&mut MailRecord)) {
        for mut entry in self.records.iter_mut() {
            f(&mut entry.value_mut().record);
        }
    }

    /// Replace the whole content with that of `other`
    pub(crate) fn replace_with(&self, other: &Self) {
        self.records.clear();
        for entry in other.records.iter() {
            self.put(entry.key().clone(), entry.record.clone());
        }
    }

    /// Serialise the ledger to the persisted document format
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails.
    pub fn snapshot(&self) -> Result<Vec<u8>, LedgerError> {
        let records: Vec<(PathBuf, MailRecord)> = self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.record.clone()))
            .collect();

        snapshot::encode(records)
    }

    /// Rebuild a ledger from a persisted document.
    ///
    /// Recipients recorded as in flight are reset to pending, with their
    /// attempt count and schedule untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid snapshot.
    pub fn restore(bytes: &[u8]) -> Result<Self, LedgerError> {
        let ledger = Self::new();
        for (key, record) in snapshot::decode(bytes)? {
            ledger.put(key, record);
        }
        Ok(ledger)
    }
}
