//! Scan passes and the operator controls built on them

use relayspool_common::internal;

use super::DeliveryProcessor;
use crate::error::DeliveryError;

/// What a scan pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    /// Spool files handed to `process`
    pub files_seen: usize,
    /// Files that could not be read or parsed this pass
    pub files_failed: usize,
    pub attempts_launched: usize,
    pub files_removed: usize,
    /// Records dropped because their spool file disappeared
    pub records_reconciled: usize,
}

impl DeliveryProcessor {
    /// Run one pass over the spool.
    ///
    /// Drops records whose file has vanished, then processes every spool
    /// file in name order. A file that fails is logged and left for the next
    /// pass; it does not stop the pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the processor is not initialised or the spool
    /// cannot be listed.
    pub async fn scan(&self) -> Result<PassSummary, DeliveryError> {
        let spool = self.spool()?;
        let state = self.state()?;

        self.reap().await;

        let mut summary = PassSummary {
            records_reconciled: self.reconcile().await,
            ..PassSummary::default()
        };

        for path in spool.list().await? {
            if state.owns(&path) {
                continue;
            }

            summary.files_seen += 1;
            match self.process(&path).await {
                Ok(outcome) => {
                    summary.attempts_launched += outcome.launched;
                    summary.files_removed += usize::from(outcome.removed);
                }
                Err(e) => {
                    summary.files_failed += 1;
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Unable to process spool file, will retry next pass"
                    );
                }
            }
        }

        internal!(
            level = DEBUG,
            files = summary.files_seen,
            failed = summary.files_failed,
            launched = summary.attempts_launched,
            removed = summary.files_removed,
            reconciled = summary.records_reconciled,
            "Scan pass finished"
        );

        Ok(summary)
    }

    /// Make every outstanding recipient due now, then run a pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass itself fails.
    pub async fn flush(&self) -> Result<PassSummary, DeliveryError> {
        let now = self.clock.now();
        self.ledger.update_all(|record| {
            for status in record.iter_mut().filter(|status| !status.is_done()) {
                status.next_attempt_at = now;
            }
        });
        self.checkpoint().await;

        self.scan().await
    }

    /// Replace the in-memory ledger with the persisted snapshot.
    ///
    /// A missing snapshot empties the ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot exists but cannot be read; the
    /// in-memory ledger is left as it was.
    pub async fn reload(&self) -> Result<(), DeliveryError> {
        let state = self.state()?;
        let restored = state.load().await?.unwrap_or_default();

        self.ledger.replace_with(&restored);
        tracing::info!(
            records = self.ledger.len(),
            "Reloaded ledger from {}",
            state.path().display()
        );
        Ok(())
    }
}
