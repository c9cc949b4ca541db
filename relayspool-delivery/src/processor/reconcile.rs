use relayspool_common::internal;

use super::DeliveryProcessor;

impl DeliveryProcessor {
    /// Forget records whose spool file no longer exists.
    ///
    /// The file having been removed from outside is taken as abandonment,
    /// whatever state its recipients are in. Returns how many records were
    /// dropped.
    pub(crate) async fn reconcile(&self) -> usize {
        let Ok(spool) = self.spool() else {
            return 0;
        };

        let mut removed = 0;
        for key in self.ledger.keys() {
            match spool.exists(&key).await {
                Ok(true) => {}
                Ok(false) => {
                    if let Some(record) = self.ledger.delete(&key) {
                        removed += 1;
                        internal!(
                            level = INFO,
                            outstanding = record.pending_count(),
                            "Spool file {} disappeared, dropping its record",
                            key.display()
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        path = %key.display(),
                        error = %e,
                        "Unable to check spool file, keeping its record"
                    );
                }
            }
        }

        if removed > 0 {
            self.checkpoint().await;
        }

        removed
    }
}
