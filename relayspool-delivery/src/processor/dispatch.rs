//! One pass over one spool file

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use relayspool_common::internal;
use relayspool_spool::{Spool, SpooledMessage};

use super::DeliveryProcessor;
use crate::{
    clock::Clock,
    error::{DeliveryError, TransportError},
    ledger::{DeliveryLedger, StateFile},
    policy::RetryPolicy,
    transport::Transport,
    types::{MailRecord, RecipientState, Role},
};

/// What a single `process` call did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Attempts started by this call
    pub launched: usize,
    /// Whether the spool file was removed
    pub removed: bool,
}

/// What a running attempt needs once the pass that launched it is gone
#[derive(Debug, Clone)]
struct AttemptContext {
    ledger: DeliveryLedger,
    state: Arc<StateFile>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

/// A recipient that has been marked in flight
#[derive(Debug)]
struct Attempt {
    key: PathBuf,
    generation: u64,
    role: Role,
    index: usize,
    address: String,
}

impl DeliveryProcessor {
    /// Process one spool file.
    ///
    /// Parses the file, starts tracking it if it is new, checkpoints the
    /// ledger, then marks every due recipient in flight and launches an
    /// attempt for each. Attempts finish in the background. If every
    /// recipient is already done the file is removed, and the record with
    /// it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed. Nothing is
    /// recorded for the file in that case.
    #[tracing::instrument(level = "trace", skip_all, fields(path = %path.display()))]
    pub async fn process(&self, path: &Path) -> Result<ProcessOutcome, DeliveryError> {
        let spool = self.spool()?;
        let context = AttemptContext {
            ledger: self.ledger.clone(),
            state: Arc::clone(self.state()?),
            transport: Arc::clone(self.transport()?),
            clock: Arc::clone(&self.clock),
            retry: self.retry.clone(),
        };

        let raw = spool.read(path).await?;
        let message = SpooledMessage::parse(&raw)?;
        let now = self.clock.now();

        if !self.ledger.contains(path) {
            self.ledger.put(
                path,
                MailRecord::new(
                    message.from.as_str(),
                    &message.to,
                    &message.cc,
                    &message.bcc,
                    now,
                ),
            );
            internal!(
                level = DEBUG,
                recipients = message.recipient_count(),
                "Tracking new spool file {}",
                path.display()
            );
        }

        self.checkpoint().await;

        let marked = self.ledger.update(path, |record, generation| {
            let mut due = Vec::new();
            for role in Role::ALL {
                for (index, status) in record.recipients_mut(role).iter_mut().enumerate() {
                    if RetryPolicy::eligible_now(status, now) {
                        status.state = RecipientState::InFlight;
                        due.push(Attempt {
                            key: path.to_path_buf(),
                            generation,
                            role,
                            index,
                            address: status.address.clone(),
                        });
                    }
                }
            }
            (due, record.is_drained())
        });

        let Some((due, drained)) = marked else {
            return Ok(ProcessOutcome::default());
        };

        let launched = due.len();
        if launched > 0 {
            let sender: Arc<str> = Arc::from(message.from.as_str());
            let mut in_flight = self.in_flight.lock().await;
            for attempt in due {
                in_flight.spawn(attempt.run(
                    context.clone(),
                    Arc::clone(&sender),
                    Arc::clone(&message.payload),
                ));
            }
        }

        let removed = drained && self.remove_drained(&**spool, path).await;

        Ok(ProcessOutcome { launched, removed })
    }

    /// Remove a fully delivered spool file and forget it.
    ///
    /// If the file cannot be removed the record stays, so the file is not
    /// lost track of while it is still on disk.
    async fn remove_drained(&self, spool: &dyn Spool, path: &Path) -> bool {
        if let Err(e) = spool.remove(path).await {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Unable to remove delivered spool file, will retry next pass"
            );
            return false;
        }

        if let Some(record) = self.ledger.delete(path) {
            let failed = record
                .iter()
                .filter(|status| status.last_error.is_some())
                .count();
            tracing::info!(
                path = %path.display(),
                abandoned = failed,
                "All recipients done, removed spool file"
            );
        }

        self.checkpoint().await;
        true
    }
}

impl Attempt {
    async fn run(self, context: AttemptContext, sender: Arc<str>, payload: Arc<[u8]>) {
        let result = context.transport.send(&sender, &self.address, &payload).await;
        let now = context.clock.now();

        let applied = context
            .ledger
            .update(&self.key, |record, generation| {
                if generation != self.generation {
                    return None;
                }
                let status = record.recipients_mut(self.role).get_mut(self.index)?;
                if status.address != self.address || status.state != RecipientState::InFlight {
                    return None;
                }

                match &result {
                    Ok(()) => RetryPolicy::apply_success(status),
                    Err(e) => context.retry.apply_failure(status, e.to_string(), now),
                }
                Some((status.state, status.attempts))
            })
            .flatten();

        let Some((state, attempts)) = applied else {
            internal!(
                level = DEBUG,
                recipient = %self.address,
                "Discarding attempt result for {}, recipient no longer in flight",
                self.key.display()
            );
            return;
        };

        self.log_outcome(&result, state, attempts);

        if let Err(e) = context.state.save(&context.ledger).await {
            tracing::error!(error = %e, "Unable to persist ledger snapshot");
        }
    }

    fn log_outcome(&self, result: &Result<(), TransportError>, state: RecipientState, attempts: u32) {
        let path = self.key.display();
        match result {
            Ok(()) => tracing::info!(
                path = %path,
                recipient = %self.address,
                role = %self.role,
                "Delivered"
            ),
            Err(e) if state == RecipientState::Done => tracing::warn!(
                path = %path,
                recipient = %self.address,
                attempt = attempts,
                error = %e,
                "Giving up on recipient after {attempts} attempts"
            ),
            Err(e) => tracing::info!(
                path = %path,
                recipient = %self.address,
                attempt = attempts,
                error = %e,
                "Delivery failed, will retry"
            ),
        }
    }
}
