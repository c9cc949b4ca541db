//! Delivery processor orchestration

mod dispatch;
mod reconcile;
mod scan;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use relayspool_common::{Control, Signal, internal};
use relayspool_spool::Spool;
use serde::Deserialize;
use tokio::{
    sync::{Mutex, broadcast, mpsc},
    task::{JoinError, JoinSet},
    time::MissedTickBehavior,
};

pub use dispatch::ProcessOutcome;
pub use scan::PassSummary;

use crate::{
    clock::{self, Clock},
    error::{DeliveryError, SystemError},
    ledger::{DeliveryLedger, StateFile},
    policy::RetryPolicy,
    transport::Transport,
};

const fn default_scan_interval() -> u64 {
    10
}

const fn default_shutdown_grace() -> u64 {
    30
}

/// Whether the timer drives scan passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Running,
    Suspended,
}

impl ScanMode {
    /// Mode after handling `control`
    #[must_use]
    pub const fn on(self, control: Control) -> Self {
        match control {
            Control::Suspend => Self::Suspended,
            _ if control.resumes() => Self::Running,
            _ => self,
        }
    }
}

/// Drives delivery of everything in the spool.
///
/// Configuration is deserialisable so it can be read straight from a config
/// file; the collaborators are supplied through [`DeliveryProcessor::init`].
#[derive(Debug, Deserialize)]
pub struct DeliveryProcessor {
    /// Seconds between scan passes
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Where the ledger snapshot lives. Must be set before `init`.
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    /// How long shutdown waits for running attempts
    ///
    /// Default: 30 seconds
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    #[serde(skip)]
    pub(crate) spool: Option<Arc<dyn Spool>>,

    #[serde(skip)]
    pub(crate) transport: Option<Arc<dyn Transport>>,

    #[serde(skip, default = "clock::system")]
    pub(crate) clock: Arc<dyn Clock>,

    #[serde(skip)]
    pub(crate) ledger: DeliveryLedger,

    #[serde(skip)]
    pub(crate) state: Option<Arc<StateFile>>,

    /// Attempts launched and not yet reaped
    #[serde(skip)]
    pub(crate) in_flight: Mutex<JoinSet<()>>,
}

impl Default for DeliveryProcessor {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            retry: RetryPolicy::default(),
            state_file: None,
            shutdown_grace_secs: default_shutdown_grace(),
            spool: None,
            transport: None,
            clock: clock::system(),
            ledger: DeliveryLedger::new(),
            state: None,
            in_flight: Mutex::default(),
        }
    }
}

impl DeliveryProcessor {
    /// Attach the spool and the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if no state file has been configured.
    pub fn init(
        &mut self,
        spool: Arc<dyn Spool>,
        transport: Arc<dyn Transport>,
    ) -> Result<(), DeliveryError> {
        internal!("Initialising Delivery Processor ...");

        let Some(state_file) = &self.state_file else {
            return Err(
                SystemError::Configuration("No ledger state file configured".to_string()).into(),
            );
        };

        self.state = Some(Arc::new(StateFile::new(state_file)));
        self.spool = Some(spool);
        self.transport = Some(transport);

        internal!(
            "Delivery processor initialised: scan every {}s, max {} attempts, state file {}",
            self.scan_interval_secs,
            self.retry.max_attempts,
            state_file.display()
        );

        Ok(())
    }

    /// Use `clock` instead of the system clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub const fn ledger(&self) -> &DeliveryLedger {
        &self.ledger
    }

    pub fn state_path(&self) -> Option<&Path> {
        self.state.as_deref().map(StateFile::path)
    }

    fn not_initialised() -> DeliveryError {
        SystemError::NotInitialized(
            "Delivery processor not initialized. Call init() first.".to_string(),
        )
        .into()
    }

    pub(crate) fn spool(&self) -> Result<&Arc<dyn Spool>, DeliveryError> {
        self.spool.as_ref().ok_or_else(Self::not_initialised)
    }

    pub(crate) fn transport(&self) -> Result<&Arc<dyn Transport>, DeliveryError> {
        self.transport.as_ref().ok_or_else(Self::not_initialised)
    }

    pub(crate) fn state(&self) -> Result<&Arc<StateFile>, DeliveryError> {
        self.state.as_ref().ok_or_else(Self::not_initialised)
    }

    /// Persist the ledger, logging rather than failing
    pub(crate) async fn checkpoint(&self) {
        let Ok(state) = self.state() else {
            return;
        };

        if let Err(e) = state.save(&self.ledger).await {
            tracing::error!(error = %e, "Unable to persist ledger snapshot");
        }
    }

    /// Load the last snapshot at startup and write it back out.
    ///
    /// An unreadable snapshot is logged and the ledger starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the processor has not been initialised.
    pub async fn recover(&self) -> Result<(), DeliveryError> {
        let state = self.state()?;

        match state.load().await {
            Ok(Some(restored)) => {
                self.ledger.replace_with(&restored);
                tracing::info!(
                    records = self.ledger.len(),
                    "Restored ledger from {}",
                    state.path().display()
                );
            }
            Ok(None) => {
                internal!("No ledger snapshot at {}, starting empty", state.path().display());
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Unable to read ledger snapshot at {}, starting empty",
                    state.path().display()
                );
            }
        }

        self.checkpoint().await;
        Ok(())
    }

    /// Run the scan loop until shutdown.
    ///
    /// The first pass happens immediately, then every `scan_interval_secs`
    /// while running. `controls` carries operator requests: flush, reload
    /// and suspend.
    ///
    /// ## Graceful Shutdown
    ///
    /// When a shutdown signal is received:
    /// 1. Stop starting passes
    /// 2. Wait up to `shutdown_grace_secs` for running attempts
    /// 3. Write a final snapshot
    ///
    /// Attempts still running at the deadline are abandoned; they are
    /// recorded as in flight and become pending on the next start.
    ///
    /// # Errors
    ///
    /// Returns an error if the processor has not been initialised.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn serve(
        &self,
        mut controls: mpsc::Receiver<Control>,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), DeliveryError> {
        internal!("Delivery processor starting");

        self.spool()?;
        self.transport()?;
        self.recover().await?;

        let mut timer =
            tokio::time::interval(Duration::from_secs(self.scan_interval_secs.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut mode = ScanMode::Running;

        loop {
            tokio::select! {
                _ = timer.tick(), if mode == ScanMode::Running => {
                    self.run_pass().await;
                }
                Some(control) = controls.recv() => {
                    mode = mode.on(control);
                    internal!(level = INFO, "Received {control} request, scan loop {mode:?}");
                    self.handle_control(control).await;
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) => {
                            internal!("Delivery processor received shutdown signal");
                        }
                        Err(e) => {
                            tracing::error!("Delivery processor shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        let grace = Duration::from_secs(self.shutdown_grace_secs);
        if tokio::time::timeout(grace, self.wait_idle()).await.is_err() {
            tracing::warn!(
                "Shutdown timeout of {grace:?} exceeded, remaining attempts will be retried on restart"
            );
        } else {
            internal!("All in-flight attempts completed");
        }

        self.checkpoint().await;
        internal!("Delivery processor shutdown complete");
        Ok(())
    }

    async fn run_pass(&self) {
        match self.scan().await {
            Ok(summary) if summary.attempts_launched > 0 || summary.files_removed > 0 => {
                tracing::info!(
                    files = summary.files_seen,
                    launched = summary.attempts_launched,
                    removed = summary.files_removed,
                    "Scan pass complete"
                );
            }
            Ok(summary) => {
                tracing::debug!(files = summary.files_seen, "Scan pass complete, nothing due");
            }
            Err(e) => {
                tracing::error!("Error scanning spool: {e}");
            }
        }
    }

    async fn handle_control(&self, control: Control) {
        match control {
            Control::Flush => {
                if let Err(e) = self.flush().await {
                    tracing::error!("Error flushing queue: {e}");
                }
            }
            Control::Reload => {
                if let Err(e) = self.reload().await {
                    tracing::error!("Unable to reload ledger, keeping in-memory state: {e}");
                }
            }
            Control::Suspend => {}
        }
    }

    /// Wait for every launched attempt to finish and record its outcome
    pub async fn wait_idle(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.in_flight.lock().await);
            if tasks.is_empty() {
                return;
            }

            while let Some(result) = tasks.join_next().await {
                log_join(result);
            }
        }
    }

    /// Collect attempts that have already finished
    pub(crate) async fn reap(&self) {
        let mut tasks = self.in_flight.lock().await;
        while let Some(result) = tasks.try_join_next() {
            log_join(result);
        }
    }
}

fn log_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Delivery attempt task failed");
    }
}
