//! Shared fixtures for delivery integration tests
#![allow(dead_code, clippy::unwrap_used)]

use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use relayspool_delivery::{
    DeliveryProcessor, ManualClock, MailRecord, RetryPolicy, Transport, TransportError,
};
use relayspool_spool::MemorySpool;
use tokio::sync::Semaphore;

pub const MSG: &str = "/spool/msg-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub sender: String,
    pub recipient: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Rule {
    /// `None` fails forever
    remaining: Option<u32>,
    error: TransportError,
}

/// In-process transport with per-recipient scripted failures.
///
/// Every call is recorded when it starts. With a gate, calls then wait for a
/// permit before completing, which keeps attempts in flight.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    rules: Mutex<HashMap<String, Rule>>,
    sent: Mutex<Vec<Sent>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send to `recipient` fails
    pub fn failing(self, recipient: &str, error: &str) -> Self {
        self.rules.lock().insert(
            recipient.to_string(),
            Rule {
                remaining: None,
                error: TransportError::Temporary(error.to_string()),
            },
        );
        self
    }

    /// The first `times` sends to `recipient` fail
    pub fn failing_times(self, recipient: &str, times: u32, error: &str) -> Self {
        self.rules.lock().insert(
            recipient.to_string(),
            Rule {
                remaining: Some(times),
                error: TransportError::Temporary(error.to_string()),
            },
        );
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn calls_to(&self, recipient: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|sent| sent.recipient == recipient)
            .count()
    }

    fn outcome(&self, recipient: &str) -> Result<(), TransportError> {
        let mut rules = self.rules.lock();
        let Some(rule) = rules.get_mut(recipient) else {
            return Ok(());
        };

        match &mut rule.remaining {
            None => Err(rule.error.clone()),
            Some(0) => Ok(()),
            Some(remaining) => {
                *remaining -= 1;
                Err(rule.error.clone())
            }
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        sender: &str,
        recipient: &str,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        self.sent.lock().push(Sent {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            payload: payload.to_vec(),
        });
        let outcome = self.outcome(recipient);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        outcome
    }
}

pub fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub struct Harness {
    pub processor: Arc<DeliveryProcessor>,
    pub spool: MemorySpool,
    pub clock: ManualClock,
    pub transport: Arc<ScriptedTransport>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(transport: ScriptedTransport, max_attempts: u32) -> Self {
        Self::with_interval(transport, max_attempts, 3600)
    }

    pub fn with_interval(transport: ScriptedTransport, max_attempts: u32, secs: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let spool = MemorySpool::new();
        let clock = ManualClock::new(start());
        let transport = Arc::new(transport);

        let mut processor = DeliveryProcessor::default().with_clock(Arc::new(clock.clone()));
        processor.scan_interval_secs = secs;
        processor.retry = RetryPolicy::new(max_attempts);
        processor.state_file = Some(dir.path().join(".queue-state"));
        processor.shutdown_grace_secs = 5;
        processor
            .init(Arc::new(spool.clone()), Arc::clone(&transport) as Arc<dyn Transport>)
            .unwrap();

        Self {
            processor: Arc::new(processor),
            spool,
            clock,
            transport,
            dir,
        }
    }

    /// A fresh processor over the same spool, transport and state file, as
    /// after a restart. It has not recovered yet.
    pub fn restart(&self) -> Arc<DeliveryProcessor> {
        let mut processor =
            DeliveryProcessor::default().with_clock(Arc::new(self.clock.clone()));
        processor.retry = self.processor.retry.clone();
        processor.state_file = Some(self.state_path());
        processor
            .init(
                Arc::new(self.spool.clone()),
                Arc::clone(&self.transport) as Arc<dyn Transport>,
            )
            .unwrap();
        Arc::new(processor)
    }

    pub fn record(&self, key: &str) -> MailRecord {
        self.processor.ledger().get(Path::new(key)).unwrap()
    }

    pub fn state_path(&self) -> std::path::PathBuf {
        self.dir.path().join(".queue-state")
    }

    pub fn persisted(&self) -> serde_json::Value {
        serde_json::from_slice(&std::fs::read(self.state_path()).unwrap()).unwrap()
    }
}

/// Poll `condition` until it holds, failing the test after five seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}
