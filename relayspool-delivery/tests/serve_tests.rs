//! The scan loop, driven through its control and shutdown channels
#![allow(clippy::unwrap_used)]

mod support;

use std::{path::Path, sync::Arc, time::Duration};

use chrono::TimeDelta;
use relayspool_common::{Control, Signal};
use relayspool_delivery::{DeliveryError, DeliveryProcessor, SystemError};
use support::{Harness, MSG, ScriptedTransport, eventually};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

const ONE_RECIPIENT: &[u8] = b"From: sender@x.test\r\nTo: a@x.test\r\n\r\nbody\r\n";

struct Running {
    controls: mpsc::Sender<Control>,
    shutdown: broadcast::Sender<Signal>,
    handle: JoinHandle<Result<(), DeliveryError>>,
}

impl Running {
    async fn stop(self) -> Result<(), DeliveryError> {
        self.shutdown.send(Signal::Shutdown).unwrap();
        self.handle.await.unwrap()
    }
}

fn serve(processor: &Arc<DeliveryProcessor>) -> Running {
    let (controls, control_rx) = mpsc::channel(8);
    let (shutdown, shutdown_rx) = broadcast::channel(4);
    let processor = Arc::clone(processor);
    let handle = tokio::spawn(async move { processor.serve(control_rx, shutdown_rx).await });

    Running {
        controls,
        shutdown,
        handle,
    }
}

/// Wait until the single recipient's first attempt has been recorded
async fn first_attempt_recorded(h: &Harness) {
    eventually(|| {
        h.processor
            .ledger()
            .get(Path::new(MSG))
            .is_some_and(|record| record.to[0].attempts == 1)
    })
    .await;
}

#[tokio::test]
async fn test_first_pass_runs_immediately_and_shutdown_persists() {
    let h = Harness::new(ScriptedTransport::new(), 100);
    h.spool.insert(MSG, ONE_RECIPIENT);

    let running = serve(&h.processor);
    eventually(|| h.transport.calls_to("a@x.test") == 1).await;

    running.stop().await.unwrap();

    let document = h.persisted();
    assert_eq!(document[MSG]["To"][0]["Status"], 2);
}

#[tokio::test]
async fn test_closed_shutdown_channel_stops_loop() {
    let h = Harness::new(ScriptedTransport::new(), 100);
    h.spool.insert(MSG, ONE_RECIPIENT);

    let running = serve(&h.processor);
    eventually(|| h.transport.calls_to("a@x.test") == 1).await;

    drop(running.shutdown);
    running.handle.await.unwrap().unwrap();
    assert_eq!(h.persisted()[MSG]["To"][0]["Status"], 2);
}

#[tokio::test]
async fn test_flush_request_retries_pending_recipient() {
    let h = Harness::new(
        ScriptedTransport::new().failing("a@x.test", "451 mailbox busy"),
        100,
    );
    h.spool.insert(MSG, ONE_RECIPIENT);

    let running = serve(&h.processor);
    first_attempt_recorded(&h).await;

    running.controls.send(Control::Flush).await.unwrap();
    eventually(|| h.transport.calls_to("a@x.test") == 2).await;

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_suspended_loop_resumes_on_flush() {
    let h = Harness::new(
        ScriptedTransport::new().failing("a@x.test", "451 mailbox busy"),
        100,
    );
    h.spool.insert(MSG, ONE_RECIPIENT);

    let running = serve(&h.processor);
    first_attempt_recorded(&h).await;

    running.controls.send(Control::Suspend).await.unwrap();
    running.controls.send(Control::Flush).await.unwrap();
    eventually(|| h.transport.calls_to("a@x.test") == 2).await;

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_suspend_stops_timer_passes_until_reload() {
    let h = Harness::with_interval(
        ScriptedTransport::new().failing("a@x.test", "451 mailbox busy"),
        100,
        1,
    );
    h.spool.insert(MSG, ONE_RECIPIENT);

    let running = serve(&h.processor);
    first_attempt_recorded(&h).await;
    eventually(|| h.persisted()[MSG]["To"][0]["Attempts"] == 1).await;

    running.controls.send(Control::Suspend).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.clock.advance(TimeDelta::minutes(2));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(h.transport.calls_to("a@x.test"), 1);

    running.controls.send(Control::Reload).await.unwrap();
    eventually(|| h.transport.calls_to("a@x.test") == 2).await;

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_reload_request_restores_snapshot() {
    let h = Harness::new(
        ScriptedTransport::new().failing("a@x.test", "451 mailbox busy"),
        100,
    );
    h.spool.insert(MSG, ONE_RECIPIENT);

    let running = serve(&h.processor);
    first_attempt_recorded(&h).await;
    eventually(|| h.persisted()[MSG]["To"][0]["Attempts"] == 1).await;

    h.processor.ledger().delete(Path::new(MSG));
    running.controls.send(Control::Reload).await.unwrap();
    eventually(|| h.processor.ledger().contains(Path::new(MSG))).await;

    running.stop().await.unwrap();
    assert_eq!(h.record(MSG).to[0].attempts, 1);
}

#[tokio::test]
async fn test_serve_requires_init() {
    let processor = Arc::new(DeliveryProcessor::default());
    let running = serve(&processor);

    let err = running.handle.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        DeliveryError::System(SystemError::NotInitialized(_))
    ));
}
