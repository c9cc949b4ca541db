use std::sync::{Arc, LazyLock};

use relayspool_common::{Control, Signal, internal, logging};
use relayspool_delivery::{DeliveryProcessor, SmtpSettings, SmtpTransport};
use relayspool_spool::FileSpool;
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::{broadcast, mpsc},
};

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Everything the relay needs to run, fully resolved from the command line
/// and the optional config file.
#[derive(Debug)]
pub struct Relayspool {
    pub(crate) spool: FileSpool,
    pub(crate) smtp: SmtpSettings,
    pub(crate) delivery: DeliveryProcessor,
}

/// Translate OS signals into scan loop controls until asked to stop.
///
/// After broadcasting shutdown this keeps waiting, so the scan loop gets to
/// finish; a second CTRL+C forces the process down.
async fn signals(controls: mpsc::Sender<Control>) -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut urgent = signal(SignalKind::from_raw(libc::SIGURG))?;
    let mut stop = signal(SignalKind::from_raw(libc::SIGTSTP))?;

    loop {
        let control = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
                break;
            }
            _ = terminate.recv() => {
                internal!(level = INFO, "Terminate Signal received, shutting down");
                break;
            }
            _ = urgent.recv() => Control::Flush,
            _ = hangup.recv() => Control::Reload,
            _ = stop.recv() => Control::Suspend,
        };

        controls.send(control).await?;
    }

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    tokio::signal::ctrl_c().await?;
    tracing::warn!("Forcing shutdown, in-flight attempts are abandoned");

    Ok(())
}

impl Relayspool {
    /// Run the relay until it is told to stop
    ///
    /// # Errors
    ///
    /// Returns an error if the delivery processor cannot be initialised or
    /// the signal handlers cannot be installed.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(mut self) -> anyhow::Result<()> {
        logging::init();

        internal!(
            level = INFO,
            "Relaying {} through {}",
            self.spool.path().display(),
            self.smtp.addr
        );

        let transport = SmtpTransport::new(&self.smtp);
        self.delivery
            .init(Arc::new(self.spool), Arc::new(transport))?;

        let (controls, control_rx) = mpsc::channel(16);

        let ret = tokio::select! {
            r = self.delivery.serve(control_rx, SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = signals(controls) => {
                r
            }
        };

        internal!(level = INFO, "Shutting down...");

        ret
    }
}
