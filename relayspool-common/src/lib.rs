pub mod logging;

pub use tracing;

/// Process-wide lifecycle signal, broadcast to every long running task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}

/// Operator control requests for the scan loop.
///
/// These arrive from the OS signal plumbing in the binary, but the scan loop
/// only ever sees this enum so it can be driven directly from tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Make every pending recipient eligible now and run a pass immediately
    Flush,
    /// Replace the in-memory ledger with the last persisted snapshot
    Reload,
    /// Stop starting new scan passes until resumed by `Flush` or `Reload`
    Suspend,
}

impl Control {
    /// Whether this request takes the scan loop out of the suspended state
    #[must_use]
    pub const fn resumes(self) -> bool {
        matches!(self, Self::Flush | Self::Reload)
    }
}

impl std::fmt::Display for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Flush => "flush",
            Self::Reload => "reload",
            Self::Suspend => "suspend",
        })
    }
}
