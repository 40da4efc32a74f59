//! Process signals and exit status.
//!
//! The first SIGINT or SIGTERM cancels the orchestrator's token. The run
//! loop then stops at its next state boundary and in-flight stages end
//! within their own timeout.

use std::{
    io,
    sync::{Arc, OnceLock},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Signal that asked the run to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
}

impl StopSignal {
    pub fn name(self) -> &'static str {
        match self {
            StopSignal::Interrupt => "SIGINT",
            StopSignal::Terminate => "SIGTERM",
        }
    }

    /// Status for a run this signal cut short, `128 + signo` as shells report it.
    pub fn exit_code(self) -> ExitCode {
        match self {
            StopSignal::Interrupt => ExitCode::Interrupted,
            StopSignal::Terminate => ExitCode::Terminated,
        }
    }
}

/// Cancels `token` on the first stop signal for as long as it is alive.
pub struct SignalGuard {
    token: CancellationToken,
    received: Arc<OnceLock<StopSignal>>,
    listener: JoinHandle<()>,
}

impl SignalGuard {
    /// Registers the handlers before returning, so a signal sent right after
    /// this call is never lost.
    pub fn install(token: CancellationToken) -> io::Result<Self> {
        let mut signals = Signals::register()?;
        let received = Arc::new(OnceLock::new());

        let cancel = token.clone();
        let seen = received.clone();
        let listener = tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                if seen.set(signal).is_ok() {
                    info!(signal = signal.name(), "Stop signal received, finishing in-flight stages");
                    cancel.cancel();
                } else {
                    warn!(signal = signal.name(), "Already stopping, in-flight stages end at their timeout");
                }
            }
        });

        Ok(Self {
            token,
            received,
            listener,
        })
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// First stop signal seen, if any.
    pub fn received(&self) -> Option<StopSignal> {
        self.received.get().copied()
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn register() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> Option<StopSignal> {
        tokio::select! {
            s = self.interrupt.recv() => s.map(|()| StopSignal::Interrupt),
            s = self.terminate.recv() => s.map(|()| StopSignal::Terminate),
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn register() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<StopSignal> {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Some(StopSignal::Interrupt),
            Err(e) => {
                warn!(error = %e, "Ctrl+C handler unavailable");
                None
            }
        }
    }
}

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    /// Watch folder lost or an external program missing.
    FatalEnvironment = 2,
    /// A one-shot scan stopped by SIGINT with files left unprocessed.
    Interrupted = 130,
    /// Same, stopped by SIGTERM.
    Terminated = 143,
}

impl ExitCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_u8())
    }
}
