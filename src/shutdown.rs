//! Signal handling for the bootstrap run
//!
//! The first SIGINT or SIGTERM cancels the readiness wait so the run can
//! finish and write its summary. Any later signal exits the process, as does
//! a signal that arrives after the run has finished.

use tracing::warn;

use crate::k8s::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl Signal {
    /// Conventional `128 + signo` exit status
    pub fn exit_code(self) -> i32 {
        match self {
            Signal::Interrupt => 130,
            Signal::Terminate => 143,
        }
    }
}

/// What to do about a received signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// The wait was cancelled; let the run wind down
    Cancel,
    /// Leave now with the given status
    Exit(i32),
}

/// Decide how to react to `signal`. Cancels `cancel` the first time.
pub fn on_signal(cancel: &CancelToken, signal: Signal) -> SignalAction {
    if cancel.is_cancelled() {
        return SignalAction::Exit(signal.exit_code());
    }
    warn!(?signal, "Received shutdown signal, cancelling; send it again to exit");
    cancel.cancel();
    SignalAction::Cancel
}

/// Apply [`on_signal`] to every SIGINT or SIGTERM until the process exits
pub async fn handle_signals(cancel: CancelToken) {
    if let Err(e) = listen(&cancel).await {
        warn!("Cannot listen for shutdown signals: {}", e);
    }
}

#[cfg(unix)]
async fn listen(cancel: &CancelToken) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    loop {
        let signal = tokio::select! {
            _ = interrupt.recv() => Signal::Interrupt,
            _ = terminate.recv() => Signal::Terminate,
        };
        exit_if_repeated(cancel, signal);
    }
}

#[cfg(not(unix))]
async fn listen(cancel: &CancelToken) -> std::io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        exit_if_repeated(cancel, Signal::Interrupt);
    }
}

fn exit_if_repeated(cancel: &CancelToken, signal: Signal) {
    if let SignalAction::Exit(code) = on_signal(cancel, signal) {
        warn!(?signal, "Exiting on shutdown signal");
        std::process::exit(code);
    }
}
