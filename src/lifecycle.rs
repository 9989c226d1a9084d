//! Loop liveness publication and graceful-shutdown signalling.
//!
//! The loop owns a [`LifecycleTx`] and publishes its terminal state
//! exactly once, before it drops any observer-facing channel. Handles and
//! observers hold [`LifecycleRx`] clones and translate the terminal state
//! into the error their caller should see. Shutdown travels the other
//! way, over a separate watch channel, so stopping never contends with
//! the request inbox.

use tokio::sync::watch;
use tracing::error;
use tracing::info;

use crate::errors::Error;

/// What the loop task is currently doing.
#[derive(Debug, Clone, Default)]
pub(crate) enum LoopState {
    #[default]
    Running,
    /// Exited cleanly after a shutdown request.
    Stopped,
    /// Killed by a fatal error.
    Failed(Error),
}

pub(crate) fn lifecycle() -> (LifecycleTx, LifecycleRx) {
    let (tx, rx) = watch::channel(LoopState::Running);
    (LifecycleTx { state: tx }, LifecycleRx { state: rx })
}

/// Loop-side half: publishes the terminal state.
pub(crate) struct LifecycleTx {
    state: watch::Sender<LoopState>,
}

impl LifecycleTx {
    pub(crate) fn finish(&self, result: Result<(), Error>) {
        let state = match result {
            Ok(()) => {
                info!("watcher loop stopped");
                LoopState::Stopped
            }
            Err(e) => {
                error!(%e, "watcher loop died");
                LoopState::Failed(e)
            }
        };
        // Receivers may all be gone already; that is fine.
        let _ = self.state.send(state);
    }
}

/// Observer-side half: answers "why is the loop gone".
#[derive(Clone)]
pub(crate) struct LifecycleRx {
    state: watch::Receiver<LoopState>,
}

impl LifecycleRx {
    /// Error to surface once an observer finds the loop unreachable.
    ///
    /// The loop publishes its terminal state before tearing down any
    /// channel, so `Running` here only means the publication has not been
    /// observed yet; treat it as a clean stop.
    pub(crate) fn exit_error(&self) -> Error {
        match &*self.state.borrow() {
            LoopState::Running | LoopState::Stopped => Error::Stopped,
            LoopState::Failed(e) => e.clone(),
        }
    }

    /// `Some(error)` iff the loop died with a fatal error.
    pub(crate) fn fatal_error(&self) -> Option<Error> {
        match &*self.state.borrow() {
            LoopState::Failed(e) => Some(e.clone()),
            _ => None,
        }
    }
}

/// Requests a graceful stop of the loop.
pub(crate) struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

/// Loop-side receiver for the stop request.
pub(crate) struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

pub(crate) fn shutdown() -> (ShutdownSignal, ShutdownListener) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSignal { tx }, ShutdownListener { rx })
}

impl ShutdownSignal {
    /// Idempotent. The loop observes the signal on its next scheduling
    /// cycle.
    pub(crate) fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl ShutdownListener {
    /// Resolves once shutdown has been requested. Also resolves if the
    /// signalling side disappears, which only happens when the owning
    /// handle is dropped; treat that as a stop request too.
    pub(crate) async fn triggered(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
