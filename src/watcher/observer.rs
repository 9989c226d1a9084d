//! Observer handle over the watcher loop.

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::trace;

use crate::entity::Delta;
use crate::errors::Result;
use crate::lifecycle::LifecycleRx;
use crate::watcher::all_watcher::WatchRequest;
use crate::watcher::all_watcher::WatcherId;

/// One observer's view of the shared state.
///
/// Minted by [`AllWatcherHandle::observe`]; holds nothing but the
/// observer's id and the loop's channels, so it is cheap and carries no
/// snapshot data. Not meant to be shared: `next` assumes a single
/// logical owner.
///
/// [`AllWatcherHandle::observe`]: crate::watcher::AllWatcherHandle::observe
pub struct StateWatcher {
    id: WatcherId,
    requests: mpsc::UnboundedSender<WatchRequest>,
    lifecycle: LifecycleRx,
    stopped: bool,
}

impl StateWatcher {
    pub(crate) fn new(
        id: WatcherId,
        requests: mpsc::UnboundedSender<WatchRequest>,
        lifecycle: LifecycleRx,
    ) -> Self {
        Self {
            id,
            requests,
            lifecycle,
            stopped: false,
        }
    }

    pub fn id(&self) -> WatcherId {
        self.id
    }

    /// Blocks until changes are available and returns them oldest first:
    /// everything that happened since the last successful `next`, or
    /// since the observer joined. The result is never empty.
    ///
    /// Fails with the stopped sentinel once this observer or the whole
    /// loop has been stopped, or with the loop's fatal error if the
    /// backing store killed it.
    pub async fn next(&mut self) -> Result<Vec<Delta>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = WatchRequest::Next {
            watcher: self.id,
            reply: reply_tx,
        };
        if self.requests.send(request).is_err() {
            return Err(self.lifecycle.exit_error());
        }
        match reply_rx.await {
            Ok(reply) => reply,
            // The loop tore down between accepting the request and
            // answering it.
            Err(_) => Err(self.lifecycle.exit_error()),
        }
    }

    /// Stops this observer. Idempotent. Returns once the loop has
    /// processed the stop (or has itself exited); after that no further
    /// delta will be delivered. Reports the loop's fatal error if it had
    /// already died of one.
    pub async fn stop(&mut self) -> Result<()> {
        self.stopped = true;
        let (done_tx, done_rx) = oneshot::channel();
        let request = WatchRequest::Stop {
            watcher: self.id,
            done: done_tx,
        };
        if self.requests.send(request).is_ok() {
            let _ = done_rx.await;
        }
        match self.lifecycle.fatal_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for StateWatcher {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        // Best effort: let the loop release this observer's refcounts.
        let (done_tx, _) = oneshot::channel();
        let _ = self.requests.send(WatchRequest::Stop {
            watcher: self.id,
            done: done_tx,
        });
        trace!(watcher = %self.id, "observer handle dropped, stop requested");
    }
}
