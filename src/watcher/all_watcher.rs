//! Single-writer loop owning the shared snapshot.
//!
//! Architecture: one spawned task serializes every mutation.
//!
//! ```text
//! Backing store:
//!   change stream -> mpsc -----------\
//!                                     v
//! AllWatcher task:                 select! -> changed()/handle() -> respond()
//!                                     ^                                |
//! Observers:                          |                                v
//!   next()/stop() -> request mpsc ----/          oneshot reply (deltas | stopped)
//! ```
//!
//! Observers never touch the snapshot; they marshal requests over a
//! single channel and block on a oneshot reply. The loop answers a
//! request only when the observer's delta set is non-empty, advances the
//! observer's revno, then settles the removal refcounts for the window it
//! just communicated.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;

use crate::backing::Backing;
use crate::config::WatcherConfig;
use crate::entity::Delta;
use crate::entity::EntityId;
use crate::errors::BackingError;
use crate::errors::Error;
use crate::errors::Result;
use crate::lifecycle::lifecycle;
use crate::lifecycle::shutdown;
use crate::lifecycle::LifecycleRx;
use crate::lifecycle::LifecycleTx;
use crate::lifecycle::ShutdownListener;
use crate::lifecycle::ShutdownSignal;
use crate::snapshot::AllInfo;
use crate::watcher::observer::StateWatcher;

/// Identifies one observer for the lifetime of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) type NextReply = oneshot::Sender<Result<Vec<Delta>>>;

/// One marshalled observer operation.
pub(crate) enum WatchRequest {
    /// Asks for the next non-empty batch of deltas. Queued FIFO per
    /// observer; only the oldest outstanding request is satisfied per
    /// respond pass.
    Next {
        watcher: WatcherId,
        reply: NextReply,
    },
    /// Stops the observer. Outstanding `Next` requests are failed with
    /// the stopped error, then `done` is acked. Idempotent.
    Stop {
        watcher: WatcherId,
        done: oneshot::Sender<()>,
    },
}

/// Per-observer state. Mutated only by the loop task.
#[derive(Debug, Default)]
struct ObserverState {
    /// Revno up to which the observer has been told everything.
    revno: u64,
    stopped: bool,
}

/// The loop itself. Constructed and consumed by [`AllWatcher::spawn`].
pub struct AllWatcher<B: Backing> {
    backing: Arc<B>,
    config: WatcherConfig,

    /// Everything the loop knows about. Exclusively owned.
    all: AllInfo,

    request_rx: mpsc::UnboundedReceiver<WatchRequest>,
    shutdown_rx: ShutdownListener,

    observers: HashMap<WatcherId, ObserverState>,

    /// Outstanding `Next` requests per observer, oldest first.
    waiting: HashMap<WatcherId, VecDeque<NextReply>>,
}

impl<B: Backing> AllWatcher<B> {
    /// Wires the channels, spawns the loop task and returns the handle
    /// observers are minted from.
    pub fn spawn(backing: Arc<B>, config: WatcherConfig) -> AllWatcherHandle {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = shutdown();
        let (lifecycle_tx, lifecycle_rx) = lifecycle();

        let watcher = AllWatcher {
            backing,
            config,
            all: AllInfo::new(),
            request_rx,
            shutdown_rx,
            observers: HashMap::new(),
            waiting: HashMap::new(),
        };
        let join = tokio::spawn(watcher.run(lifecycle_tx));

        AllWatcherHandle {
            request_tx,
            shutdown: shutdown_tx,
            lifecycle: lifecycle_rx,
            next_id: AtomicU64::new(1),
            join: Some(join),
        }
    }

    async fn run(mut self, lifecycle: LifecycleTx) {
        info!("watcher loop starting");
        let result = self.serve().await;
        // Publish the terminal state before any observer-facing channel
        // goes away so racing callers resolve the right error.
        lifecycle.finish(result.clone());
        self.teardown(&result);
        self.backing.unwatch().await;
    }

    async fn serve(&mut self) -> Result<()> {
        let (change_tx, mut change_rx) = mpsc::channel(self.config.change_buffer_size);
        // Subscribe before the initial load. Anything the stream delivers
        // while the load runs is re-applied afterwards; `changed` is
        // idempotent for both updates and removals.
        self.backing.watch(change_tx).await?;
        self.backing.load_all(&mut self.all).await?;
        debug!(
            entities = self.all.len(),
            revno = self.all.latest_revno(),
            "initial load complete"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.triggered() => {
                    info!("watcher loop shutdown requested");
                    return Ok(());
                }

                change = change_rx.recv() => {
                    match change {
                        Some(id) => self.changed(id).await?,
                        None => return Err(BackingError::ChangeStreamClosed.into()),
                    }
                }

                request = self.request_rx.recv() => {
                    match request {
                        Some(request) => self.handle(request),
                        None => {
                            // Every handle and observer is gone.
                            debug!("request channel closed, stopping");
                            return Ok(());
                        }
                    }
                }
            }
            self.respond();
        }
    }

    /// Refreshes the loop's idea of one entity after a change
    /// notification. Not-found becomes a removal; other fetch failures
    /// kill the loop.
    pub(crate) async fn changed(&mut self, id: EntityId) -> Result<()> {
        trace!(%id, "change notification");
        match self.backing.fetch(&id).await? {
            Some(info) => self.all.update(id, info),
            None => self.all.mark_removed(&id),
        }
        Ok(())
    }

    /// Processes one observer request.
    pub(crate) fn handle(&mut self, request: WatchRequest) {
        match request {
            WatchRequest::Next { watcher, reply } => {
                let state = self.observers.entry(watcher).or_default();
                if state.stopped {
                    debug!(%watcher, "next from stopped observer");
                    let _ = reply.send(Err(Error::Stopped));
                    return;
                }
                self.waiting.entry(watcher).or_default().push_back(reply);
            }
            WatchRequest::Stop { watcher, done } => {
                self.stop_observer(watcher);
                let _ = done.send(());
            }
        }
    }

    fn stop_observer(&mut self, watcher: WatcherId) {
        let state = self.observers.entry(watcher).or_default();
        if state.stopped {
            return;
        }
        state.stopped = true;
        let revno = state.revno;
        if let Some(queue) = self.waiting.remove(&watcher) {
            for reply in queue {
                let _ = reply.send(Err(Error::Stopped));
            }
        }
        debug!(%watcher, revno, "observer stopped");
        self.all.release(revno);
    }

    /// Answers every observer whose delta set is non-empty, oldest
    /// pending request first, then settles refcounts for the window just
    /// communicated.
    pub(crate) fn respond(&mut self) {
        let waiting: Vec<WatcherId> = self.waiting.keys().copied().collect();
        for watcher in waiting {
            let old_revno = self.observers.get(&watcher).map_or(0, |s| s.revno);
            let changes = self.all.changes_since(old_revno);
            if changes.is_empty() {
                continue;
            }
            let Some(queue) = self.waiting.get_mut(&watcher) else {
                continue;
            };
            let Some(reply) = queue.pop_front() else {
                self.waiting.remove(&watcher);
                continue;
            };
            if queue.is_empty() {
                self.waiting.remove(&watcher);
            }
            let new_revno = self.all.latest_revno();
            if let Some(state) = self.observers.get_mut(&watcher) {
                state.revno = new_revno;
            }
            trace!(%watcher, old_revno, new_revno, deltas = changes.len(), "responding");
            if reply.send(Ok(changes)).is_err() {
                // Caller abandoned the request mid-wait. The observer
                // still counts as told; it resyncs on reconnect.
                debug!(%watcher, "pending request abandoned by caller");
            }
            self.all.mark_seen(old_revno);
        }
    }

    /// Fails or releases everything still attached to the loop.
    fn teardown(&mut self, exit: &Result<()>) {
        let err = match exit {
            Ok(()) => Error::Stopped,
            Err(e) => e.clone(),
        };
        for (watcher, queue) in self.waiting.drain() {
            trace!(%watcher, "failing pending requests on teardown");
            for reply in queue {
                let _ = reply.send(Err(err.clone()));
            }
        }
        for state in self.observers.values_mut() {
            state.stopped = true;
        }
    }
}

/// Owner-side handle of a spawned loop: mints observers and stops the
/// loop. Dropping the handle also requests a graceful stop.
pub struct AllWatcherHandle {
    request_tx: mpsc::UnboundedSender<WatchRequest>,
    shutdown: ShutdownSignal,
    lifecycle: LifecycleRx,
    next_id: AtomicU64,
    join: Option<JoinHandle<()>>,
}

impl AllWatcherHandle {
    /// Registers a new observer starting from the beginning of history:
    /// its first `next` returns the whole current world.
    pub fn observe(&self) -> StateWatcher {
        let id = WatcherId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(watcher = %id, "observer registered");
        StateWatcher::new(id, self.request_tx.clone(), self.lifecycle.clone())
    }

    /// Gracefully stops the loop and every attached observer, waits for
    /// the loop to exit, and reports its fatal error if it had already
    /// died of one.
    pub async fn stop(&mut self) -> Result<()> {
        self.shutdown.trigger();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(%e, "watcher loop task failed to join");
            }
        }
        match self.lifecycle.fatal_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
impl WatcherId {
    pub(crate) fn for_test(id: u64) -> Self {
        WatcherId(id)
    }
}

#[cfg(test)]
impl<B: Backing> AllWatcher<B> {
    /// Builds a loop that is stepped by hand instead of spawned. The
    /// returned channels are live but unused unless the test drives
    /// `serve` itself.
    pub(crate) fn new_direct(backing: Arc<B>, config: WatcherConfig) -> (Self, DirectDriver) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = shutdown();
        let watcher = AllWatcher {
            backing,
            config,
            all: AllInfo::new(),
            request_rx,
            shutdown_rx,
            observers: HashMap::new(),
            waiting: HashMap::new(),
        };
        let driver = DirectDriver {
            request_tx,
            shutdown: shutdown_tx,
        };
        (watcher, driver)
    }

    pub(crate) fn all(&self) -> &AllInfo {
        &self.all
    }

    pub(crate) fn all_mut(&mut self) -> &mut AllInfo {
        &mut self.all
    }

    pub(crate) fn revno_of(&self, watcher: WatcherId) -> u64 {
        self.observers.get(&watcher).map_or(0, |s| s.revno)
    }

    pub(crate) fn pending_requests(&self, watcher: WatcherId) -> usize {
        self.waiting.get(&watcher).map_or(0, |q| q.len())
    }
}

/// Keeps a hand-driven loop's inbound channels alive.
#[cfg(test)]
#[allow(dead_code)]
pub(crate) struct DirectDriver {
    request_tx: mpsc::UnboundedSender<WatchRequest>,
    shutdown: ShutdownSignal,
}
