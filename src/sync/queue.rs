//! Coalescing work queue for dependency resolution.
//!
//! Producers post requests on an unbounded channel and never wait. One
//! worker task owns the pending set and drains the channel in order, so
//! queue state needs no lock. A flush snapshots and clears the pending set
//! and then resolves the snapshot one dependency at a time; requests that
//! arrive meanwhile only affect the next flush.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::{QueueError, Result};
use super::pass::{PassReport, PassRunner};
use crate::model::DependencyId;
use crate::report::ReportSink;
use crate::resolve::Resolver;
use crate::source::{DeclarationEvent, DeclarationSource};

/// Lifecycle of a [`SyncQueue`]'s worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Waiting for requests.
    Idle,
    /// Processing requests.
    Draining,
    /// Stopped; further requests are rejected.
    Closed,
}

enum Request {
    MarkDirty(DependencyId),
    MarkClean(DependencyId),
    Flush(Option<oneshot::Sender<PassReport>>),
    ResyncAll(Option<oneshot::Sender<PassReport>>),
}

/// Handle to a running synchronization queue.
///
/// The worker stops when its scope is cancelled or when every handle has been
/// dropped.
pub struct SyncQueue {
    sender: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<QueueState>,
    cancel: CancellationToken,
}

impl SyncQueue {
    /// Start a queue whose worker runs in a child scope of `parent`.
    pub fn spawn(
        resolver: Arc<dyn Resolver>,
        source: Arc<dyn DeclarationSource>,
        sink: Arc<dyn ReportSink>,
        parent: &CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(QueueState::Idle);
        let cancel = parent.child_token();
        let worker = Worker {
            runner: PassRunner {
                resolver,
                source,
                sink,
            },
            receiver,
            state: state_tx,
            cancel: cancel.clone(),
            pending: BTreeSet::new(),
        };
        tokio::spawn(worker.run());
        Self {
            sender,
            state,
            cancel,
        }
    }

    /// Queue `id` for the next flush.
    pub fn mark_dirty(&self, id: DependencyId) -> Result<()> {
        self.send(Request::MarkDirty(id))
    }

    /// Drop `id` from the pending set if it has not been flushed yet.
    pub fn mark_clean(&self, id: DependencyId) -> Result<()> {
        self.send(Request::MarkClean(id))
    }

    /// Resolve everything pending, in the background.
    pub fn flush(&self) -> Result<()> {
        self.send(Request::Flush(None))
    }

    /// Replace the pending set with every stale dependency and resolve it,
    /// in the background.
    pub fn resync_all(&self) -> Result<()> {
        self.send(Request::ResyncAll(None))
    }

    /// Flush and wait for the report of this flush.
    pub async fn flush_and_wait(&self) -> Result<PassReport> {
        let (reply, receiver) = oneshot::channel();
        self.send(Request::Flush(Some(reply)))?;
        self.wait_for(receiver).await
    }

    /// Resync and wait for the report of this resync.
    pub async fn resync_all_and_wait(&self) -> Result<PassReport> {
        let (reply, receiver) = oneshot::channel();
        self.send(Request::ResyncAll(Some(reply)))?;
        self.wait_for(receiver).await
    }

    /// Feed a declaration change into the queue.
    pub fn apply_event(&self, event: &DeclarationEvent) -> Result<()> {
        match event {
            DeclarationEvent::Added(id) | DeclarationEvent::Changed(id) => {
                self.mark_dirty(id.clone())
            }
            DeclarationEvent::Removed(id) => self.mark_clean(id.clone()),
        }
    }

    pub fn state(&self) -> QueueState {
        *self.state.borrow()
    }

    /// Cancel the queue's scope. In-flight fetches stop and waiters fail.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the worker has stopped.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // An error means the worker is gone, which is also closed.
        let _ = state.wait_for(|s| *s == QueueState::Closed).await;
    }

    async fn wait_for(&self, receiver: oneshot::Receiver<PassReport>) -> Result<PassReport> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(QueueError::Cancelled),
            report = receiver => report.map_err(|_| self.stopped_error()),
        }
    }

    fn send(&self, request: Request) -> Result<()> {
        self.sender
            .send(request)
            .map_err(|_| self.stopped_error())
    }

    fn stopped_error(&self) -> QueueError {
        if self.cancel.is_cancelled() {
            QueueError::Cancelled
        } else {
            QueueError::Closed
        }
    }
}

struct Worker {
    runner: PassRunner,
    receiver: mpsc::UnboundedReceiver<Request>,
    state: watch::Sender<QueueState>,
    cancel: CancellationToken,
    pending: BTreeSet<DependencyId>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let request = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                request = self.receiver.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            self.state.send_replace(QueueState::Draining);
            self.handle(request).await;
            if self.cancel.is_cancelled() {
                break;
            }
            if self.receiver.is_empty() {
                self.state.send_replace(QueueState::Idle);
            }
        }

        self.receiver.close();
        self.state.send_replace(QueueState::Closed);
        info!(pending = self.pending.len(), "sync queue closed");
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::MarkDirty(id) => {
                self.pending.insert(id);
            }
            Request::MarkClean(id) => {
                self.pending.remove(&id);
            }
            Request::Flush(reply) => {
                let snapshot = std::mem::take(&mut self.pending);
                debug!(dependencies = snapshot.len(), "flushing");
                let report = self.runner.run(snapshot, &self.cancel).await;
                self.reply(reply, report);
            }
            Request::ResyncAll(reply) => {
                self.pending.clear();
                let stale = self.runner.stale_set();
                debug!(dependencies = stale.len(), "resyncing all stale dependencies");
                let report = self.runner.run(stale, &self.cancel).await;
                self.reply(reply, report);
            }
        }
    }

    fn reply(&self, reply: Option<oneshot::Sender<PassReport>>, report: PassReport) {
        // A cancelled pass is dropped so the waiter observes cancellation.
        if self.cancel.is_cancelled() {
            return;
        }
        if let Some(reply) = reply {
            let _ = reply.send(report);
        }
    }
}
