//! Single-flight convergence of the whole dependency set.
//!
//! Callers that need every declared dependency to be consistent call
//! [`TrackingQueue::converge`]. The queue holds a one-slot request channel:
//! the first caller starts a pass, and callers arriving while that pass is
//! pending or running join it instead of queueing another scan. Once a pass
//! completes, the next caller starts a fresh one.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::{QueueError, Result};
use super::pass::{PassReport, PassRunner};
use crate::report::ReportSink;
use crate::resolve::Resolver;
use crate::source::DeclarationSource;
use crate::util::Completion;

type PassSignal = Arc<Completion<Result<PassReport>>>;

/// Handle to a running tracking queue.
pub struct TrackingQueue {
    slot: mpsc::Sender<PassSignal>,
    current: Arc<Mutex<Option<PassSignal>>>,
    cancel: CancellationToken,
}

impl TrackingQueue {
    /// Start a tracking queue whose worker runs in a child scope of `parent`.
    pub fn spawn(
        resolver: Arc<dyn Resolver>,
        source: Arc<dyn DeclarationSource>,
        sink: Arc<dyn ReportSink>,
        parent: &CancellationToken,
    ) -> Self {
        let (slot, receiver) = mpsc::channel(1);
        let current = Arc::new(Mutex::new(None));
        let cancel = parent.child_token();
        let runner = PassRunner {
            resolver,
            source,
            sink,
        };
        tokio::spawn(run_passes(runner, receiver, current.clone(), cancel.clone()));
        Self {
            slot,
            current,
            cancel,
        }
    }

    /// Wait until a convergence pass that this call started or joined is done.
    ///
    /// Fails with [`QueueError::Cancelled`] if the queue's scope is cancelled
    /// first, and with [`QueueError::Closed`] if the worker has stopped.
    pub async fn converge(&self) -> Result<PassReport> {
        let signal = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            match current.as_ref() {
                Some(pass) => {
                    debug!("joining in-flight convergence pass");
                    pass.clone()
                }
                None => {
                    if self.cancel.is_cancelled() {
                        return Err(QueueError::Cancelled);
                    }
                    let pass: PassSignal = Arc::new(Completion::new());
                    // The slot is empty whenever no pass is current.
                    self.slot
                        .try_send(pass.clone())
                        .map_err(|_| QueueError::Closed)?;
                    *current = Some(pass.clone());
                    pass
                }
            }
        };

        tokio::select! {
            result = signal.wait() => result,
            _ = self.cancel.cancelled() => Err(QueueError::Cancelled),
        }
    }

    /// True while a pass is pending or running.
    pub fn is_converging(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Cancel the queue's scope. The running pass stops and waiters fail.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

async fn run_passes(
    runner: PassRunner,
    mut receiver: mpsc::Receiver<PassSignal>,
    current: Arc<Mutex<Option<PassSignal>>>,
    cancel: CancellationToken,
) {
    loop {
        let pass = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            pass = receiver.recv() => match pass {
                Some(pass) => pass,
                None => break,
            },
        };

        let stale = runner.stale_set();
        debug!(dependencies = stale.len(), "convergence pass started");
        let report = runner.run(stale, &cancel).await;
        let result = if cancel.is_cancelled() {
            Err(QueueError::Cancelled)
        } else {
            Ok(report)
        };

        // Clear before completing: a caller arriving after this starts a new pass.
        {
            let mut slot = current.lock().unwrap_or_else(PoisonError::into_inner);
            *slot = None;
            pass.complete(result);
        }
    }

    receiver.close();
    let error = if cancel.is_cancelled() {
        QueueError::Cancelled
    } else {
        QueueError::Closed
    };
    if let Some(pass) = current
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
    {
        pass.complete(Err(error));
    }
}
