//! Status synchronizer - pushes lead state transitions to the record store
//!
//! Callers hold a cheap, cloneable [`StatusSync`] handle and submit
//! [`StatusTransition`]s without waiting. A single [`SyncWorker`] drains the
//! submission channel in FIFO order, paces requests to the store's rate
//! limit, and retries transient failures with exponential backoff.
//!
//! # Ordering
//!
//! One channel feeding one worker means transitions for the same lead are
//! delivered in submission order. Nothing else is guaranteed.

mod worker;

pub use worker::{SyncConfig, SyncWorker, backoff_delay};

use tokio::sync::{mpsc, oneshot};

use crate::domain::StatusTransition;

/// Final fate of one submitted transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Written to the store (and note appended, if any)
    Delivered { attempts: u32 },
    /// Given up on; dispatch is unaffected
    Dropped { attempts: u32, reason: String },
}

impl SyncOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SyncOutcome::Delivered { .. })
    }
}

/// One unit of work for the sync worker
#[derive(Debug)]
pub struct SyncJob {
    pub transition: StatusTransition,
    done: Option<oneshot::Sender<SyncOutcome>>,
}

/// Receiving end of the submission channel, consumed by [`SyncWorker`]
pub type SyncReceiver = mpsc::UnboundedReceiver<SyncJob>;

/// Awaitable result of a submitted transition; dropping it is fine
#[derive(Debug)]
pub struct TransitionHandle {
    rx: Option<oneshot::Receiver<SyncOutcome>>,
}

impl TransitionHandle {
    /// Wait for the worker to settle the transition
    ///
    /// Returns `None` if the worker shut down before handling it.
    pub async fn outcome(self) -> Option<SyncOutcome> {
        match self.rx {
            Some(rx) => rx.await.ok(),
            None => None,
        }
    }
}

/// Fire-and-forget submission handle
#[derive(Debug, Clone)]
pub struct StatusSync {
    tx: mpsc::UnboundedSender<SyncJob>,
}

impl StatusSync {
    /// Create a handle and the receiver its worker will drain
    pub fn channel() -> (Self, SyncReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Submit a transition and get a handle to its eventual outcome
    pub fn enqueue_transition(&self, transition: StatusTransition) -> TransitionHandle {
        let (done_tx, done_rx) = oneshot::channel();
        if self.submit(transition, Some(done_tx)) {
            TransitionHandle { rx: Some(done_rx) }
        } else {
            TransitionHandle { rx: None }
        }
    }

    /// Submit a transition nobody will wait on
    pub fn emit(&self, transition: StatusTransition) {
        self.submit(transition, None);
    }

    /// Whether the worker is still accepting transitions
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn submit(&self, transition: StatusTransition, done: Option<oneshot::Sender<SyncOutcome>>) -> bool {
        let lead_id = transition.lead_id.clone();
        let status = transition.status;
        match self.tx.send(SyncJob { transition, done }) {
            Ok(()) => {
                tracing::trace!(lead_id = %lead_id, status = %status, "Status transition submitted");
                true
            }
            Err(_) => {
                log::error!("Status sync worker gone, dropping {} -> {}", lead_id, status);
                false
            }
        }
    }
}

impl SyncJob {
    /// Report the outcome to whoever is waiting, if anyone
    pub(crate) fn settle(self, outcome: SyncOutcome) {
        if let Some(done) = self.done {
            let _ = done.send(outcome);
        }
    }
}
