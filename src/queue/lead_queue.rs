//! Lead queue - FIFO of pending leads, kept in lockstep with the dedup ledger

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::ledger::DedupLedger;
use crate::domain::{LeadRecord, LeadStatus, StatusTransition};
use crate::sync::StatusSync;

/// Result of offering a lead for admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Appended to the queue
    Accepted,
    /// Already tracked by the ledger
    Duplicate,
    /// No usable phone number
    MissingPhone,
    /// Currently on a call
    InFlight,
}

/// Result of [`LeadQueue::dequeue_into`]
#[derive(Debug, Clone, PartialEq)]
pub enum Dequeued {
    Lead(LeadRecord),
    Empty,
    /// The bind callback turned the head down
    Refused,
}

#[derive(Debug)]
struct QueueState {
    leads: VecDeque<LeadRecord>,
    ledger: DedupLedger,
}

impl QueueState {
    /// Admit into the ledger, protecting every id already queued from eviction
    fn admit(&mut self, lead_id: &str) -> bool {
        let QueueState { leads, ledger } = self;
        if ledger.contains(lead_id) {
            return false;
        }
        // Every tracked id is still queued, so a sweep could evict nothing
        if ledger.len() < ledger.ceiling() || ledger.len() == leads.len() {
            return ledger.track(lead_id);
        }
        let queued: HashSet<&str> = leads.iter().map(|l| l.id.as_str()).collect();
        ledger.try_admit(lead_id, |id| queued.contains(id))
    }
}

/// Pending leads plus their dedup ledger, mutated only under one lock
///
/// Every id in the queue has exactly one ledger entry. Each public
/// operation updates both sides before releasing the lock, so callers never
/// observe them disagreeing.
#[derive(Debug)]
pub struct LeadQueue {
    state: Mutex<QueueState>,
    sync: StatusSync,
}

impl LeadQueue {
    pub fn new(ledger_ceiling: usize, sync: StatusSync) -> Self {
        Self {
            state: Mutex::new(QueueState {
                leads: VecDeque::new(),
                ledger: DedupLedger::new(ledger_ceiling),
            }),
            sync,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a lead to the tail unless it is undialable or already tracked
    pub fn enqueue(&self, record: LeadRecord) -> Admission {
        self.enqueue_unless(record, |_| false)
    }

    /// Like [`enqueue`](Self::enqueue), but also refuse ids `in_flight` reports busy
    ///
    /// `in_flight` runs under the queue lock, the same lock
    /// [`dequeue_into`](Self::dequeue_into) holds while binding a lead to its
    /// slot, so a lead is always either tracked here or visible as in flight.
    pub fn enqueue_unless(&self, record: LeadRecord, in_flight: impl Fn(&str) -> bool) -> Admission {
        if !record.is_dispatchable() {
            log::debug!("Rejecting lead {}: no usable phone number", record.id);
            return Admission::MissingPhone;
        }

        let lead_id = record.id.clone();
        {
            let mut state = self.state();
            if in_flight(&lead_id) {
                log::debug!("Rejecting lead {}: already in flight", lead_id);
                return Admission::InFlight;
            }
            if !state.admit(&lead_id) {
                log::debug!("Rejecting lead {}: already queued", lead_id);
                return Admission::Duplicate;
            }
            state.leads.push_back(record);
        }

        self.sync.emit(StatusTransition::new(lead_id, LeadStatus::Queued));
        Admission::Accepted
    }

    /// Pop the head of the queue and stop tracking it
    pub fn dequeue_next(&self) -> Option<LeadRecord> {
        match self.dequeue_into(|_| true) {
            Dequeued::Lead(record) => Some(record),
            Dequeued::Empty | Dequeued::Refused => None,
        }
    }

    /// Hand the head to `bind` and pop it only if `bind` accepts it
    ///
    /// `bind` runs under the queue lock. A refused lead stays at the head and
    /// stays tracked.
    pub fn dequeue_into(&self, bind: impl FnOnce(&LeadRecord) -> bool) -> Dequeued {
        let record = {
            let mut state = self.state();
            let Some(head) = state.leads.front() else {
                return Dequeued::Empty;
            };
            if !bind(head) {
                return Dequeued::Refused;
            }
            let Some(record) = state.leads.pop_front() else {
                return Dequeued::Empty;
            };
            state.ledger.remove(&record.id);
            record
        };

        self.sync
            .emit(StatusTransition::new(record.id.clone(), LeadStatus::Dispatching));
        Dequeued::Lead(record)
    }

    /// Put a lead back at the head after a failed dispatch
    ///
    /// Ledger admit and head insert happen together. If the id is already
    /// tracked again (a fresh copy arrived while this one was out), this copy
    /// is discarded instead of creating a duplicate; returns false then.
    pub fn requeue_front(&self, record: LeadRecord) -> bool {
        let lead_id = record.id.clone();
        {
            let mut state = self.state();
            if !state.admit(&lead_id) {
                log::debug!("Not requeueing lead {}: already queued again", lead_id);
                return false;
            }
            state.leads.push_front(record);
        }

        self.sync.emit(
            StatusTransition::new(lead_id, LeadStatus::Queued).with_field("requeued", serde_json::Value::Bool(true)),
        );
        true
    }

    /// Drop every queued lead and ledger entry (hydration reset)
    pub fn reset(&self) -> usize {
        let mut state = self.state();
        let dropped = state.leads.len();
        state.leads.clear();
        state.ledger.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.state().leads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().leads.is_empty()
    }

    pub fn ledger_len(&self) -> usize {
        self.state().ledger.len()
    }

    /// Whether the ledger is tracking this id
    pub fn is_tracked(&self, lead_id: &str) -> bool {
        self.state().ledger.contains(lead_id)
    }

    /// Queued lead ids, head first
    pub fn queued_ids(&self) -> Vec<String> {
        self.state().leads.iter().map(|l| l.id.clone()).collect()
    }
}
