//! Tick bookkeeping - what one tick did, and lifetime counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Why a tick did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Global enable switch is off
    Disabled,
    /// The dispatch gate (business hours) is closed
    GateClosed,
    /// Launch service backoff is active and the dispatcher respects it
    RateLimited,
}

/// Result of one dispatch tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Launches that came back with a call id
    pub launched: usize,
    /// Leads put back at the head of the queue
    pub requeued: usize,
    /// Launches accepted without a call id
    pub soft_failures: usize,
    /// Launches that errored
    pub failures: usize,
    /// Slots claimed then released because the queue ran dry
    pub released_idle: usize,
    pub skipped: Option<SkipReason>,
}

impl TickReport {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    /// Launches attempted this tick
    pub fn attempted(&self) -> usize {
        self.launched + self.soft_failures + self.failures
    }
}

/// Lifetime dispatch counters, shared between the dispatcher and reconciler
#[derive(Debug, Default)]
pub struct DispatchStats {
    ticks: AtomicU64,
    launched: AtomicU64,
    launch_failures: AtomicU64,
    soft_failures: AtomicU64,
    requeued: AtomicU64,
    completed: AtomicU64,
}

/// Plain copy of [`DispatchStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub launched: u64,
    pub launch_failures: u64,
    pub soft_failures: u64,
    pub requeued: u64,
    pub completed: u64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_launch(&self) {
        self.launched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_launch_failure(&self) {
        self.launch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_soft_failure(&self) {
        self.soft_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeue(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            launched: self.launched.load(Ordering::Relaxed),
            launch_failures: self.launch_failures.load(Ordering::Relaxed),
            soft_failures: self.soft_failures.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }
}
