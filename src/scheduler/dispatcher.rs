//! Dispatcher - the tick-driven loop that matches free slots to queued leads
//!
//! A tick claims a free slot, dequeues the next lead, and starts a launch for
//! the pair, repeating until slots or leads run out. Launches started in the
//! same tick run concurrently and settle independently.
//!
//! Ticks are not serialized. Two ticks may overlap in time; correctness comes
//! from `SlotPool::claim_free_slot` and the queue's single lock, never from a
//! "dispatch in progress" flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::gate::{AlwaysOpen, DispatchGate};
use super::rate_limit::LaunchRateLimit;
use super::tick::{DispatchStats, SkipReason, StatsSnapshot, TickReport};
use crate::domain::{LeadRecord, LeadStatus, StatusTransition};
use crate::launcher::{CallLauncher, LaunchOutcome};
use crate::queue::{Admission, Dequeued, LeadQueue};
use crate::slots::{SlotClaim, SlotPool};
use crate::sync::StatusSync;

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub tick_interval: Duration,
    /// Initial state of the global enable switch
    pub enabled: bool,
    /// Treat an active launch-service backoff like a closed gate
    pub respect_launch_rate_limit: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(3),
            enabled: true,
            respect_launch_rate_limit: false,
        }
    }
}

/// Point-in-time view of dispatch state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub enabled: bool,
    pub queued: usize,
    pub ledger: usize,
    pub free_slots: usize,
    pub busy_slots: usize,
    pub claimed_slots: usize,
    pub last_launch_429: Option<DateTime<Utc>>,
    pub stats: StatsSnapshot,
}

/// How one launch settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Launched,
    SoftFailure { requeued: bool },
    Failed { requeued: bool },
    /// Lead could not be launched at all and was not requeued
    Discarded,
}

pub struct Dispatcher<C: CallLauncher> {
    queue: Arc<LeadQueue>,
    slots: Arc<SlotPool>,
    launcher: Arc<C>,
    gate: Arc<dyn DispatchGate>,
    sync: StatusSync,
    rate_limit: Arc<Mutex<LaunchRateLimit>>,
    stats: Arc<DispatchStats>,
    enabled: AtomicBool,
    config: DispatcherConfig,
}

impl<C: CallLauncher + 'static> Dispatcher<C> {
    pub fn new(
        queue: Arc<LeadQueue>,
        slots: Arc<SlotPool>,
        launcher: Arc<C>,
        sync: StatusSync,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            slots,
            launcher,
            gate: Arc::new(AlwaysOpen),
            sync,
            rate_limit: Arc::new(Mutex::new(LaunchRateLimit::new())),
            stats: Arc::new(DispatchStats::new()),
            enabled: AtomicBool::new(config.enabled),
            config,
        }
    }

    /// Veto ticks with this gate
    pub fn with_gate(mut self, gate: Arc<dyn DispatchGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Share counters with another component
    pub fn with_stats(mut self, stats: Arc<DispatchStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn queue(&self) -> Arc<LeadQueue> {
        self.queue.clone()
    }

    pub fn slots(&self) -> Arc<SlotPool> {
        self.slots.clone()
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Shared launch rate-limit state
    pub fn rate_limit(&self) -> Arc<Mutex<LaunchRateLimit>> {
        self.rate_limit.clone()
    }

    fn rate_limit_state(&self) -> MutexGuard<'_, LaunchRateLimit> {
        self.rate_limit.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Flip the global enable switch
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            log::info!("Dispatch {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Admit a lead, refusing one that is already being dialed
    pub fn enqueue(&self, record: LeadRecord) -> Admission {
        self.queue
            .enqueue_unless(record, |lead_id| self.slots.is_lead_in_flight(lead_id))
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            enabled: self.is_enabled(),
            queued: self.queue.len(),
            ledger: self.queue.ledger_len(),
            free_slots: self.slots.free_count(),
            busy_slots: self.slots.busy_count(),
            claimed_slots: self.slots.claimed_count(),
            last_launch_429: self.rate_limit_state().last_429_at,
            stats: self.stats.snapshot(),
        }
    }

    fn skip_reason(&self, now: DateTime<Utc>) -> Option<SkipReason> {
        if !self.is_enabled() {
            return Some(SkipReason::Disabled);
        }
        if !self.gate.is_open(now) {
            return Some(SkipReason::GateClosed);
        }
        if self.config.respect_launch_rate_limit && self.rate_limit_state().is_rate_limited() {
            return Some(SkipReason::RateLimited);
        }
        None
    }

    /// Run one dispatch tick
    ///
    /// Never fails: launch errors are absorbed by requeueing the lead and
    /// releasing its slot.
    pub async fn tick(&self) -> TickReport {
        self.stats.record_tick();

        if let Some(reason) = self.skip_reason(Utc::now()) {
            log::debug!("Tick skipped: {:?}", reason);
            return TickReport::skipped(reason);
        }

        let mut report = TickReport::default();
        let mut launches = FuturesUnordered::new();

        while let Some(claim) = self.slots.claim_free_slot() {
            // Bind under the queue lock so the lead is never untracked and unbound at once
            let lead = match self.queue.dequeue_into(|lead| self.slots.bind_lead(&claim, &lead.id)) {
                Dequeued::Lead(lead) => lead,
                Dequeued::Empty => {
                    self.slots.release_claim(&claim);
                    report.released_idle += 1;
                    break;
                }
                // Claim reaped between claim and bind; try again with a fresh slot
                Dequeued::Refused => continue,
            };

            tracing::debug!(lead_id = %lead.id, slot = claim.slot, "Dispatching lead");
            launches.push(self.launch(claim, lead));
        }

        while let Some(settled) = launches.next().await {
            match settled {
                Settled::Launched => report.launched += 1,
                Settled::SoftFailure { requeued } => {
                    report.soft_failures += 1;
                    report.requeued += usize::from(requeued);
                }
                Settled::Failed { requeued } => {
                    report.failures += 1;
                    report.requeued += usize::from(requeued);
                }
                Settled::Discarded => {}
            }
        }

        report
    }

    async fn launch(&self, claim: SlotClaim, lead: LeadRecord) -> Settled {
        let (Some(origination_id), Some(phone)) = (self.slots.origination_id(claim.slot), lead.phone.clone()) else {
            log::error!("Lead {} reached dispatch without a phone number; dropping", lead.id);
            self.slots.release_claim(&claim);
            return Settled::Discarded;
        };

        match self.launcher.launch_call(&origination_id, &phone, &lead.metadata).await {
            Ok(LaunchOutcome { call_id: Some(call_id) }) => {
                self.rate_limit_state().record_success();
                if !self.slots.mark_busy(&claim, &call_id) {
                    log::warn!(
                        "Slot {} claim expired before call {} for lead {} settled",
                        claim.slot,
                        call_id,
                        lead.id
                    );
                }
                self.stats.record_launch();
                tracing::info!(lead_id = %lead.id, slot = claim.slot, call_id = %call_id, "Call launched");
                self.sync.emit(
                    StatusTransition::new(lead.id, LeadStatus::InProgress).with_field("call_id", Value::String(call_id)),
                );
                Settled::Launched
            }
            Ok(LaunchOutcome { call_id: None }) => {
                self.rate_limit_state().record_success();
                self.stats.record_soft_failure();
                tracing::warn!(lead_id = %lead.id, slot = claim.slot, "Launch accepted without a call id; requeueing");
                Settled::SoftFailure {
                    requeued: self.give_back(&claim, lead),
                }
            }
            Err(e) => {
                if e.is_rate_limit() {
                    self.rate_limit_state().record_rate_limit(e.retry_after());
                }
                self.stats.record_launch_failure();

                if !e.is_retryable() {
                    tracing::warn!(lead_id = %lead.id, slot = claim.slot, error = %e, "Launch rejected; marking lead failed");
                    self.slots.release_claim(&claim);
                    self.sync.emit(
                        StatusTransition::new(lead.id, LeadStatus::Failed)
                            .with_field("launch_error", Value::String(e.to_string())),
                    );
                    return Settled::Failed { requeued: false };
                }

                tracing::warn!(lead_id = %lead.id, slot = claim.slot, error = %e, "Launch failed; requeueing");
                Settled::Failed {
                    requeued: self.give_back(&claim, lead),
                }
            }
        }
    }

    /// Free the slot and put the lead back at the head of the queue
    fn give_back(&self, claim: &SlotClaim, lead: LeadRecord) -> bool {
        self.slots.release_claim(claim);
        let requeued = self.queue.requeue_front(lead);
        if requeued {
            self.stats.record_requeue();
        }
        requeued
    }

    /// Tick on a fixed interval until `shutdown` flips to true
    ///
    /// Each tick is spawned, so a slow launch never delays the next tick.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!(
            "Dispatcher started: {} slots, tick every {:?}",
            self.slots.len(),
            self.config.tick_interval
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        let report = this.tick().await;
                        if report.attempted() > 0 {
                            log::info!(
                                "Tick: {} launched, {} soft failures, {} failures, {} requeued",
                                report.launched,
                                report.soft_failures,
                                report.failures,
                                report.requeued
                            );
                        }
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        log::info!("Dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::{MockCallLauncher, MockLaunch};
    use crate::sync::SyncReceiver;

    struct Closed;

    impl DispatchGate for Closed {
        fn is_open(&self, _now: DateTime<Utc>) -> bool {
            false
        }
    }

    fn lead(id: &str) -> LeadRecord {
        LeadRecord::new(id, Some("+14155550100"), "1")
    }

    fn dispatcher(slots: usize, launcher: MockCallLauncher) -> (Dispatcher<MockCallLauncher>, SyncReceiver) {
        let (sync, rx) = StatusSync::channel();
        let queue = Arc::new(LeadQueue::new(100, sync.clone()));
        let pool = Arc::new(SlotPool::new((0..slots).map(|i| format!("orig-{}", i))));
        let dispatcher = Dispatcher::new(queue, pool, Arc::new(launcher), sync, DispatcherConfig::default());
        (dispatcher, rx)
    }

    fn statuses(rx: &mut SyncReceiver, lead_id: &str) -> Vec<LeadStatus> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|job| job.transition.lead_id == lead_id)
            .map(|job| job.transition.status)
            .collect()
    }

    #[tokio::test]
    async fn test_tick_fills_free_slots() {
        let (d, _rx) = dispatcher(3, MockCallLauncher::new());
        for i in 0..5 {
            d.enqueue(lead(&format!("lead-{}", i)));
        }

        let report = d.tick().await;
        assert_eq!(report.launched, 3);
        assert_eq!(d.slots.busy_count(), 3);
        assert_eq!(d.queue.queued_ids(), vec!["lead-3", "lead-4"]);
    }

    #[tokio::test]
    async fn test_empty_queue_releases_claim() {
        let (d, _rx) = dispatcher(2, MockCallLauncher::new());
        let report = d.tick().await;

        assert_eq!(report.released_idle, 1);
        assert_eq!(report.attempted(), 0);
        assert_eq!(d.slots.free_count(), 2);
    }

    #[tokio::test]
    async fn test_launch_uses_slot_origination() {
        let (d, _rx) = dispatcher(2, MockCallLauncher::new());
        d.enqueue(lead("a").with_metadata("campaign", Value::String("fall".to_string())));
        d.tick().await;

        let launches = d.launcher.launches();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].origination_id, "orig-0");
        assert_eq!(launches[0].phone, "+14155550100");
        assert_eq!(launches[0].metadata.get("campaign"), Some(&Value::String("fall".to_string())));
    }

    #[tokio::test]
    async fn test_in_progress_carries_call_id() {
        let launcher = MockCallLauncher::with_script(vec![MockLaunch::Call("c-7".to_string())]);
        let (d, mut rx) = dispatcher(1, launcher);
        d.enqueue(lead("a"));
        d.tick().await;

        let jobs: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let last = &jobs.last().unwrap().transition;
        assert_eq!(last.status, LeadStatus::InProgress);
        assert_eq!(last.fields.get("call_id"), Some(&Value::String("c-7".to_string())));
        assert_eq!(d.slots.slot_for_call("c-7"), Some(0));
    }

    #[tokio::test]
    async fn test_soft_failure_requeues_at_head() {
        let launcher = MockCallLauncher::with_script(vec![MockLaunch::NoCallId]);
        let (d, mut rx) = dispatcher(1, launcher);
        d.enqueue(lead("a"));
        d.enqueue(lead("b"));

        let report = d.tick().await;
        assert_eq!(report.soft_failures, 1);
        assert_eq!(report.requeued, 1);
        assert_eq!(d.queue.queued_ids(), vec!["a", "b"]);
        assert_eq!(d.slots.free_count(), 1);
        assert_eq!(
            statuses(&mut rx, "a"),
            vec![LeadStatus::Queued, LeadStatus::Dispatching, LeadStatus::Queued]
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_launches() {
        let launcher = MockCallLauncher::with_script(vec![
            MockLaunch::Call("c-1".to_string()),
            MockLaunch::Fail(500),
            MockLaunch::Call("c-3".to_string()),
        ]);
        let (d, _rx) = dispatcher(3, launcher);
        for id in ["a", "b", "c"] {
            d.enqueue(lead(id));
        }

        let report = d.tick().await;
        assert_eq!(report.launched, 2);
        assert_eq!(report.failures, 1);
        assert_eq!(d.queue.len(), 1);
        assert_eq!(d.slots.busy_count(), 2);
        assert_eq!(d.slots.free_count(), 1);
        assert_eq!(d.stats.snapshot().launch_failures, 1);
    }

    #[tokio::test]
    async fn test_permanent_rejection_fails_lead_and_moves_on() {
        let launcher = MockCallLauncher::new();
        launcher.push(MockLaunch::Fail(422));
        let (d, mut rx) = dispatcher(1, launcher);
        d.enqueue(lead("bad"));
        d.enqueue(lead("good"));

        let report = d.tick().await;
        assert_eq!(report.failures, 1);
        assert_eq!(report.requeued, 0);
        assert_eq!(d.queue.queued_ids(), vec!["good"]);
        assert_eq!(d.slots.free_count(), 1);

        let jobs: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|job| job.transition.lead_id == "bad")
            .map(|job| job.transition)
            .collect();
        let last = jobs.last().unwrap();
        assert_eq!(last.status, LeadStatus::Failed);
        assert!(last.fields.contains_key("launch_error"));

        // The rejected lead no longer holds the head; the next one is dialed
        assert_eq!(d.tick().await.launched, 1);
        assert_eq!(d.launcher.launch_count(), 2);
        assert!(d.slots.is_lead_in_flight("good"));
        assert!(d.queue.is_empty());
        assert!(!d.queue.is_tracked("bad"));
    }

    #[tokio::test]
    async fn test_retryable_failure_keeps_lead_at_head() {
        let launcher = MockCallLauncher::with_script(vec![MockLaunch::Fail(503)]);
        let (d, mut rx) = dispatcher(1, launcher);
        d.enqueue(lead("a"));
        d.enqueue(lead("b"));

        let report = d.tick().await;
        assert_eq!(report.failures, 1);
        assert_eq!(report.requeued, 1);
        assert_eq!(d.queue.queued_ids(), vec!["a", "b"]);
        assert_eq!(
            statuses(&mut rx, "a"),
            vec![LeadStatus::Queued, LeadStatus::Dispatching, LeadStatus::Queued]
        );
    }

    #[tokio::test]
    async fn test_dispatching_lead_is_never_readmitted() {
        let launcher = MockCallLauncher::new().with_latency(Duration::from_millis(50));
        let (d, _rx) = dispatcher(1, launcher);
        let d = Arc::new(d);
        d.enqueue(lead("a"));

        let tick = tokio::spawn({
            let d = d.clone();
            async move { d.tick().await }
        });
        tokio::task::yield_now().await;

        // Dequeued and mid-launch: no longer tracked, but bound to its slot
        assert!(!d.queue.is_tracked("a"));
        assert_eq!(d.enqueue(lead("a")), Admission::InFlight);

        assert_eq!(tick.await.unwrap().launched, 1);
        assert_eq!(d.enqueue(lead("a")), Admission::InFlight);
        assert!(d.queue.is_empty());
    }

    #[tokio::test]
    async fn test_429_recorded_but_not_consumed_by_default() {
        let launcher = MockCallLauncher::with_script(vec![MockLaunch::Fail(429)]);
        let (d, _rx) = dispatcher(1, launcher);
        d.enqueue(lead("a"));

        d.tick().await;
        assert!(d.snapshot().last_launch_429.is_some());

        // Backoff is active but ignored
        let report = d.tick().await;
        assert_eq!(report.skipped, None);
        assert_eq!(report.launched, 1);
    }

    #[tokio::test]
    async fn test_429_pauses_dispatch_when_respected() {
        let (sync, _rx) = StatusSync::channel();
        let queue = Arc::new(LeadQueue::new(100, sync.clone()));
        let pool = Arc::new(SlotPool::new(["orig-0"]));
        let launcher = MockCallLauncher::with_script(vec![MockLaunch::Fail(429)]);
        let config = DispatcherConfig {
            respect_launch_rate_limit: true,
            ..Default::default()
        };
        let d = Dispatcher::new(queue, pool, Arc::new(launcher), sync, config);
        d.enqueue(lead("a"));

        d.tick().await;
        let report = d.tick().await;
        assert_eq!(report.skipped, Some(SkipReason::RateLimited));
        assert_eq!(d.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_and_gate_closed_are_noops() {
        let (d, _rx) = dispatcher(1, MockCallLauncher::new());
        d.enqueue(lead("a"));

        d.set_enabled(false);
        assert_eq!(d.tick().await.skipped, Some(SkipReason::Disabled));
        d.set_enabled(true);

        let d = d.with_gate(Arc::new(Closed));
        assert_eq!(d.tick().await.skipped, Some(SkipReason::GateClosed));
        assert_eq!(d.queue.len(), 1);
        assert_eq!(d.slots.free_count(), 1);
        assert_eq!(d.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_lead_rejected() {
        let (d, _rx) = dispatcher(2, MockCallLauncher::new());
        d.enqueue(lead("a"));
        d.tick().await;

        assert_eq!(d.enqueue(lead("a")), Admission::InFlight);
        assert!(d.queue.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_ticks_never_exceed_slots() {
        let launcher = MockCallLauncher::new().with_latency(Duration::from_millis(20));
        let (d, _rx) = dispatcher(3, launcher);
        let d = Arc::new(d);
        for i in 0..10 {
            d.enqueue(lead(&format!("lead-{}", i)));
        }

        let ticks: Vec<_> = (0..4)
            .map(|_| {
                let d = d.clone();
                tokio::spawn(async move { d.tick().await })
            })
            .collect();
        let mut launched = 0;
        for t in ticks {
            launched += t.await.unwrap().launched;
        }

        assert_eq!(launched, 3);
        assert_eq!(d.slots.busy_count(), 3);
        assert_eq!(d.queue.len(), 7);
        assert_eq!(d.launcher.launch_count(), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (d, _rx) = dispatcher(1, MockCallLauncher::new());
        let d = Arc::new(d);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(d.clone().run(rx));
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(d.stats.snapshot().ticks <= 1);
    }
}
