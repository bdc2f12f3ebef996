//! Completion reconciler - turns ended calls back into free slots
//!
//! Two paths end a call:
//! - **push**: the launch service's webhook delivers a [`CompletionNotification`]
//! - **poll**: a periodic sweep asks the launch service about every busy slot
//!
//! Both go through `SlotPool::release_call`, so whichever path arrives second
//! finds nothing to release and does nothing. Only the path that actually
//! freed the slot reports the terminal status.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::domain::{CompletionNotification, LeadStatus, StatusTransition, terminal_status_for};
use crate::launcher::CallLauncher;
use crate::scheduler::{DispatchStats, LaunchRateLimit};
use crate::slots::{ReleasedCall, SlotPool};
use crate::sync::StatusSync;

/// Reconciler settings
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Time between poll sweeps
    pub poll_interval: Duration,
    /// Claims older than this that never became busy are released
    pub stale_claim_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            stale_claim_timeout: Duration::from_secs(120),
        }
    }
}

/// What one poll sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Slot/index divergences repaired
    pub healed: usize,
    /// Launch claims released for being stale
    pub stale_claims: usize,
    /// Busy calls queried
    pub checked: usize,
    /// Slots freed because their call ended
    pub freed: usize,
    /// Status queries that failed
    pub errors: usize,
}

pub struct Reconciler<C: CallLauncher> {
    slots: Arc<SlotPool>,
    launcher: Arc<C>,
    sync: StatusSync,
    stats: Arc<DispatchStats>,
    rate_limit: Arc<Mutex<LaunchRateLimit>>,
    config: ReconcilerConfig,
}

impl<C: CallLauncher + 'static> Reconciler<C> {
    pub fn new(slots: Arc<SlotPool>, launcher: Arc<C>, sync: StatusSync, config: ReconcilerConfig) -> Self {
        Self {
            slots,
            launcher,
            sync,
            stats: Arc::new(DispatchStats::new()),
            rate_limit: Arc::new(Mutex::new(LaunchRateLimit::new())),
            config,
        }
    }

    pub fn with_stats(mut self, stats: Arc<DispatchStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Record status-query 429s in the dispatcher's launch rate-limit state
    pub fn with_rate_limit(mut self, rate_limit: Arc<Mutex<LaunchRateLimit>>) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Handle a pushed completion notification
    ///
    /// Returns true if a slot was freed. Unknown or already-freed call ids
    /// are a no-op.
    pub fn on_completion_push(&self, notification: &CompletionNotification) -> bool {
        let Some(released) = self.slots.release_call(&notification.call_id) else {
            log::debug!("Completion for untracked call {}; ignoring", notification.call_id);
            return false;
        };

        let lead_id = notification
            .lead_id
            .clone()
            .or_else(|| released.lead_id.clone())
            .or_else(|| notification.carried_lead_id());
        self.finish(
            released,
            lead_id,
            notification.terminal_status(),
            notification.ended_reason.as_deref(),
            notification.summary.as_deref(),
        );
        true
    }

    /// Run one poll sweep
    pub async fn poll_once(&self) -> PollReport {
        let mut report = PollReport {
            healed: self.slots.heal_index(),
            ..Default::default()
        };

        let stale = self.slots.release_stale_claims(self.config.stale_claim_timeout);
        for (slot, lead_id) in &stale {
            log::warn!(
                "Released stale launch claim on slot {} (lead {})",
                slot,
                lead_id.as_deref().unwrap_or("unbound")
            );
        }
        report.stale_claims = stale.len();

        for call in self.slots.busy_calls() {
            report.checked += 1;
            let status = match self.launcher.get_call_status(&call.call_id).await {
                Ok(status) => status,
                Err(e) => {
                    if e.is_rate_limit() {
                        self.rate_limit
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .record_rate_limit(e.retry_after());
                    }
                    tracing::warn!(call_id = %call.call_id, slot = call.slot, error = %e, "Call status query failed");
                    report.errors += 1;
                    continue;
                }
            };
            if !status.ended {
                continue;
            }

            // The push path may have freed it while we were waiting
            if let Some(released) = self.slots.release_call(&call.call_id) {
                let lead_id = released.lead_id.clone();
                let reason = status.reason.as_deref();
                self.finish(released, lead_id, terminal_status_for(reason), reason, None);
                report.freed += 1;
            }
        }

        if report.freed > 0 || report.healed > 0 || report.stale_claims > 0 {
            log::info!(
                "Poll sweep: {} freed, {} healed, {} stale claims",
                report.freed,
                report.healed,
                report.stale_claims
            );
        }
        report
    }

    fn finish(
        &self,
        released: ReleasedCall,
        lead_id: Option<String>,
        status: LeadStatus,
        reason: Option<&str>,
        summary: Option<&str>,
    ) {
        self.stats.record_completion();
        tracing::info!(call_id = %released.call_id, slot = released.slot, status = %status, "Call ended");

        let Some(lead_id) = lead_id else {
            log::warn!("Call {} ended but no lead id could be recovered", released.call_id);
            return;
        };

        let mut transition = StatusTransition::new(lead_id, status)
            .with_field("call_id", Value::String(released.call_id))
            .with_field("duration_secs", Value::from(released.started_at.elapsed().as_secs()));
        if let Some(reason) = reason {
            transition = transition.with_field("ended_reason", Value::String(reason.to_string()));
        }
        if let Some(summary) = summary.map(str::trim).filter(|s| !s.is_empty()) {
            transition = transition.with_note(summary);
        }
        self.sync.emit(transition);
    }

    /// Poll on a fixed interval until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; nothing can be busy yet
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        log::info!("Reconciler stopped");
    }
}
