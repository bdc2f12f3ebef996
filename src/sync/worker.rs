//! The single rate-limited worker behind [`StatusSync`](super::StatusSync)

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::{SyncOutcome, SyncReceiver};
use crate::domain::{Metadata, StatusTransition};
use crate::store::{LeadStore, StoreError};

/// Worker pacing and retry settings
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum store requests per second
    pub requests_per_second: u32,
    /// Attempts per store write before the transition is dropped
    pub max_attempts: u32,
    /// Backoff after the first failure; doubles per attempt
    pub initial_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Fixed spacing between consecutive store requests
    pub fn request_spacing(&self) -> Duration {
        Duration::from_secs(1) / self.requests_per_second.max(1)
    }
}

/// Delay before retry number `attempt` (1-based count of failures so far)
///
/// Exponential from `initial_backoff`, capped at `max_backoff`. A server
/// `retry-after` wins when it is longer.
pub fn backoff_delay(config: &SyncConfig, attempt: u32, retry_after: Option<Duration>) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let exp = config.initial_backoff.saturating_mul(1u32 << exponent).min(config.max_backoff);
    match retry_after {
        Some(server) => server.max(exp),
        None => exp,
    }
}

enum StoreWrite<'a> {
    Update(&'a Metadata),
    Note(&'a str),
}

impl StoreWrite<'_> {
    fn name(&self) -> &'static str {
        match self {
            StoreWrite::Update(_) => "update",
            StoreWrite::Note(_) => "note",
        }
    }
}

/// Drains the sync channel against a [`LeadStore`]
pub struct SyncWorker<S: LeadStore> {
    rx: SyncReceiver,
    store: Arc<S>,
    config: SyncConfig,
    last_request: Option<Instant>,
}

impl<S: LeadStore> SyncWorker<S> {
    pub fn new(rx: SyncReceiver, store: Arc<S>, config: SyncConfig) -> Self {
        Self {
            rx,
            store,
            config,
            last_request: None,
        }
    }

    /// Process transitions until every [`StatusSync`](super::StatusSync) handle is dropped
    pub async fn run(mut self) {
        log::info!(
            "Status sync worker started ({} req/s, {} attempts)",
            self.config.requests_per_second,
            self.config.max_attempts
        );

        while let Some(job) = self.rx.recv().await {
            let outcome = self.process(&job.transition).await;
            job.settle(outcome);
        }

        log::info!("Status sync worker stopped");
    }

    /// Deliver one transition: field update, then note if present
    pub async fn process(&mut self, transition: &StatusTransition) -> SyncOutcome {
        let lead_id = transition.lead_id.as_str();
        let fields = transition.update_fields();

        let mut attempts = match self.deliver(lead_id, StoreWrite::Update(&fields)).await {
            Ok(n) => n,
            Err((n, reason)) => return self.drop_transition(transition, n, reason),
        };

        if let Some(note) = transition.note.as_deref() {
            match self.deliver(lead_id, StoreWrite::Note(note)).await {
                Ok(n) => attempts += n,
                Err((n, reason)) => return self.drop_transition(transition, attempts + n, reason),
            }
        }

        tracing::debug!(lead_id = %lead_id, status = %transition.status, attempts, "Status synced");
        SyncOutcome::Delivered { attempts }
    }

    fn drop_transition(&self, transition: &StatusTransition, attempts: u32, reason: String) -> SyncOutcome {
        log::error!(
            "Dropping status transition {} -> {} after {} attempt(s): {}",
            transition.lead_id,
            transition.status,
            attempts,
            reason
        );
        SyncOutcome::Dropped { attempts, reason }
    }

    /// One store write with retry; returns attempts used
    async fn deliver(&mut self, lead_id: &str, write: StoreWrite<'_>) -> Result<u32, (u32, String)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.pace().await;

            let err = match self.call(lead_id, &write).await {
                Ok(()) => return Ok(attempt),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err((attempt, format!("permanent {} failure: {}", write.name(), err)));
            }
            if attempt >= self.config.max_attempts {
                return Err((attempt, format!("{} retries exhausted: {}", write.name(), err)));
            }

            let delay = backoff_delay(&self.config, attempt, err.retry_after());
            tracing::warn!(
                lead_id = %lead_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                rate_limited = err.is_rate_limit(),
                "Record store {} failed, retrying: {}",
                write.name(),
                err
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn call(&self, lead_id: &str, write: &StoreWrite<'_>) -> Result<(), StoreError> {
        match write {
            StoreWrite::Update(fields) => self.store.update_status(lead_id, fields).await,
            StoreWrite::Note(text) => self.store.append_note(lead_id, text).await,
        }
    }

    /// Enforce the fixed inter-request spacing
    async fn pace(&mut self) {
        if let Some(last) = self.last_request {
            let next = last + self.config.request_spacing();
            if Instant::now() < next {
                tokio::time::sleep_until(next).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}
