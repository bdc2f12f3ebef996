//! Daemon context - wires the dispatch components together
//!
//! DaemonContext owns every long-lived component: the queue and slot pool
//! behind the dispatcher, the reconciler, lead intake, and the status sync
//! worker that all of them report through.

use std::sync::Arc;

use crate::config::Config;
use crate::error::{DialerError, Result};
use crate::intake::LeadIntake;
use crate::launcher::{CallLauncher, HttpCallLauncher};
use crate::queue::LeadQueue;
use crate::reconcile::Reconciler;
use crate::scheduler::{DispatchStats, Dispatcher};
use crate::slots::SlotPool;
use crate::store::{HttpLeadStore, LeadStore};
use crate::sync::{StatusSync, SyncWorker};

/// Concrete context used by the `run` command
pub type HttpDaemonContext = DaemonContext<HttpLeadStore, HttpCallLauncher>;

/// Shared components of a running dialer
pub struct DaemonContext<S: LeadStore, C: CallLauncher> {
    pub dispatcher: Arc<Dispatcher<C>>,
    pub reconciler: Arc<Reconciler<C>>,
    pub intake: Arc<LeadIntake<S, C>>,
    pub sync: StatusSync,
    pub stats: Arc<DispatchStats>,
    /// Taken when the daemon starts
    pub(crate) sync_worker: Option<SyncWorker<S>>,
}

impl HttpDaemonContext {
    /// Build HTTP collaborators from config; API keys come from the environment
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(HttpLeadStore::new(config.record_store_config())?);
        let launcher = Arc::new(HttpCallLauncher::new(config.launch_service_config())?);
        Self::with_collaborators(config, store, launcher)
    }
}

impl<S: LeadStore + 'static, C: CallLauncher + 'static> DaemonContext<S, C> {
    /// Build a context around the given collaborators
    pub fn with_collaborators(config: &Config, store: Arc<S>, launcher: Arc<C>) -> Result<Self> {
        config.validate().map_err(|e| DialerError::Config(e.to_string()))?;
        let gate = config.gate().map_err(|e| DialerError::Config(e.to_string()))?;

        let (sync, sync_rx) = StatusSync::channel();
        let sync_worker = SyncWorker::new(sync_rx, store.clone(), config.sync_config());

        let stats = Arc::new(DispatchStats::new());
        let queue = Arc::new(LeadQueue::new(config.queue.ledger_ceiling, sync.clone()));
        let slots = Arc::new(SlotPool::new(config.slots.iter().cloned()));

        let dispatcher = Arc::new(
            Dispatcher::new(
                queue,
                slots.clone(),
                launcher.clone(),
                sync.clone(),
                config.dispatcher_config(),
            )
            .with_gate(gate)
            .with_stats(stats.clone()),
        );
        let reconciler = Arc::new(
            Reconciler::new(slots, launcher, sync.clone(), config.reconciler_config())
                .with_stats(stats.clone())
                .with_rate_limit(dispatcher.rate_limit()),
        );
        let intake = Arc::new(LeadIntake::new(store, dispatcher.clone(), config.intake_config()));

        log::info!("Dialer context ready with {} slots", config.slots.len());
        Ok(Self {
            dispatcher,
            reconciler,
            intake,
            sync,
            stats,
            sync_worker: Some(sync_worker),
        })
    }
}
