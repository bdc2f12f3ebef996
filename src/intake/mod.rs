//! Lead intake - pulls dispatchable leads from the record store
//!
//! A pull pages through `LeadStore::search` until a short page and offers
//! every record to the dispatcher's admission path. Hydration is a pull
//! preceded by a reset of the queue and its ledger.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::launcher::CallLauncher;
use crate::queue::Admission;
use crate::scheduler::Dispatcher;
use crate::store::{LeadFilter, LeadStore};

/// Hard stop for a store that keeps claiming more pages
const MAX_PAGES: u32 = 1_000;

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub filter: LeadFilter,
    pub default_country_code: String,
    pub pull_interval: Duration,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            filter: LeadFilter::default(),
            default_country_code: "1".to_string(),
            pull_interval: Duration::from_secs(300),
        }
    }
}

/// Counts from one pull
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeReport {
    pub pages: u32,
    pub fetched: usize,
    pub accepted: usize,
    pub duplicate: usize,
    pub missing_phone: usize,
    pub in_flight: usize,
}

impl IntakeReport {
    fn record(&mut self, admission: Admission) {
        match admission {
            Admission::Accepted => self.accepted += 1,
            Admission::Duplicate => self.duplicate += 1,
            Admission::MissingPhone => self.missing_phone += 1,
            Admission::InFlight => self.in_flight += 1,
        }
    }
}

pub struct LeadIntake<S: LeadStore, C: CallLauncher> {
    store: Arc<S>,
    dispatcher: Arc<Dispatcher<C>>,
    config: IntakeConfig,
}

impl<S: LeadStore + 'static, C: CallLauncher + 'static> LeadIntake<S, C> {
    pub fn new(store: Arc<S>, dispatcher: Arc<Dispatcher<C>>, config: IntakeConfig) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    /// Page through the store once, admitting everything dispatchable
    pub async fn pull_once(&self) -> Result<IntakeReport> {
        let mut report = IntakeReport::default();
        let page_size = self.config.filter.page_size.max(1);

        for page in 0..MAX_PAGES {
            let result = self.store.search(&self.config.filter, page).await?;
            report.pages += 1;
            let count = result.leads.len();
            report.fetched += count;

            for lead in result.leads {
                let lead = lead.normalized(&self.config.default_country_code);
                report.record(self.dispatcher.enqueue(lead));
            }

            if !result.has_more || count < page_size {
                break;
            }
        }

        log::debug!(
            "Pulled {} leads over {} pages: {} accepted, {} duplicate, {} missing phone, {} in flight",
            report.fetched,
            report.pages,
            report.accepted,
            report.duplicate,
            report.missing_phone,
            report.in_flight
        );
        Ok(report)
    }

    /// Reset the queue and ledger together, then pull
    pub async fn hydrate(&self) -> Result<IntakeReport> {
        let dropped = self.dispatcher.queue().reset();
        if dropped > 0 {
            log::info!("Hydration reset dropped {} queued leads", dropped);
        }
        let report = self.pull_once().await?;
        log::info!("Hydrated queue with {} leads", report.accepted);
        Ok(report)
    }

    /// Hydrate, then pull on a fixed interval until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.hydrate().await {
            log::error!("Initial hydration failed: {}", e);
        }

        let mut interval = tokio::time::interval(self.config.pull_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.pull_once().await {
                        Ok(report) if report.accepted > 0 => {
                            log::info!("Pull admitted {} new leads", report.accepted);
                        }
                        Ok(_) => {}
                        Err(e) => log::warn!("Lead pull failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        log::info!("Intake stopped");
    }
}
