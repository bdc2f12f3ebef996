//! In-memory record store for tests

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{LeadFilter, LeadPage, LeadStore, StoreError};
use crate::domain::{LeadRecord, Metadata};

/// Scripted record store
///
/// Updates and notes are recorded in call order. Queued failures are handed
/// out one per write call (update or note) before writes start succeeding.
#[derive(Debug, Default)]
pub struct MockLeadStore {
    leads: Mutex<Vec<LeadRecord>>,
    failures: Mutex<VecDeque<StoreError>>,
    updates: Mutex<Vec<(String, Metadata)>>,
    notes: Mutex<Vec<(String, String)>>,
    write_calls: Mutex<u32>,
}

impl MockLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the records returned by `search`
    pub fn with_leads(leads: Vec<LeadRecord>) -> Self {
        Self {
            leads: Mutex::new(leads),
            ..Default::default()
        }
    }

    /// Fail the next write call with this error
    pub fn push_failure(&self, err: StoreError) {
        self.failures.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push_back(err);
    }

    /// Successful field updates, in order
    pub fn updates(&self) -> Vec<(String, Metadata)> {
        self.updates.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Status values written for one lead, in order
    pub fn statuses_for(&self, lead_id: &str) -> Vec<String> {
        self.updates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(id, _)| id == lead_id)
            .filter_map(|(_, fields)| fields.get("status").and_then(|v| v.as_str()).map(String::from))
            .collect()
    }

    /// Successfully appended notes, in order
    pub fn notes(&self) -> Vec<(String, String)> {
        self.notes.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Total write attempts, failed ones included
    pub fn write_calls(&self) -> u32 {
        *self.write_calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_failure(&self) -> Option<StoreError> {
        *self.write_calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) += 1;
        self.failures.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).pop_front()
    }
}

#[async_trait]
impl LeadStore for MockLeadStore {
    async fn search(&self, filter: &LeadFilter, page: u32) -> Result<LeadPage, StoreError> {
        let leads = self.leads.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let page_size = filter.page_size.max(1);
        let start = page as usize * page_size;
        let end = (start + page_size).min(leads.len());
        let slice = if start < leads.len() { leads[start..end].to_vec() } else { Vec::new() };

        Ok(LeadPage {
            leads: slice,
            has_more: end < leads.len(),
        })
    }

    async fn update_status(&self, lead_id: &str, fields: &Metadata) -> Result<(), StoreError> {
        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        self.updates.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push((lead_id.to_string(), fields.clone()));
        Ok(())
    }

    async fn append_note(&self, lead_id: &str, text: &str) -> Result<(), StoreError> {
        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        self.notes.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push((lead_id.to_string(), text.to_string()));
        Ok(())
    }
}
