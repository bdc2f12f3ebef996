//! Dedup ledger - bounded membership/recency tracker for lead ids
//!
//! The ledger rejects duplicate admissions and keeps memory bounded over
//! unbounded uptime. Once an admit takes it past its ceiling, an eviction
//! sweep drops the oldest tenth of the ceiling among entries the caller
//! says are not protected (in practice: not sitting in the lead queue).
//! Protected entries are never evicted, so the ledger may stay above its
//! ceiling when more ids than that are actionable.

use std::collections::HashMap;
use std::time::Instant;

/// Default ledger ceiling
pub const DEFAULT_LEDGER_CEILING: usize = 10_000;

/// Share of the ceiling evicted per sweep, in percent
pub const EVICTION_PERCENT: usize = 10;

/// One tracked lead id
#[derive(Debug, Clone)]
pub struct DedupEntry {
    pub lead_id: String,
    pub inserted_at: Instant,
    /// Monotonic insertion sequence; breaks timestamp ties
    seq: u64,
}

/// Bounded set of admitted lead ids
#[derive(Debug)]
pub struct DedupLedger {
    entries: HashMap<String, DedupEntry>,
    ceiling: usize,
    next_seq: u64,
}

impl Default for DedupLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CEILING)
    }
}

impl DedupLedger {
    pub fn new(ceiling: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ceiling: ceiling.max(1),
            next_seq: 0,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, lead_id: &str) -> bool {
        self.entries.contains_key(lead_id)
    }

    /// Track `lead_id`; false if it is already tracked
    ///
    /// If the admit pushes the ledger past its ceiling, a sweep runs
    /// afterwards with `is_protected` guarding entries that must stay. The
    /// sweep never undoes the admit itself.
    pub fn try_admit(&mut self, lead_id: &str, is_protected: impl Fn(&str) -> bool) -> bool {
        if !self.track(lead_id) {
            return false;
        }

        if self.entries.len() > self.ceiling {
            let evicted = self.sweep(|id| id == lead_id || is_protected(id));
            log::debug!(
                "Ledger over ceiling {}: evicted {}, now tracking {}",
                self.ceiling,
                evicted,
                self.entries.len()
            );
        }

        true
    }

    /// Track `lead_id` without an eviction sweep; false if already tracked
    ///
    /// For callers that know every tracked entry is protected.
    pub fn track(&mut self, lead_id: &str) -> bool {
        if self.entries.contains_key(lead_id) {
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            lead_id.to_string(),
            DedupEntry {
                lead_id: lead_id.to_string(),
                inserted_at: Instant::now(),
                seq,
            },
        );
        true
    }

    /// Stop tracking `lead_id`; false if it was not tracked
    pub fn remove(&mut self, lead_id: &str) -> bool {
        self.entries.remove(lead_id).is_some()
    }

    /// Evict the oldest unprotected entries
    ///
    /// Removes `ceiling * EVICTION_PERCENT / 100` entries (at least one), or
    /// however many it takes to get back to the ceiling if that is more.
    /// Returns the number evicted.
    pub fn sweep(&mut self, is_protected: impl Fn(&str) -> bool) -> usize {
        let batch = (self.ceiling * EVICTION_PERCENT / 100).max(1);
        let target = batch.max(self.entries.len().saturating_sub(self.ceiling));

        let mut candidates: Vec<(u64, &String)> = self
            .entries
            .iter()
            .filter(|(id, _)| !is_protected(id))
            .map(|(id, entry)| (entry.seq, id))
            .collect();
        candidates.sort_unstable_by_key(|(seq, _)| *seq);

        let victims: Vec<String> = candidates
            .into_iter()
            .take(target)
            .map(|(_, id)| id.clone())
            .collect();

        for id in &victims {
            self.entries.remove(id);
        }
        victims.len()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
