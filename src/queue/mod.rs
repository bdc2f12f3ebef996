//! Lead queue and its dedup ledger
//!
//! The ledger is only ever mutated through [`LeadQueue`], which holds both
//! behind one lock.

mod lead_queue;
mod ledger;

pub use lead_queue::{Admission, Dequeued, LeadQueue};
pub use ledger::{DEFAULT_LEDGER_CEILING, DedupEntry, DedupLedger, EVICTION_PERCENT};
