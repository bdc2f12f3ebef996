//! Leaddial - slot-based outbound call dispatch
//!
//! Leads are admitted into a deduplicated FIFO queue and matched to a fixed
//! pool of dialing slots on a timer. Every lifecycle change is pushed to the
//! lead record store through a rate-limited, retrying worker, and ended calls
//! (pushed or polled) return their slots to the pool.

pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod intake;
pub mod launcher;
pub mod queue;
pub mod reconcile;
pub mod scheduler;
pub mod slots;
pub mod store;
pub mod sync;

pub use error::{DialerError, Result};
