//! Dispatch scheduling.
//!
//! This module provides:
//! - **Dispatcher**: the tick loop that claims free slots, dequeues leads and
//!   launches calls.
//! - **Gates**: predicates (enable switch, business hours) that can veto a tick.
//! - **Rate limiting**: records 429s from the launch service; consumption is
//!   opt-in via `respect_launch_rate_limit`.
//! - **Tick bookkeeping**: per-tick reports and lifetime counters.
//!
//! # Example
//!
//! ```ignore
//! use leaddial::scheduler::{Dispatcher, DispatcherConfig};
//!
//! let dispatcher = Arc::new(Dispatcher::new(queue, slots, launcher, sync, DispatcherConfig::default()));
//! dispatcher.enqueue(lead);
//! let report = dispatcher.tick().await;
//! ```

mod dispatcher;
mod gate;
mod rate_limit;
mod tick;

pub use dispatcher::{DispatchSnapshot, Dispatcher, DispatcherConfig};
pub use gate::{AlwaysOpen, BusinessHours, DispatchGate, parse_weekday};
pub use rate_limit::LaunchRateLimit;
pub use tick::{DispatchStats, SkipReason, StatsSnapshot, TickReport};
