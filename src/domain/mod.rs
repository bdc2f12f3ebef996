//! Domain types - leads, status transitions, and call completion notices
//!
//! These are plain data types shared by the queue, dispatcher, synchronizer,
//! and reconciler. None of them own any shared state.

pub mod lead;
pub mod notification;
pub mod transition;

pub use lead::{LeadRecord, Metadata, normalize_phone};
pub use notification::{CompletionNotification, terminal_status_for};
pub use transition::{LeadStatus, StatusTransition};
