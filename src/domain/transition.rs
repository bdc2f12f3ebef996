//! Lead status transitions pushed to the record store

use serde::{Deserialize, Serialize};

use super::lead::Metadata;

/// Lifecycle state of a lead as reported to the record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeadStatus {
    /// Waiting in the lead queue
    Queued,
    /// Removed from the queue, launch in progress
    Dispatching,
    /// Call is live on a slot
    InProgress,
    /// Call ended normally
    Completed,
    /// Call ended with an error
    Failed,
}

impl LeadStatus {
    /// Wire name, as written into the record store's status field
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Queued => "queued",
            LeadStatus::Dispatching => "dispatching",
            LeadStatus::InProgress => "in-progress",
            LeadStatus::Completed => "completed",
            LeadStatus::Failed => "failed",
        }
    }

    /// Terminal states end the lead's dispatch lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, LeadStatus::Completed | LeadStatus::Failed)
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intent to tell the record store that a lead moved to a new state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub lead_id: String,
    pub status: LeadStatus,
    /// Extra fields written alongside the status
    #[serde(default)]
    pub fields: Metadata,
    /// Optional note appended to the lead after the field update
    #[serde(default)]
    pub note: Option<String>,
}

impl StatusTransition {
    pub fn new(lead_id: impl Into<String>, status: LeadStatus) -> Self {
        Self {
            lead_id: lead_id.into(),
            status,
            fields: Metadata::new(),
            note: None,
        }
    }

    /// Add an extra field to write with the status
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Attach a note
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Field payload for the record store update, status included
    pub fn update_fields(&self) -> Metadata {
        let mut fields = self.fields.clone();
        fields.insert("status".to_string(), serde_json::Value::from(self.status.as_str()));
        fields
    }
}
