//! Call completion notifications delivered by the launch service's webhook

use serde::{Deserialize, Serialize};

use super::lead::Metadata;
use super::transition::LeadStatus;

/// End-of-call notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionNotification {
    pub call_id: String,

    /// Lead the call was for, when the sender echoes it back
    #[serde(default)]
    pub lead_id: Option<String>,

    #[serde(default)]
    pub ended_reason: Option<String>,

    /// Call summary, appended to the lead as a note
    #[serde(default)]
    pub summary: Option<String>,

    /// Whatever metadata was passed at launch, if echoed back
    #[serde(default)]
    pub metadata: Metadata,
}

impl CompletionNotification {
    pub fn new(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            lead_id: None,
            ended_reason: None,
            summary: None,
            metadata: Metadata::new(),
        }
    }

    /// Lead id carried in the notification itself, either directly or in echoed metadata
    pub fn carried_lead_id(&self) -> Option<String> {
        self.lead_id.clone().or_else(|| {
            self.metadata
                .get("lead_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
    }

    /// Terminal status implied by the ended reason
    pub fn terminal_status(&self) -> LeadStatus {
        terminal_status_for(self.ended_reason.as_deref())
    }
}

/// Map an ended reason to the terminal lead status
pub fn terminal_status_for(ended_reason: Option<&str>) -> LeadStatus {
    match ended_reason {
        Some(reason) => {
            let reason = reason.to_ascii_lowercase();
            if reason.contains("error") || reason.contains("failed") {
                LeadStatus::Failed
            } else {
                LeadStatus::Completed
            }
        }
        None => LeadStatus::Completed,
    }
}
