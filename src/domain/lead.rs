//! Lead record and phone normalisation
//!
//! A lead is one qualification job: one phone number to call on behalf of one
//! record in the external record store.

use serde::{Deserialize, Serialize};

/// Opaque passthrough metadata, forwarded unchanged to the launch service and notes
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// One qualification job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    /// External identifier, unique across the record store
    pub id: String,

    /// E.164-normalised phone number; `None` means the lead is not dispatchable
    #[serde(default)]
    pub phone: Option<String>,

    /// List or view the lead was pulled from
    #[serde(default)]
    pub source_list_id: Option<String>,

    /// Passthrough metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl LeadRecord {
    /// Build a lead, normalising the raw phone number against a default country code
    pub fn new(id: impl Into<String>, raw_phone: Option<&str>, default_country_code: &str) -> Self {
        Self {
            id: id.into(),
            phone: raw_phone.and_then(|p| normalize_phone(p, default_country_code)),
            source_list_id: None,
            metadata: Metadata::new(),
        }
    }

    /// Set the source list id
    pub fn with_source_list(mut self, list_id: impl Into<String>) -> Self {
        self.source_list_id = Some(list_id.into());
        self
    }

    /// Attach one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Re-run normalisation on an already-populated phone field
    ///
    /// Records deserialised straight from the record store carry whatever the
    /// CRM stored, so intake normalises them before admission.
    pub fn normalized(mut self, default_country_code: &str) -> Self {
        self.phone = self
            .phone
            .as_deref()
            .and_then(|p| normalize_phone(p, default_country_code));
        self
    }

    /// Whether the lead has a usable phone number
    pub fn is_dispatchable(&self) -> bool {
        self.phone.is_some()
    }
}

/// Normalise a raw phone number to E.164
///
/// Accepts `+` prefixed numbers of 8-15 digits as-is (minus formatting).
/// Bare national numbers get the default country code prepended; for country
/// code `1` a national number must be exactly 10 digits, or 11 with a leading 1.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> Option<String> {
    let trimmed = raw.trim();
    let international = trimmed.starts_with('+') || trimmed.starts_with("00");
    let mut digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    if trimmed.starts_with("00") {
        digits.drain(..2);
    }

    if digits.is_empty() {
        return None;
    }

    let full = if international {
        digits
    } else if default_country_code == "1" {
        match digits.len() {
            10 => format!("1{}", digits),
            11 if digits.starts_with('1') => digits,
            _ => return None,
        }
    } else {
        let national = digits.trim_start_matches('0');
        format!("{}{}", default_country_code, national)
    };

    if (8..=15).contains(&full.len()) && !full.starts_with('0') {
        Some(format!("+{}", full))
    } else {
        None
    }
}
