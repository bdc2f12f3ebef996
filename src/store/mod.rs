//! Lead record store (CRM) collaborator
//!
//! The store is a rate-limited HTTP service that occasionally answers 429.
//! Only three operations are consumed: paginated search, field update, and
//! note append.

mod http;
mod mock;

pub use http::{HttpLeadStore, HttpLeadStoreConfig};
pub(crate) use http::{endpoint, parse_base_url, parse_retry_after};
pub use mock::MockLeadStore;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{LeadRecord, Metadata};

/// Search criteria for pulling dispatchable leads
#[derive(Debug, Clone)]
pub struct LeadFilter {
    /// Field equality criteria, passed through as query parameters
    pub criteria: BTreeMap<String, String>,
    /// Records per page
    pub page_size: usize,
}

impl Default for LeadFilter {
    fn default() -> Self {
        Self {
            criteria: BTreeMap::new(),
            page_size: 100,
        }
    }
}

impl LeadFilter {
    pub fn with_criterion(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.criteria.insert(field.into(), value.into());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

/// One page of search results
#[derive(Debug, Clone, Default)]
pub struct LeadPage {
    pub leads: Vec<LeadRecord>,
    pub has_more: bool,
}

/// Record store operations
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Fetch one page (0-based) of leads matching the filter
    async fn search(&self, filter: &LeadFilter, page: u32) -> Result<LeadPage, StoreError>;

    /// Write fields onto a lead
    async fn update_status(&self, lead_id: &str, fields: &Metadata) -> Result<(), StoreError>;

    /// Append a free-text note to a lead
    async fn append_note(&self, lead_id: &str, text: &str) -> Result<(), StoreError>;
}

/// Errors from the record store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// 4xx other than 429: the store will never accept this request
    #[error("Rejected {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },

    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

impl StoreError {
    /// Classify a non-2xx HTTP status
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        match status {
            429 => StoreError::RateLimited { retry_after },
            400..=499 => StoreError::Rejected {
                status,
                message: message.into(),
            },
            _ => StoreError::Server {
                status,
                message: message.into(),
            },
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, StoreError::RateLimited { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::RateLimited { .. } => true,
            StoreError::Server { .. } => true,
            StoreError::Network(_) => true,
            StoreError::Rejected { .. } => false,
            StoreError::InvalidResponse(_) => false,
            StoreError::MissingApiKey { .. } => false,
            StoreError::InvalidBaseUrl(_) => false,
        }
    }

    /// Server-suggested wait, if it gave one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            StoreError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
