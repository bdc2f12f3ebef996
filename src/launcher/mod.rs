//! Call launch service (voice platform) collaborator
//!
//! Accepts a dial request bound to an origination identity and returns a
//! call id; later the call's status can be polled.

mod http;
mod mock;

pub use http::{HttpCallLauncher, HttpCallLauncherConfig};
pub use mock::{LaunchRecord, MockCallLauncher, MockLaunch};

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::Metadata;

/// Result of an accepted launch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    /// `None` when the service accepted the request but returned nothing to track
    pub call_id: Option<String>,
}

/// Polled status of a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStatus {
    pub ended: bool,
    pub reason: Option<String>,
}

impl CallStatus {
    pub fn active() -> Self {
        Self {
            ended: false,
            reason: None,
        }
    }

    pub fn ended(reason: impl Into<String>) -> Self {
        Self {
            ended: true,
            reason: Some(reason.into()),
        }
    }
}

/// Voice platform operations
#[async_trait]
pub trait CallLauncher: Send + Sync {
    /// Dial `phone` from the given origination identity
    async fn launch_call(
        &self,
        origination_id: &str,
        phone: &str,
        metadata: &Metadata,
    ) -> Result<LaunchOutcome, LaunchError>;

    /// Look up a call's current status
    async fn get_call_status(&self, call_id: &str) -> Result<CallStatus, LaunchError>;
}

/// Errors from the launch service
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },

    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

impl LaunchError {
    /// Classify a non-2xx HTTP status
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        if status == 429 {
            LaunchError::RateLimited { retry_after }
        } else {
            LaunchError::Api {
                status,
                message: message.into(),
            }
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LaunchError::RateLimited { .. })
    }

    /// Whether the same launch could succeed if tried again later
    pub fn is_retryable(&self) -> bool {
        match self {
            LaunchError::RateLimited { .. } | LaunchError::Network(_) => true,
            LaunchError::Api { status, .. } => *status >= 500,
            LaunchError::InvalidResponse(_) | LaunchError::MissingApiKey { .. } | LaunchError::InvalidBaseUrl(_) => {
                false
            }
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LaunchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
