//! Error types for leaddial
//!
//! Centralized error handling using thiserror. Collaborator-specific errors
//! (`StoreError`, `LaunchError`) live next to their traits and convert into
//! `DialerError` at the crate boundary.

use thiserror::Error;

use crate::launcher::LaunchError;
use crate::store::StoreError;

/// All error types that can surface from leaddial
#[derive(Debug, Error)]
pub enum DialerError {
    /// Configuration could not be loaded or is invalid
    #[error("Config error: {0}")]
    Config(String),

    /// Lead record store failure
    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    /// Call launch service failure
    #[error("Launch service error: {0}")]
    Launch(#[from] LaunchError),

    /// Worker or channel has shut down
    #[error("Shutdown: {0}")]
    Shutdown(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for leaddial operations
pub type Result<T> = std::result::Result<T, DialerError>;
