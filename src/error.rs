//! Error types for listing_sync

use crate::models::Platform;
use thiserror::Error;

/// Unified error type for sync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// Could not establish a usable session with a platform
    #[error("authentication with {0} failed")]
    Authentication(Platform),
    /// Platform call exceeded the adapter's request timeout
    #[error("request to {0} timed out")]
    Timeout(Platform),
    /// Platform-side validation rejected the listing data
    #[error("{platform} rejected the request: {reason}")]
    Rejected { platform: Platform, reason: String },
    /// Unknown product or listing
    #[error("not found: {0}")]
    NotFound(String),
    /// Product is already listed on the requested platform
    #[error("product {product_id} is already synced to {platform}")]
    AlreadySynced { product_id: i64, platform: Platform },
    /// HTTP request failed (network error, connection refused, etc.)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// Failed to parse a platform response
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// HTTP error status code from a platform
    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),
    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl SyncError {
    /// Fold a reqwest error into the adapter-level kinds the orchestrator
    /// distinguishes: timeouts become `Timeout`, everything else `Network`.
    pub fn from_request(err: reqwest::Error, platform: Platform) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(platform)
        } else {
            SyncError::Network(err)
        }
    }

    /// Storage failures are the only kind fatal to an enclosing operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Database(_))
    }
}

/// Result alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
