//! Error types for the autoscaler library

use thiserror::Error;

/// Result type alias for calls to the metrics source and control plane
pub type Result<T> = std::result::Result<T, AtlasError>;

/// Errors raised while talking to the Atlas Admin API
#[derive(Debug, Error)]
pub enum AtlasError {
    /// Transport-level failure (connect, timeout, TLS)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response
    #[error("API error ({status}): {body}")]
    Status { status: u16, body: String },

    /// Response body did not have the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Digest challenge could not be answered
    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl AtlasError {
    /// True for failures where retrying on the next tick makes sense
    pub fn is_transient(&self) -> bool {
        match self {
            AtlasError::Http(_) => true,
            AtlasError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Errors raised when building a size catalog
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalog has no tiers")]
    Empty,

    #[error("size tier with empty name")]
    EmptyName,

    #[error("size tier {0} listed more than once")]
    DuplicateSize(String),
}
