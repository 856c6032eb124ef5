//! Fetch Error Types
//!
//! Structured error handling for network fetches and the cache policies built on them.
//! Recoverable variants are absorbed by falling back to cached records.

use crate::cache::StoreError;

/// Failure of a single fetch, either from the network or from a cache policy
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Store(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Whether a cached record may stand in for the failed fetch
    ///
    /// Store failures count as network failures: either way the live answer is unavailable.
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_) | FetchError::Timeout | FetchError::Store(_)
        )
    }

    /// Classify a reqwest transport error
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<StoreError> for FetchError {
    fn from(err: StoreError) -> Self {
        FetchError::Store(err.to_string())
    }
}

impl From<url::ParseError> for FetchError {
    fn from(err: url::ParseError) -> Self {
        FetchError::InvalidUrl(err.to_string())
    }
}
