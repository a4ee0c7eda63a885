//! Fetch error classification.

use thiserror::Error;

/// Error returned by an [`crate::ObjectFetcher`] backend.
///
/// The classification drives the recovery policy: network errors are
/// retried automatically with capped backoff, backend errors are parked in
/// the fetcher's error state until an explicit reset.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Transport-level failure (connection refused, timeout, DNS).
    #[error("network error: {message}")]
    Network { message: String },

    /// The backend processed the request and rejected it.
    #[error("{message}")]
    Backend {
        code: Option<String>,
        message: String,
    },
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        FetchError::Network {
            message: message.into(),
        }
    }

    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        FetchError::Backend {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Whether automatic retry applies.
    pub fn is_network(&self) -> bool {
        matches!(self, FetchError::Network { .. })
    }
}
