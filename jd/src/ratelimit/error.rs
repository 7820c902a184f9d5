//! Rate limiter errors

use std::time::Duration;

use thiserror::Error;

/// Why a call could not get through the limiter
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit wait for '{key}' timed out after {waited:?}")]
    Timeout { key: String, waited: Duration },

    #[error("rate limit for '{key}' rejected request: {reason}")]
    Rejected { key: String, reason: String },

    #[error("rate limiter for '{key}' dropped the request")]
    Closed { key: String },
}

impl RateLimitError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Timeout { key, .. } | Self::Rejected { key, .. } | Self::Closed { key } => key,
        }
    }
}
