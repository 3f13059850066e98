//! Errors surfaced by an `LlmClient` implementation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("request timed out")]
    Timeout,
}
