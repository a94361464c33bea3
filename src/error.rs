// Error taxonomy shared by the poller, the store and the remote services
// The binary still talks anyhow; library code returns these so callers can branch on the kind

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TallyError {
    /// Credential rejected even after a refresh
    #[error("Authentication failed: {0}")]
    TransientAuth(String),

    /// Provider asked us to back off - polling must stop, not spin
    #[error("Rate limited by provider (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Stats store unavailable: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Could not decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl TallyError {
    /// Errors that mean "stop polling and wake a human"
    pub fn halts_polling(&self) -> bool {
        matches!(self, TallyError::RateLimited { .. } | TallyError::TransientAuth(_))
    }
}

pub type TallyResult<T> = std::result::Result<T, TallyError>;
