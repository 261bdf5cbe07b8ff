use thiserror::Error;

/// Errors from broker operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker credentials not configured")]
    MissingCredentials,

    #[error("broker returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("broker timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker returned unexpected response: {0}")]
    Unexpected(String),

    #[error("invalid order: {0}")]
    InvalidOrder(String),
}

impl BrokerError {
    /// Upstream HTTP status, when the broker answered with one.
    pub fn status(&self) -> Option<u16> {
        match self {
            BrokerError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
