use axum::http::StatusCode;
use thiserror::Error;

/// Errors from loading or validating guard configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },

    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("invalid time of day (expected HH:MM): {0}")]
    InvalidTimeOfDay(String),

    #[error("session window start {start} is after end {end}")]
    EmptySessionWindow { start: String, end: String },
}

/// Errors from request signature verification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("server missing secret")]
    MissingSecret,

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("stale signature: skew {skew_secs}s exceeds {limit_secs}s")]
    StaleSignature { skew_secs: i64, limit_secs: i64 },

    #[error("bad signature")]
    BadSignature,

    #[error("v2 signature required")]
    SignatureRequired,
}

/// Errors from the external position source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PositionError {
    #[error("position source not configured")]
    NotConfigured,

    #[error("position lookup timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("position lookup returned status {0}")]
    Status(u16),

    #[error("position lookup failed: {0}")]
    Transport(String),

    #[error("unexpected position payload: {0}")]
    Unexpected(String),
}

/// Why the guard refused an intent.
///
/// Each reason maps to a fixed wire string and HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    RateLimit,
    InvalidTimestamp,
    StaleSignature,
    BadSignature,
    SignatureRequired,
    MissingSecret,
    InvalidBody,
    Duplicate,
    OutsideSession,
    TradeCapReached,
    PositionCapReached,
}

impl RejectReason {
    pub const ALL: [RejectReason; 11] = [
        RejectReason::RateLimit,
        RejectReason::InvalidTimestamp,
        RejectReason::StaleSignature,
        RejectReason::BadSignature,
        RejectReason::SignatureRequired,
        RejectReason::MissingSecret,
        RejectReason::InvalidBody,
        RejectReason::Duplicate,
        RejectReason::OutsideSession,
        RejectReason::TradeCapReached,
        RejectReason::PositionCapReached,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::RateLimit => "rate_limit",
            RejectReason::InvalidTimestamp => "invalid_timestamp",
            RejectReason::StaleSignature => "stale_signature",
            RejectReason::BadSignature => "bad_signature",
            RejectReason::SignatureRequired => "signature_required",
            RejectReason::MissingSecret => "missing_secret",
            RejectReason::InvalidBody => "invalid_body",
            RejectReason::Duplicate => "duplicate",
            RejectReason::OutsideSession => "outside_session",
            RejectReason::TradeCapReached => "trade_cap_reached",
            RejectReason::PositionCapReached => "position_cap_reached",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RejectReason::RateLimit | RejectReason::TradeCapReached => {
                StatusCode::TOO_MANY_REQUESTS
            }
            RejectReason::InvalidTimestamp
            | RejectReason::StaleSignature
            | RejectReason::BadSignature
            | RejectReason::SignatureRequired
            | RejectReason::OutsideSession => StatusCode::FORBIDDEN,
            RejectReason::MissingSecret => StatusCode::INTERNAL_SERVER_ERROR,
            RejectReason::InvalidBody => StatusCode::PAYLOAD_TOO_LARGE,
            RejectReason::Duplicate | RejectReason::PositionCapReached => StatusCode::CONFLICT,
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&SignatureError> for RejectReason {
    fn from(err: &SignatureError) -> Self {
        match err {
            SignatureError::MissingSecret => RejectReason::MissingSecret,
            SignatureError::InvalidTimestamp(_) => RejectReason::InvalidTimestamp,
            SignatureError::StaleSignature { .. } => RejectReason::StaleSignature,
            SignatureError::BadSignature => RejectReason::BadSignature,
            SignatureError::SignatureRequired => RejectReason::SignatureRequired,
        }
    }
}
