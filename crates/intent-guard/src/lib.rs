//! Intent guard: a pre-dispatch filter for the order-intent endpoint.
//!
//! Every `POST` to the intent path passes rate limiting, signature
//! verification, idempotency, the trading-session window and risk caps
//! before it reaches the order handler. Other paths are forwarded untouched.

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod idempotency;
pub mod intent;
pub mod metrics;
pub mod middleware;
pub mod rate_limit;
pub mod risk;
pub mod session;
pub mod signature;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GuardConfig;
pub use error::{ConfigError, PositionError, RejectReason, SignatureError};
pub use guard::{Admission, IntentGuard, Rejection, Route, SignedRequest, CORRELATION_HEADER};
pub use metrics::GuardMetrics;
pub use middleware::intent_guard;
pub use risk::{PositionLookupPolicy, PositionSource, RiskCaps};
pub use session::SessionWindow;
