//! Risk caps: trades per UTC day and concurrently open positions.
//!
//! Both are advisory gates. Nothing is reserved by a passing check; the
//! daily counter only moves after the downstream handler reports success,
//! so concurrent in-flight intents can all pass before any is counted.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tracing::warn;

use crate::error::{ConfigError, PositionError};
use crate::intent::IntentFields;

/// Source of the live open-position count (the broker).
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn open_positions(&self) -> Result<usize, PositionError>;
}

/// What a failed position lookup means for the position cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionLookupPolicy {
    /// Treat the count as zero and let the intent through.
    #[default]
    FailOpen,
    /// Reject the intent as if the cap were reached.
    FailClosed,
}

impl PositionLookupPolicy {
    pub fn resolve(
        self,
        lookup: Result<usize, PositionError>,
    ) -> Result<usize, PositionError> {
        match (self, lookup) {
            (_, Ok(count)) => Ok(count),
            (PositionLookupPolicy::FailOpen, Err(e)) => {
                warn!(error = %e, "position lookup failed, treating open positions as 0");
                Ok(0)
            }
            (PositionLookupPolicy::FailClosed, Err(e)) => {
                warn!(error = %e, "position lookup failed, failing closed");
                Err(e)
            }
        }
    }
}

impl std::str::FromStr for PositionLookupPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_open" | "open" => Ok(PositionLookupPolicy::FailOpen),
            "fail_closed" | "closed" => Ok(PositionLookupPolicy::FailClosed),
            other => Err(ConfigError::InvalidValue {
                var: "POSITION_LOOKUP_POLICY",
                reason: format!("expected fail_open or fail_closed, got {:?}", other),
            }),
        }
    }
}

/// Static risk ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskCaps {
    pub max_positions: usize,
    pub max_trades_day: u32,
}

impl Default for RiskCaps {
    fn default() -> Self {
        Self {
            max_positions: 4,
            max_trades_day: 8,
        }
    }
}

/// Trades counted on one UTC calendar day.
///
/// Rolls lazily: whenever the observed day differs from the stored day the
/// count resets to zero before it is read or incremented.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailyTradeCounter {
    day: Option<NaiveDate>,
    count: u32,
}

impl DailyTradeCounter {
    fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.count = 0;
        }
    }

    pub fn count(&mut self, now: DateTime<Utc>) -> u32 {
        self.roll(now);
        self.count
    }

    pub fn increment(&mut self, now: DateTime<Utc>) -> u32 {
        self.roll(now);
        self.count += 1;
        self.count
    }

    /// Stored (day, count) without rolling.
    pub fn snapshot(&self) -> (Option<NaiveDate>, u32) {
        (self.day, self.count)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RiskRejection {
    #[error("trade cap reached: {count}/{limit} trades today")]
    TradeCapReached { count: u32, limit: u32 },

    #[error("position cap reached: {positions}/{limit} open positions")]
    PositionCapReached { positions: usize, limit: usize },

    #[error("position lookup failed: {0}")]
    PositionLookupFailed(PositionError),
}

/// Risk cap checks against a live position source.
pub struct RiskCapGuard {
    caps: RiskCaps,
    policy: PositionLookupPolicy,
    lookup_timeout: StdDuration,
    positions: Arc<dyn PositionSource>,
    failures: Option<prometheus::IntCounter>,
}

impl RiskCapGuard {
    pub fn new(
        caps: RiskCaps,
        policy: PositionLookupPolicy,
        lookup_timeout: StdDuration,
        positions: Arc<dyn PositionSource>,
    ) -> Self {
        Self {
            caps,
            policy,
            lookup_timeout,
            positions,
            failures: None,
        }
    }

    /// Count failed lookups (including timeouts) on `counter`.
    pub fn with_failure_counter(mut self, counter: prometheus::IntCounter) -> Self {
        self.failures = Some(counter);
        self
    }

    /// Daily cap. Caller holds the state lock; never increments.
    pub fn check_trade_cap(
        &self,
        counter: &mut DailyTradeCounter,
        intent: &IntentFields,
        now: DateTime<Utc>,
    ) -> Result<(), RiskRejection> {
        if intent.dry_run {
            return Ok(());
        }
        let count = counter.count(now);
        if count >= self.caps.max_trades_day {
            return Err(RiskRejection::TradeCapReached {
                count,
                limit: self.caps.max_trades_day,
            });
        }
        Ok(())
    }

    /// Position cap for live buys. Performs network I/O; call without the lock.
    pub async fn check_position_cap(&self, intent: &IntentFields) -> Result<(), RiskRejection> {
        if intent.dry_run || !intent.is_buy() {
            return Ok(());
        }
        let positions = self
            .policy
            .resolve(self.lookup_positions().await)
            .map_err(RiskRejection::PositionLookupFailed)?;
        if positions >= self.caps.max_positions {
            return Err(RiskRejection::PositionCapReached {
                positions,
                limit: self.caps.max_positions,
            });
        }
        Ok(())
    }

    /// Open positions for reporting; `None` when the lookup fails.
    pub async fn observed_positions(&self) -> Option<usize> {
        self.lookup_positions().await.ok()
    }

    async fn lookup_positions(&self) -> Result<usize, PositionError> {
        let result =
            match tokio::time::timeout(self.lookup_timeout, self.positions.open_positions()).await {
                Ok(result) => result,
                Err(_) => Err(PositionError::Timeout {
                    timeout_ms: self.lookup_timeout.as_millis() as u64,
                }),
            };
        if result.is_err() {
            if let Some(failures) = &self.failures {
                failures.inc();
            }
        }
        result
    }
}

impl std::fmt::Debug for RiskCapGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskCapGuard")
            .field("caps", &self.caps)
            .field("policy", &self.policy)
            .field("lookup_timeout", &self.lookup_timeout)
            .finish()
    }
}
