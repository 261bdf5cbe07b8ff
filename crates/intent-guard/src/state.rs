use crate::config::GuardConfig;
use crate::idempotency::IdempotencyCache;
use crate::rate_limit::RateLimiter;
use crate::risk::DailyTradeCounter;

/// All mutable guard state.
///
/// Lives behind one lock owned by the `IntentGuard`; every read or mutation
/// happens inside a short critical section with no I/O.
#[derive(Debug, Clone)]
pub struct GuardState {
    pub rate: RateLimiter,
    pub idempotency: IdempotencyCache,
    pub trades: DailyTradeCounter,
}

impl GuardState {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            rate: RateLimiter::new(config.rate_limit, config.global_rate_limit),
            idempotency: IdempotencyCache::new(config.idempotency_ttl_secs),
            trades: DailyTradeCounter::default(),
        }
    }
}
