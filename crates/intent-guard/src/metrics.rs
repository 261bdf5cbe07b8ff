use crate::error::RejectReason;

/// Guard counters, registered on the service registry.
#[derive(Clone)]
pub struct GuardMetrics {
    pub intents_admitted: prometheus::IntCounter,
    pub intents_rejected: prometheus::IntCounterVec,
    pub position_lookup_failures: prometheus::IntCounter,
    pub trades_counted: prometheus::IntCounter,
}

impl GuardMetrics {
    pub fn new(registry: &prometheus::Registry) -> Self {
        let intents_admitted = prometheus::IntCounter::new(
            "guard_intents_admitted_total",
            "Intents forwarded to the order handler",
        )
        .unwrap();
        let intents_rejected = prometheus::IntCounterVec::new(
            prometheus::Opts::new("guard_intents_rejected_total", "Intents rejected by the guard"),
            &["reason"],
        )
        .unwrap();
        let position_lookup_failures = prometheus::IntCounter::new(
            "guard_position_lookup_failures_total",
            "Failed open-position lookups",
        )
        .unwrap();
        let trades_counted = prometheus::IntCounter::new(
            "guard_trades_counted_total",
            "Successful live intents counted against the daily cap",
        )
        .unwrap();

        registry
            .register(Box::new(intents_admitted.clone()))
            .unwrap();
        registry
            .register(Box::new(intents_rejected.clone()))
            .unwrap();
        registry
            .register(Box::new(position_lookup_failures.clone()))
            .unwrap();
        registry.register(Box::new(trades_counted.clone())).unwrap();

        Self {
            intents_admitted,
            intents_rejected,
            position_lookup_failures,
            trades_counted,
        }
    }

    pub fn rejected(&self, reason: RejectReason) {
        self.intents_rejected
            .with_label_values(&[reason.as_str()])
            .inc();
    }
}

impl Default for GuardMetrics {
    fn default() -> Self {
        Self::new(&prometheus::Registry::new())
    }
}
