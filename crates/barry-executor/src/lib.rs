pub mod api;
pub mod positions;
pub mod shutdown;
pub mod sweeper;
pub mod validate;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use barry_broker::Broker;
use intent_guard::{Clock, GuardConfig, GuardMetrics, IntentGuard, PositionSource, SystemClock};

use crate::positions::BrokerPositions;

/// Executor counters, on the same registry as the guard's.
pub struct Metrics {
    pub registry: prometheus::Registry,
    pub orders_submitted: prometheus::IntCounter,
    pub orders_simulated: prometheus::IntCounter,
    pub orders_failed: prometheus::IntCounterVec,
}

impl Metrics {
    pub fn new(registry: prometheus::Registry) -> Self {
        let orders_submitted = prometheus::IntCounter::new(
            "executor_orders_submitted_total",
            "Orders accepted by the broker",
        )
        .unwrap();
        let orders_simulated = prometheus::IntCounter::new(
            "executor_orders_simulated_total",
            "Dry-run intents answered without submitting",
        )
        .unwrap();
        let orders_failed = prometheus::IntCounterVec::new(
            prometheus::Opts::new("executor_orders_failed_total", "Orders the broker refused or errored on"),
            &["kind"],
        )
        .unwrap();

        registry.register(Box::new(orders_submitted.clone())).unwrap();
        registry.register(Box::new(orders_simulated.clone())).unwrap();
        registry.register(Box::new(orders_failed.clone())).unwrap();

        Self {
            registry,
            orders_submitted,
            orders_simulated,
            orders_failed,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(prometheus::Registry::new())
    }
}

/// Which optional route groups are mounted.
#[derive(Debug, Clone, Copy)]
pub struct Features {
    pub guard: bool,
    pub validate_routes: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            guard: true,
            validate_routes: true,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub broker: Arc<dyn Broker>,
    pub positions: Arc<dyn PositionSource>,
    /// `None` when the guard is switched off.
    pub guard: Option<Arc<IntentGuard>>,
    pub config: GuardConfig,
    pub clock: Arc<dyn Clock>,
    pub features: Features,
    pub metrics: Metrics,
    pub shutting_down: AtomicBool,
}

impl AppState {
    pub fn new(broker: Arc<dyn Broker>, config: GuardConfig, features: Features) -> Self {
        Self::with_clock(broker, config, features, Arc::new(SystemClock))
    }

    pub fn with_clock(
        broker: Arc<dyn Broker>,
        config: GuardConfig,
        features: Features,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Metrics::default();
        let positions: Arc<dyn PositionSource> = Arc::new(BrokerPositions::new(broker.clone()));
        let guard = features.guard.then(|| {
            Arc::new(
                IntentGuard::new(
                    config.clone(),
                    positions.clone(),
                    GuardMetrics::new(&metrics.registry),
                )
                .with_clock(clock.clone()),
            )
        });

        Self {
            broker,
            positions,
            guard,
            config,
            clock,
            features,
            metrics,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn shared_secret(&self) -> Option<&str> {
        self.config.shared_secret.as_deref()
    }
}
