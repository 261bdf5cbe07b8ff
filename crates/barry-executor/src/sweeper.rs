use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::AppState;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically drop expired guard state until shutdown.
pub async fn run(state: Arc<AppState>, interval: Duration) {
    let Some(guard) = state.guard.clone() else {
        return;
    };
    info!(interval_secs = interval.as_secs(), "guard sweeper started");

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if state.shutting_down.load(Ordering::Relaxed) {
            info!("guard sweeper shutting down");
            break;
        }
        guard.sweep().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Features;
    use barry_broker::{AlpacaClient, AlpacaConfig, Broker};
    use intent_guard::GuardConfig;

    fn state(guard: bool) -> Arc<AppState> {
        let broker: Arc<dyn Broker> = Arc::new(
            AlpacaClient::new(AlpacaConfig {
                dry_run: true,
                ..AlpacaConfig::default()
            })
            .unwrap(),
        );
        Arc::new(AppState::new(
            broker,
            GuardConfig::default(),
            Features {
                guard,
                validate_routes: false,
            },
        ))
    }

    #[tokio::test]
    async fn test_returns_immediately_without_guard() {
        run(state(false), SWEEP_INTERVAL).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_shutdown() {
        let state = state(true);
        let handle = tokio::spawn(run(state.clone(), Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!handle.is_finished());

        state.shutting_down.store(true, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
    }
}
