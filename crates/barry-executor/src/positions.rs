use std::sync::Arc;

use async_trait::async_trait;
use barry_broker::{Broker, BrokerError};
use intent_guard::{PositionError, PositionSource};

/// Open-position count read from the broker.
pub struct BrokerPositions {
    broker: Arc<dyn Broker>,
}

impl BrokerPositions {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl PositionSource for BrokerPositions {
    async fn open_positions(&self) -> Result<usize, PositionError> {
        self.broker
            .count_positions()
            .await
            .map_err(position_error)
    }
}

fn position_error(e: BrokerError) -> PositionError {
    match e {
        BrokerError::MissingCredentials => PositionError::NotConfigured,
        BrokerError::Timeout { timeout_ms } => PositionError::Timeout { timeout_ms },
        BrokerError::Status { status, .. } => PositionError::Status(status),
        BrokerError::Connection(msg) => PositionError::Transport(msg),
        BrokerError::Unexpected(msg) | BrokerError::InvalidOrder(msg) => {
            PositionError::Unexpected(msg)
        }
    }
}
