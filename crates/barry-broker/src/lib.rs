//! Broker access for the barry executor.

pub mod alpaca;
pub mod error;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;

pub use alpaca::{AlpacaClient, AlpacaConfig};
pub use error::BrokerError;
pub use types::{Bar, OrderRequest, Position, Side, Timeframe};

/// Trait for brokerage adapters.
///
/// Account and order acknowledgements are passed through as the broker's
/// own JSON so callers can proxy them unchanged.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Currently open positions.
    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError>;

    /// Number of open positions. Only the list length is read, so entries
    /// with unfamiliar fields still count.
    async fn count_positions(&self) -> Result<usize, BrokerError> {
        Ok(self.get_positions().await?.len())
    }

    async fn get_account(&self) -> Result<Value, BrokerError>;

    /// Submit an order. Returns the broker acknowledgement.
    async fn submit_order(&self, order: &OrderRequest) -> Result<Value, BrokerError>;

    /// Most recent bars for `symbol`, oldest first.
    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Bar>, BrokerError>;

    /// Whether calls are simulated.
    fn is_dry_run(&self) -> bool;
}
