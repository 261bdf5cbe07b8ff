use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::BrokerError;
use crate::types::{Bar, BarsResponse, OrderRequest, Position, Timeframe};
use crate::Broker;

pub const DEFAULT_BASE_URL: &str = "https://paper-api.alpaca.markets";
pub const DEFAULT_DATA_URL: &str = "https://data.alpaca.markets";

const POSITIONS_TIMEOUT: Duration = Duration::from_secs(8);
const ORDER_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const KEY_HEADER: &str = "APCA-API-KEY-ID";
const SECRET_HEADER: &str = "APCA-API-SECRET-KEY";

#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    pub base_url: String,
    pub data_url: String,
    pub key_id: Option<String>,
    pub secret_key: Option<String>,
    /// Short-circuit every call with a simulated response.
    pub dry_run: bool,
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            data_url: DEFAULT_DATA_URL.to_string(),
            key_id: None,
            secret_key: None,
            dry_run: false,
        }
    }
}

struct Credentials {
    key_id: String,
    secret_key: String,
}

/// Alpaca trading and market-data REST client
pub struct AlpacaClient {
    http: Client,
    base_url: String,
    data_url: String,
    credentials: Option<Credentials>,
    dry_run: bool,
}

impl AlpacaClient {
    pub fn new(config: AlpacaConfig) -> Result<Self, BrokerError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let credentials = match (config.key_id, config.secret_key) {
            (Some(key_id), Some(secret_key)) if !key_id.is_empty() && !secret_key.is_empty() => {
                Some(Credentials { key_id, secret_key })
            }
            _ => None,
        };

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            data_url: config.data_url.trim_end_matches('/').to_string(),
            credentials,
            dry_run: config.dry_run,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    fn authed(&self, request: RequestBuilder) -> Result<RequestBuilder, BrokerError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(BrokerError::MissingCredentials)?;
        Ok(request
            .header(KEY_HEADER, &credentials.key_id)
            .header(SECRET_HEADER, &credentials.secret_key))
    }

    async fn send(
        &self,
        request: RequestBuilder,
        timeout: Duration,
    ) -> Result<reqwest::Response, BrokerError> {
        let resp = self
            .authed(request)?
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BrokerError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    }
                } else {
                    BrokerError::Connection(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "broker request failed");
            return Err(BrokerError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<T, BrokerError> {
        debug!(url = %url, "GET request");
        let resp = self
            .send(self.http.get(url).query(query), timeout)
            .await?;
        resp.json()
            .await
            .map_err(|e| BrokerError::Unexpected(e.to_string()))
    }
}

#[async_trait]
impl Broker for AlpacaClient {
    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        if self.dry_run {
            return Ok(Vec::new());
        }
        let url = format!("{}/v2/positions", self.base_url);
        self.get_json(&url, &[], POSITIONS_TIMEOUT).await
    }

    async fn count_positions(&self) -> Result<usize, BrokerError> {
        if self.dry_run {
            return Ok(0);
        }
        let url = format!("{}/v2/positions", self.base_url);
        let positions: Vec<Value> = self.get_json(&url, &[], POSITIONS_TIMEOUT).await?;
        Ok(positions.len())
    }

    async fn get_account(&self) -> Result<Value, BrokerError> {
        if self.dry_run {
            return Ok(json!({"dry_run": true, "status": "DRY_RUN", "buying_power": "0"}));
        }
        let url = format!("{}/v2/account", self.base_url);
        self.get_json(&url, &[], DEFAULT_TIMEOUT).await
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<Value, BrokerError> {
        order.validate()?;
        if self.dry_run {
            return Ok(json!({"dry_run": true, "submitted": order}));
        }

        let url = format!("{}/v2/orders", self.base_url);
        debug!(url = %url, symbol = %order.symbol, side = %order.side, "POST request");
        let resp = self
            .send(self.http.post(&url).json(order), ORDER_TIMEOUT)
            .await?;
        resp.json()
            .await
            .map_err(|e| BrokerError::Unexpected(e.to_string()))
    }

    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Bar>, BrokerError> {
        if self.dry_run {
            return Ok(Vec::new());
        }
        let url = format!(
            "{}/v2/stocks/{}/bars",
            self.data_url,
            symbol.trim().to_ascii_uppercase()
        );
        let query = [
            ("timeframe", timeframe.as_query()),
            ("limit", limit.to_string()),
        ];
        let resp: BarsResponse = self.get_json(&url, &query, DEFAULT_TIMEOUT).await?;
        Ok(resp.bars.unwrap_or_default())
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}
