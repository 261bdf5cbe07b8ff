use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(BrokerError::InvalidOrder(format!(
                "side must be 'buy' or 'sell', got '{}'",
                other
            ))),
        }
    }
}

/// Order submitted to `POST /v2/orders`.
///
/// Exactly the fields the broker needs; sizing is either `qty` or
/// `notional`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: String,
    pub time_in_force: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notional: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
}

impl OrderRequest {
    /// Market day order; the caller sets the size.
    pub fn market(symbol: impl Into<String>, side: Side) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: "market".to_string(),
            time_in_force: "day".to_string(),
            qty: None,
            notional: None,
            limit_price: None,
        }
    }

    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.symbol.trim().is_empty() {
            return Err(BrokerError::InvalidOrder("symbol required".into()));
        }
        match (self.qty, self.notional) {
            (None, None) => Err(BrokerError::InvalidOrder("qty or notional required".into())),
            (Some(q), _) if q <= Decimal::ZERO => {
                Err(BrokerError::InvalidOrder("qty must be positive".into()))
            }
            (_, Some(n)) if n <= Decimal::ZERO => {
                Err(BrokerError::InvalidOrder("notional must be positive".into()))
            }
            _ => Ok(()),
        }
    }
}

/// One open position from `GET /v2/positions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: Decimal,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub market_value: Option<Decimal>,
    #[serde(default)]
    pub unrealized_pl: Option<Decimal>,
}

/// One OHLCV bar from the market-data API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "o")]
    pub open: Decimal,
    #[serde(rename = "h")]
    pub high: Decimal,
    #[serde(rename = "l")]
    pub low: Decimal,
    #[serde(rename = "c")]
    pub close: Decimal,
    #[serde(rename = "v")]
    pub volume: u64,
}

/// Response from `GET /v2/stocks/{symbol}/bars`
#[derive(Debug, Deserialize)]
pub(crate) struct BarsResponse {
    #[serde(default)]
    pub bars: Option<Vec<Bar>>,
}

/// Bar timeframe, written short ("15m", "1h", "1d") by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Minutes(u32),
    Hours(u32),
    Days(u32),
}

impl Timeframe {
    /// Broker query form, e.g. `15Min`.
    pub fn as_query(&self) -> String {
        match self {
            Timeframe::Minutes(n) => format!("{}Min", n),
            Timeframe::Hours(n) => format!("{}Hour", n),
            Timeframe::Days(n) => format!("{}Day", n),
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || BrokerError::InvalidOrder(format!("unsupported timeframe '{}'", s));
        let split = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        let (count, unit) = s.split_at(split);
        let count: u32 = count.parse().map_err(|_| invalid())?;
        if count == 0 {
            return Err(invalid());
        }
        match unit.to_ascii_lowercase().as_str() {
            "m" | "min" => Ok(Timeframe::Minutes(count)),
            "h" | "hour" => Ok(Timeframe::Hours(count)),
            "d" | "day" => Ok(Timeframe::Days(count)),
            _ => Err(invalid()),
        }
    }
}
