use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use barry_broker::{BrokerError, OrderRequest, Side, Timeframe};
use intent_guard::signature::{hmac_hex, signatures_match, LEGACY_SIGNATURE_HEADER};

use crate::AppState;

const SHARED_SECRET_HEADER: &str = "x-shared-secret";
const MAX_BARS: u32 = 1000;

/// Error body in the executor's `{"status":"error","detail":...}` shape.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"status": "error", "detail": self.detail})),
        )
            .into_response()
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::Status { status, body } => ApiError::new(
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                body,
            ),
            BrokerError::MissingCredentials => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "broker keys not set")
            }
            BrokerError::InvalidOrder(msg) => ApiError::new(StatusCode::BAD_REQUEST, msg),
            other => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("executor error: {}", other),
            ),
        }
    }
}

/// Build the axum router.
///
/// The guard, when enabled, wraps every route; it only inspects the intent
/// path.
pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/healthz", get(healthz))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/account", get(account))
        .route("/bars", get(bars))
        .route(&state.config.intent_path, post(intent));
    if state.features.validate_routes {
        app = app.merge(crate::validate::routes());
    }

    let mut app = app.with_state(state.clone());
    if let Some(guard) = &state.guard {
        app = app.layer(axum::middleware::from_fn_with_state(
            guard.clone(),
            intent_guard::intent_guard,
        ));
    }
    app.layer(TraceLayer::new_for_http())
}

/// GET /
async fn root() -> Json<Value> {
    Json(json!({"ok": true, "service": "barry-executor"}))
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "dry_run": state.broker.is_dry_run(),
        "guard": state.guard.is_some(),
    }))
}

/// GET /healthz
async fn healthz() -> Json<Value> {
    Json(json!({"ok": true}))
}

/// GET /ready - 503 once shutdown has begun
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.shutting_down.load(Ordering::Relaxed) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "shutting_down"})),
        );
    }
    (StatusCode::OK, Json(json!({"status": "ready"})))
}

/// GET /metrics
async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = prometheus::TextEncoder::new();
    let families = state.metrics.registry.gather();
    match encoder.encode_to_string(&families) {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding error: {}", e),
        )
            .into_response(),
    }
}

/// GET /status - account and open positions
async fn status(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let account = state.broker.get_account().await?;
    let positions = state.broker.get_positions().await?;
    Ok(Json(json!({
        "ok": true,
        "account": account,
        "positions": positions,
    })))
}

/// GET /account - broker account, behind `X-Shared-Secret`
async fn account(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let provided = headers
        .get(SHARED_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    let authorized = match (state.shared_secret(), provided) {
        (Some(secret), Some(provided)) => signatures_match(secret, provided),
        _ => false,
    };
    if !authorized {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized"));
    }
    Ok(Json(state.broker.get_account().await?))
}

/// GET /bars?symbol=SPY&tf=15m&limit=50
#[derive(Debug, Deserialize)]
pub struct BarsQuery {
    pub symbol: String,
    #[serde(default = "default_tf")]
    pub tf: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_tf() -> String {
    "15m".to_string()
}

fn default_limit() -> u32 {
    50
}

async fn bars(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BarsQuery>,
) -> Result<Json<Value>, ApiError> {
    let symbol = query.symbol.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "symbol required"));
    }
    if query.limit == 0 || query.limit > MAX_BARS {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("limit must be between 1 and {}", MAX_BARS),
        ));
    }
    let timeframe: Timeframe = query
        .tf
        .parse()
        .map_err(|e: BrokerError| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    let bars = state.broker.get_bars(&symbol, timeframe, query.limit).await?;
    Ok(Json(json!({
        "symbol": symbol,
        "tf": query.tf,
        "limit": query.limit,
        "bars": bars,
    })))
}

/// Intent body as the order handler reads it.
#[derive(Debug, Deserialize)]
struct IntentBody {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    qty: Option<Decimal>,
    #[serde(default)]
    notional: Option<Decimal>,
    #[serde(default, rename = "type")]
    order_type: Option<String>,
    #[serde(default)]
    time_in_force: Option<String>,
    #[serde(default)]
    limit_price: Option<Decimal>,
    #[serde(default)]
    dry_run: Option<Value>,
}

/// POST /intent - verify the legacy signature, validate, submit.
async fn intent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    verify_legacy_signature(state.shared_secret(), &headers, &body)?;

    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", e)))?;
    let parsed: IntentBody = serde_json::from_value(raw)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid intent: {}", e)))?;

    let symbol = parsed
        .symbol
        .as_deref()
        .map(|s| s.trim().to_ascii_uppercase())
        .unwrap_or_default();
    if symbol.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "symbol required"));
    }
    let side: Side = parsed
        .side
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "side must be 'buy' or 'sell'"))?;
    if parsed.qty.is_none() && parsed.notional.is_none() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "qty or notional required",
        ));
    }

    let mut order = OrderRequest::market(symbol, side);
    order.qty = parsed.qty;
    order.notional = parsed.notional;
    order.limit_price = parsed.limit_price;
    if let Some(order_type) = parsed.order_type {
        order.order_type = order_type;
    }
    if let Some(tif) = parsed.time_in_force {
        order.time_in_force = tif;
    }
    order
        .validate()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    if matches!(parsed.dry_run, Some(Value::Bool(true))) {
        state.metrics.orders_simulated.inc();
        info!(symbol = %order.symbol, side = %order.side, "dry-run intent simulated");
        return Ok(Json(json!({
            "status": "ok",
            "result": {"dry_run": true, "submitted": order},
        })));
    }

    match state.broker.submit_order(&order).await {
        Ok(result) => {
            state.metrics.orders_submitted.inc();
            info!(symbol = %order.symbol, side = %order.side, "order submitted");
            Ok(Json(json!({"status": "ok", "result": result})))
        }
        Err(e) => {
            let kind = match &e {
                BrokerError::Status { .. } => "rejected",
                _ => "error",
            };
            state.metrics.orders_failed.with_label_values(&[kind]).inc();
            match &e {
                BrokerError::Status { status, .. } => {
                    warn!(symbol = %order.symbol, status, "broker refused order")
                }
                other => error!(symbol = %order.symbol, error = %other, "order submission failed"),
            }
            Err(e.into())
        }
    }
}

fn verify_legacy_signature(
    secret: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), ApiError> {
    let Some(secret) = secret else {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Missing SHARED_SECRET",
        ));
    };
    let provided = headers
        .get(LEGACY_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided.is_empty() || !signatures_match(&hmac_hex(secret, body), provided) {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "Bad signature"));
    }
    Ok(())
}
