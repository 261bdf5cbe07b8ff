//! Read-only companions to the intent endpoint.
//!
//! `/validate` dry-checks an intent (schema, session, caps) without placing
//! anything; `/limits` reports the caps and today's trade counter. Both sit
//! behind `X-Exec-Secret`.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use intent_guard::signature::signatures_match;
use intent_guard::CORRELATION_HEADER;

use crate::api::ApiError;
use crate::AppState;

const EXEC_SECRET_HEADER: &str = "x-exec-secret";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/validate", post(validate_intent))
        .route("/limits", get(limits))
}

fn verify_exec_secret(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(secret) = state.shared_secret() else {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Missing SHARED_SECRET",
        ));
    };
    let Some(provided) = headers
        .get(EXEC_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    else {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "Missing X-Exec-Secret"));
    };
    if !signatures_match(secret, provided) {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "Bad secret"));
    }
    Ok(())
}

/// Field problems keyed by field name; empty when the intent is well formed.
fn schema_issues(intent: &Value) -> Map<String, Value> {
    let mut issues = Map::new();
    let symbol_ok = intent
        .get("symbol")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if !symbol_ok {
        issues.insert("symbol".into(), json!("required"));
    }
    if !matches!(intent.get("side").and_then(Value::as_str), Some("buy" | "sell")) {
        issues.insert("side".into(), json!("must be 'buy' or 'sell'"));
    }
    let has = |field: &str| intent.get(field).is_some_and(|v| !v.is_null());
    if has("qty") == has("notional") {
        issues.insert("size".into(), json!("either qty OR notional required"));
    }
    issues
}

/// POST /validate
async fn validate_intent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(intent): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    verify_exec_secret(&state, &headers)?;

    let issues = schema_issues(&intent);
    let side = intent.get("side").and_then(Value::as_str);
    let dry_run = matches!(intent.get("dry_run"), Some(Value::Bool(true)));

    let session = &state.config.session;
    let session_ok = session.in_session(state.clock.now());

    // informational only; the guard enforces on the intent path
    let observed = match &state.guard {
        Some(guard) => guard.observed_positions().await,
        None => state.positions.open_positions().await.ok(),
    };
    let positions_now = observed.unwrap_or_else(|| {
        warn!("position lookup failed during validate, reporting 0");
        0
    });
    let caps = state.config.caps;
    let caps_ok = !(side == Some("buy") && !dry_run && positions_now >= caps.max_positions);

    let correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    debug!(
        correlation_id = correlation_id.as_deref().unwrap_or(""),
        schema_ok = issues.is_empty(),
        session_ok,
        caps_ok,
        "intent validated"
    );

    Ok(Json(json!({
        "status": "validated",
        "schema_ok": issues.is_empty(),
        "session_ok": session_ok,
        "caps_ok": caps_ok,
        "checks": {
            "session": {
                "ok": session_ok,
                "tz": session.timezone().name(),
                "window": session.describe(),
            },
            "caps": {
                "max_positions": caps.max_positions,
                "max_trades_day": caps.max_trades_day,
                "positions_now": positions_now,
            },
            "schema_issues": issues,
        },
        "echo": {
            "symbol": intent.get("symbol"),
            "side": side,
            "qty": intent.get("qty"),
            "notional": intent.get("notional"),
            "dry_run": dry_run,
        },
        "correlation_id": correlation_id,
    })))
}

/// GET /limits
async fn limits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    verify_exec_secret(&state, &headers)?;

    let caps = state.config.caps;
    let counters = match &state.guard {
        Some(guard) => {
            let (day, count) = guard.trades_today().await;
            json!({
                "trades_today": count,
                "date": day.map(|d| d.to_string()),
            })
        }
        None => json!({"trades_today": null, "date": null}),
    };

    Ok(Json(json!({
        "ok": true,
        "caps": {
            "max_positions": caps.max_positions,
            "max_trades_day": caps.max_trades_day,
        },
        "counters": counters,
    })))
}
