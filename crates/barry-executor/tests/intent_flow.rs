//! End-to-end intent flow: guard middleware, order handler, mocked broker.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use barry_broker::{AlpacaClient, AlpacaConfig, Broker};
use barry_executor::{api, AppState, Features};
use intent_guard::signature::hmac_hex;
use intent_guard::{GuardConfig, IntentGuard, ManualClock};

const SECRET: &str = "s3cret";
const BUY: &str = r#"{"symbol":"AAPL","side":"buy","qty":1}"#;

/// Tue 2025-03-04 15:00 UTC, inside the default London window.
fn open_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 4, 15, 0, 0).unwrap()
}

struct Harness {
    server: MockServer,
    app: Router,
    guard: Arc<IntentGuard>,
}

async fn setup(order_status: u16, open_positions: usize) -> Harness {
    let server = MockServer::start().await;

    let positions: Vec<Value> = (0..open_positions)
        .map(|i| serde_json::json!({"symbol": format!("SYM{}", i), "qty": "1"}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/v2/positions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(positions))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/account"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"status": "ACTIVE", "buying_power": "1000"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/orders"))
        .respond_with(
            ResponseTemplate::new(order_status)
                .set_body_json(serde_json::json!({"id": "ord-1", "status": "accepted"})),
        )
        .mount(&server)
        .await;

    let broker: Arc<dyn Broker> = Arc::new(
        AlpacaClient::new(AlpacaConfig {
            base_url: server.uri(),
            data_url: server.uri(),
            key_id: Some("key".to_string()),
            secret_key: Some("secret".to_string()),
            dry_run: false,
        })
        .unwrap(),
    );
    let config = GuardConfig {
        shared_secret: Some(SECRET.to_string()),
        ..GuardConfig::default()
    };
    let state = Arc::new(AppState::with_clock(
        broker,
        config,
        Features::default(),
        Arc::new(ManualClock::new(open_time())),
    ));
    let guard = state.guard.clone().unwrap();

    Harness {
        server,
        app: api::router(state),
        guard,
    }
}

fn v2_intent(body: &str) -> Request<Body> {
    let ts = open_time().timestamp();
    Request::builder()
        .method("POST")
        .uri("/intent")
        .header("x-signature-v2", hmac_hex(SECRET, format!("{}.{}", ts, body).as_bytes()))
        .header("x-signature-ts", ts.to_string())
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn orders_received(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/v2/orders")
        .count()
}

#[tokio::test]
async fn test_signed_intent_reaches_broker_and_counts() {
    let h = setup(200, 0).await;

    let response = h.app.clone().oneshot(v2_intent(BUY)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-correlation-id"));
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["result"]["id"], "ord-1");

    assert_eq!(orders_received(&h.server).await, 1);
    assert_eq!(h.guard.trades_today().await.1, 1);
}

#[tokio::test]
async fn test_ninth_intent_hits_trade_cap() {
    let h = setup(200, 0).await;

    for _ in 0..8 {
        let response = h.app.clone().oneshot(v2_intent(BUY)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = h.app.clone().oneshot(v2_intent(BUY)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(response).await;
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["reason"], "trade_cap_reached");

    assert_eq!(orders_received(&h.server).await, 8);
    assert_eq!(h.guard.trades_today().await.1, 8);
}

#[tokio::test]
async fn test_position_cap_blocks_buys_only() {
    let h = setup(200, 4).await;

    let response = h.app.clone().oneshot(v2_intent(BUY)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert_eq!(body["reason"], "position_cap_reached");
    assert_eq!(body["positions"], 4);

    let sell = r#"{"symbol":"AAPL","side":"sell","qty":1}"#;
    let response = h.app.clone().oneshot(v2_intent(sell)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_broker_refusal_propagates_and_is_not_counted() {
    let h = setup(403, 0).await;

    let response = h.app.clone().oneshot(v2_intent(BUY)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.headers().contains_key("x-correlation-id"));
    assert_eq!(h.guard.trades_today().await.1, 0);
}

#[tokio::test]
async fn test_dry_run_intent_simulated_and_not_counted() {
    let h = setup(200, 0).await;

    let dry = r#"{"symbol":"AAPL","side":"buy","qty":1,"dry_run":true}"#;
    let response = h.app.clone().oneshot(v2_intent(dry)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["result"]["dry_run"], true);

    assert_eq!(orders_received(&h.server).await, 0);
    assert_eq!(h.guard.trades_today().await.1, 0);
}

#[tokio::test]
async fn test_legacy_signature_accepted() {
    let h = setup(200, 0).await;

    let request = Request::builder()
        .method("POST")
        .uri("/intent")
        .header("x-signature", hmac_hex(SECRET, BUY.as_bytes()))
        .body(Body::from(BUY))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.guard.trades_today().await.1, 1);
}

#[tokio::test]
async fn test_unsigned_intent_refused_by_handler() {
    let h = setup(200, 0).await;

    let request = Request::builder()
        .method("POST")
        .uri("/intent")
        .body(Body::from(BUY))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["detail"], "Bad signature");
    assert_eq!(orders_received(&h.server).await, 0);
}

#[tokio::test]
async fn test_duplicate_idempotency_key_rejected() {
    let h = setup(200, 0).await;

    let keyed = || {
        let mut request = v2_intent(BUY);
        request
            .headers_mut()
            .insert("idempotency-key", "intent-1".parse().unwrap());
        request
    };
    assert_eq!(
        h.app.clone().oneshot(keyed()).await.unwrap().status(),
        StatusCode::OK
    );
    let response = h.app.clone().oneshot(keyed()).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["reason"], "duplicate");
    assert_eq!(orders_received(&h.server).await, 1);
}

#[tokio::test]
async fn test_allowlisted_paths_leave_guard_state_alone() {
    let h = setup(200, 0).await;

    for uri in ["/", "/health", "/healthz", "/ready", "/metrics", "/status"] {
        let response = h
            .app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success(), "{}", uri);
        assert!(!response.headers().contains_key("x-correlation-id"), "{}", uri);
    }

    let state = h.guard.state_snapshot().await;
    assert_eq!(state.rate.global_len(), 0);
    assert_eq!(state.rate.tracked_identities(), 0);
    assert!(state.idempotency.is_empty());
    assert_eq!(h.guard.trades_today().await, (None, 0));
}

#[tokio::test]
async fn test_metrics_expose_guard_counters() {
    let h = setup(200, 0).await;
    h.app.clone().oneshot(v2_intent(BUY)).await.unwrap();

    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("guard_intents_admitted_total 1"));
    assert!(text.contains("guard_trades_counted_total 1"));
    assert!(text.contains("executor_orders_submitted_total 1"));
}
