//! The guard pipeline for the order-intent endpoint.
//!
//! Fixed order, terminal on the first rejection:
//! allowlist -> rate limit -> signature -> idempotency -> session -> risk caps
//! -> forward. After the downstream handler answers 2xx for a live intent the
//! daily trade counter is incremented once.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;
use crate::error::RejectReason;
use crate::idempotency::IDEMPOTENCY_HEADERS;
use crate::intent::IntentFields;
use crate::metrics::GuardMetrics;
use crate::risk::{PositionSource, RiskCapGuard, RiskRejection};
use crate::signature::{hmac_hex, SignatureVerifier, LEGACY_SIGNATURE_HEADER};
use crate::state::GuardState;

pub const CORRELATION_HEADER: &str = "x-correlation-id";
const REQUEST_ID_HEADER: &str = "x-request-id";
const CORRELATION_ID_LEN: usize = 16;
const FALLBACK_CORRELATION_KEY: &str = "bbb";

/// Inbound request snapshot. Never mutated; admission yields a rewritten
/// header set to forward instead.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub body: Bytes,
    pub headers: HeaderMap,
    pub identity: String,
    pub received_at: DateTime<Utc>,
}

/// How a request is routed through the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Allowlisted,
    Passthrough,
    Guarded,
}

/// A request that cleared every check.
#[derive(Debug, Clone)]
pub struct Admission {
    pub correlation_id: String,
    /// Headers to forward, with the legacy signature installed when a
    /// versioned signature was verified.
    pub headers: HeaderMap,
    pub intent: IntentFields,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub correlation_id: String,
    pub detail: Option<String>,
    pub positions: Option<usize>,
}

impl Rejection {
    pub fn new(reason: RejectReason, correlation_id: impl Into<String>) -> Self {
        Self {
            reason,
            correlation_id: correlation_id.into(),
            detail: None,
            positions: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "status": "rejected",
            "reason": self.reason.as_str(),
            "correlation_id": self.correlation_id,
        });
        if let Some(detail) = &self.detail {
            body["detail"] = serde_json::json!(detail);
        }
        if let Some(positions) = self.positions {
            body["positions"] = serde_json::json!(positions);
        }
        body
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut response = (self.reason.status(), Json(self.body())).into_response();
        attach_correlation_id(response.headers_mut(), &self.correlation_id);
        response
    }
}

/// Set the correlation header unless the handler already did.
pub fn attach_correlation_id(headers: &mut HeaderMap, correlation_id: &str) {
    if headers.contains_key(CORRELATION_HEADER) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        headers.insert(CORRELATION_HEADER, value);
    }
}

pub struct IntentGuard {
    config: GuardConfig,
    verifier: SignatureVerifier,
    risk: RiskCapGuard,
    clock: Arc<dyn Clock>,
    state: Mutex<GuardState>,
    metrics: GuardMetrics,
}

impl IntentGuard {
    pub fn new(
        config: GuardConfig,
        positions: Arc<dyn PositionSource>,
        metrics: GuardMetrics,
    ) -> Self {
        let verifier = SignatureVerifier::new(
            config.shared_secret.clone(),
            config.skew_secs,
            config.require_v2,
        );
        let risk = RiskCapGuard::new(
            config.caps,
            config.position_policy,
            config.position_lookup_timeout,
            positions,
        )
        .with_failure_counter(metrics.position_lookup_failures.clone());
        let state = Mutex::new(GuardState::new(&config));

        Self {
            config,
            verifier,
            risk,
            clock: Arc::new(SystemClock),
            state,
            metrics,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn route(&self, method: &Method, path: &str) -> Route {
        if self.config.is_allowlisted(path) {
            Route::Allowlisted
        } else if method == Method::POST && self.config.is_intent_path(path) {
            Route::Guarded
        } else {
            Route::Passthrough
        }
    }

    /// Caller-supplied correlation id, or one derived from the secret and time.
    pub fn correlation_id(&self, headers: &HeaderMap, now: DateTime<Utc>) -> String {
        for name in [CORRELATION_HEADER, REQUEST_ID_HEADER] {
            if let Some(id) = headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
            {
                return id.to_string();
            }
        }
        let key = self
            .config
            .shared_secret
            .as_deref()
            .unwrap_or(FALLBACK_CORRELATION_KEY);
        let seed = now.timestamp_nanos_opt().unwrap_or_default().to_string();
        let mut id = hmac_hex(key, seed.as_bytes());
        id.truncate(CORRELATION_ID_LEN);
        id
    }

    /// Run every check in order. Mutates rate windows and idempotency state.
    pub async fn evaluate(&self, request: &SignedRequest) -> Result<Admission, Rejection> {
        let now = request.received_at;
        let correlation_id = self.correlation_id(&request.headers, now);
        let reject = |reason: RejectReason| Rejection::new(reason, correlation_id.clone());

        // rate limit, before any authentication work
        let admitted = {
            let mut state = self.state.lock().await;
            let per_identity = state.rate.admit(&request.identity, now);
            let global = state.rate.admit_global(now);
            per_identity && global
        };
        if !admitted {
            return Err(self.rejected(reject(RejectReason::RateLimit), &request.identity));
        }

        let verified = self
            .verifier
            .verify(&request.headers, &request.body, now)
            .map_err(|e| {
                let rejection = reject(RejectReason::from(&e)).with_detail(e.to_string());
                self.rejected(rejection, &request.identity)
            })?;

        let mut headers = request.headers.clone();
        if let Some(value) = verified
            .legacy_rewrite()
            .and_then(|sig| HeaderValue::from_str(sig).ok())
        {
            headers.insert(LEGACY_SIGNATURE_HEADER, value);
        }

        if let Some(key) = idempotency_key(&request.headers) {
            let first = self.state.lock().await.idempotency.claim(key, now);
            if !first {
                return Err(self.rejected(reject(RejectReason::Duplicate), &request.identity));
            }
        }

        if !self.config.session.in_session(now) {
            return Err(self.rejected(reject(RejectReason::OutsideSession), &request.identity));
        }

        let intent = IntentFields::from_body(&request.body);
        self.check_risk_caps(&intent, now).await.map_err(|e| {
            let rejection = match &e {
                RiskRejection::TradeCapReached { .. } => reject(RejectReason::TradeCapReached),
                RiskRejection::PositionCapReached { positions, .. } => Rejection {
                    positions: Some(*positions),
                    ..reject(RejectReason::PositionCapReached)
                },
                RiskRejection::PositionLookupFailed(_) => {
                    reject(RejectReason::PositionCapReached)
                }
            };
            self.rejected(rejection.with_detail(e.to_string()), &request.identity)
        })?;

        self.metrics.intents_admitted.inc();
        info!(
            correlation_id = %correlation_id,
            identity = %request.identity,
            symbol = intent.symbol.as_deref().unwrap_or(""),
            side = intent.side.as_deref().unwrap_or(""),
            dry_run = intent.dry_run,
            "intent admitted"
        );

        Ok(Admission {
            correlation_id,
            headers,
            intent,
        })
    }

    /// Trade cap under the lock, then the position cap with the lock released.
    pub async fn check_risk_caps(
        &self,
        intent: &IntentFields,
        now: DateTime<Utc>,
    ) -> Result<(), RiskRejection> {
        {
            let mut state = self.state.lock().await;
            self.risk.check_trade_cap(&mut state.trades, intent, now)?;
        }
        self.risk.check_position_cap(intent).await
    }

    /// Feed the downstream status back. Returns the new daily count when the
    /// intent was counted.
    pub async fn record_response(&self, admission: &Admission, status: StatusCode) -> Option<u32> {
        if admission.intent.dry_run || !status.is_success() {
            debug!(
                correlation_id = %admission.correlation_id,
                status = status.as_u16(),
                dry_run = admission.intent.dry_run,
                "intent not counted"
            );
            return None;
        }
        let count = self.state.lock().await.trades.increment(self.clock.now());
        self.metrics.trades_counted.inc();
        info!(
            correlation_id = %admission.correlation_id,
            trades_today = count,
            "trade counted"
        );
        Some(count)
    }

    /// Stored (day, count) of the daily trade counter.
    pub async fn trades_today(&self) -> (Option<NaiveDate>, u32) {
        self.state.lock().await.trades.snapshot()
    }

    /// Drop expired idempotency keys and idle rate windows.
    pub async fn sweep(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.idempotency.purge(now);
        let pruned = state.rate.prune_idle(now);
        if pruned > 0 {
            debug!(
                pruned,
                tracked = state.rate.tracked_identities(),
                keys = state.idempotency.len(),
                "guard state swept"
            );
        }
    }

    /// Copy of the mutable state, for inspection endpoints.
    pub async fn state_snapshot(&self) -> GuardState {
        self.state.lock().await.clone()
    }

    pub async fn observed_positions(&self) -> Option<usize> {
        self.risk.observed_positions().await
    }

    pub(crate) fn rejected(&self, rejection: Rejection, identity: &str) -> Rejection {
        self.metrics.rejected(rejection.reason);
        warn!(
            correlation_id = %rejection.correlation_id,
            identity = %identity,
            reason = %rejection.reason,
            detail = rejection.detail.as_deref().unwrap_or(""),
            "intent rejected"
        );
        rejection
    }
}

impl std::fmt::Debug for IntentGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentGuard")
            .field("intent_path", &self.config.intent_path)
            .field("risk", &self.risk)
            .finish()
    }
}

fn idempotency_key(headers: &HeaderMap) -> Option<&str> {
    IDEMPOTENCY_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::PositionError;
    use crate::rate_limit::RateLimit;
    use crate::signature::{V2_SIGNATURE_HEADER, V2_TIMESTAMP_HEADER};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    const SECRET: &str = "s3cret";
    const BODY: &str = r#"{"symbol":"AAPL","side":"buy","qty":1}"#;

    struct FixedPositions(usize);

    #[async_trait]
    impl PositionSource for FixedPositions {
        async fn open_positions(&self) -> Result<usize, PositionError> {
            Ok(self.0)
        }
    }

    /// Tue 2025-03-04 15:00 UTC, inside the default London window.
    fn open_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 15, 0, 0).unwrap()
    }

    fn config() -> GuardConfig {
        GuardConfig {
            shared_secret: Some(SECRET.to_string()),
            ..GuardConfig::default()
        }
    }

    fn guard_with(config: GuardConfig, positions: usize) -> (IntentGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(open_time()));
        let guard = IntentGuard::new(
            config,
            Arc::new(FixedPositions(positions)),
            GuardMetrics::default(),
        )
        .with_clock(clock.clone());
        (guard, clock)
    }

    fn signed(body: &str, at: DateTime<Utc>) -> SignedRequest {
        let ts = at.timestamp();
        let mut headers = HeaderMap::new();
        headers.insert(
            V2_SIGNATURE_HEADER,
            HeaderValue::from_str(&hmac_hex(SECRET, format!("{}.{}", ts, body).as_bytes()))
                .unwrap(),
        );
        headers.insert(
            V2_TIMESTAMP_HEADER,
            HeaderValue::from_str(&ts.to_string()).unwrap(),
        );
        SignedRequest {
            body: Bytes::from(body.to_string()),
            headers,
            identity: "10.0.0.1".to_string(),
            received_at: at,
        }
    }

    fn with_header(mut req: SignedRequest, name: &'static str, value: &str) -> SignedRequest {
        req.headers.insert(name, HeaderValue::from_str(value).unwrap());
        req
    }

    #[test]
    fn test_route_classification() {
        let (guard, _) = guard_with(config(), 0);
        assert_eq!(guard.route(&Method::POST, "/intent"), Route::Guarded);
        assert_eq!(guard.route(&Method::POST, "/intent/"), Route::Guarded);
        assert_eq!(guard.route(&Method::GET, "/intent"), Route::Passthrough);
        assert_eq!(guard.route(&Method::POST, "/orders"), Route::Passthrough);
        assert_eq!(guard.route(&Method::GET, "/health"), Route::Allowlisted);
        assert_eq!(guard.route(&Method::POST, "/validate"), Route::Allowlisted);
    }

    #[tokio::test]
    async fn test_admits_and_rewrites_legacy_signature() {
        let (guard, _) = guard_with(config(), 0);
        let admission = guard.evaluate(&signed(BODY, open_time())).await.unwrap();
        assert_eq!(
            admission.headers.get(LEGACY_SIGNATURE_HEADER).unwrap(),
            hmac_hex(SECRET, BODY.as_bytes()).as_str()
        );
        assert_eq!(admission.correlation_id.len(), CORRELATION_ID_LEN);
        assert!(admission.intent.is_buy());
    }

    #[tokio::test]
    async fn test_caller_signature_header_replaced() {
        let (guard, _) = guard_with(config(), 0);
        let req = with_header(signed(BODY, open_time()), "x-signature", "forged");
        let admission = guard.evaluate(&req).await.unwrap();
        assert_eq!(admission.headers.get_all(LEGACY_SIGNATURE_HEADER).iter().count(), 1);
        assert_ne!(admission.headers.get(LEGACY_SIGNATURE_HEADER).unwrap(), "forged");
    }

    #[tokio::test]
    async fn test_correlation_id_passthrough() {
        let (guard, _) = guard_with(config(), 0);
        let req = with_header(signed(BODY, open_time()), "x-request-id", "req-42");
        assert_eq!(guard.evaluate(&req).await.unwrap().correlation_id, "req-42");

        let req = with_header(signed(BODY, open_time()), "x-correlation-id", "corr-7");
        assert_eq!(guard.evaluate(&req).await.unwrap().correlation_id, "corr-7");
    }

    #[tokio::test]
    async fn test_rate_limit_precedes_signature() {
        let mut cfg = config();
        cfg.rate_limit = RateLimit::new(1, 10);
        let (guard, _) = guard_with(cfg, 0);

        assert!(guard.evaluate(&signed(BODY, open_time())).await.is_ok());

        // second request has a garbage signature but never reaches verification
        let mut req = signed(BODY, open_time());
        req.headers
            .insert(V2_SIGNATURE_HEADER, HeaderValue::from_static("garbage"));
        let rejection = guard.evaluate(&req).await.unwrap_err();
        assert_eq!(rejection.reason, RejectReason::RateLimit);
        assert!(!rejection.correlation_id.is_empty());
    }

    #[tokio::test]
    async fn test_global_rate_limit() {
        let mut cfg = config();
        cfg.global_rate_limit = RateLimit::new(2, 10);
        let (guard, _) = guard_with(cfg, 0);
        for identity in ["a", "b"] {
            let mut req = signed(BODY, open_time());
            req.identity = identity.to_string();
            assert!(guard.evaluate(&req).await.is_ok());
        }
        let mut req = signed(BODY, open_time());
        req.identity = "c".to_string();
        assert_eq!(
            guard.evaluate(&req).await.unwrap_err().reason,
            RejectReason::RateLimit
        );
    }

    #[tokio::test]
    async fn test_stale_signature_rejected() {
        let (guard, _) = guard_with(config(), 0);
        let mut req = signed(BODY, open_time() - Duration::seconds(120));
        req.received_at = open_time();
        let rejection = guard.evaluate(&req).await.unwrap_err();
        assert_eq!(rejection.reason, RejectReason::StaleSignature);
        assert_eq!(rejection.reason.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_missing_secret_is_server_error() {
        let (guard, _) = guard_with(GuardConfig::default(), 0);
        let rejection = guard.evaluate(&signed(BODY, open_time())).await.unwrap_err();
        assert_eq!(rejection.reason, RejectReason::MissingSecret);
        assert_eq!(rejection.reason.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key() {
        let (guard, _) = guard_with(config(), 0);
        let first = with_header(signed(BODY, open_time()), "idempotency-key", "k1");
        assert!(guard.evaluate(&first).await.is_ok());

        // different body, same key
        let other = r#"{"symbol":"MSFT","side":"sell","qty":3}"#;
        let second = with_header(signed(other, open_time()), "x-idempotency-key", "k1");
        assert_eq!(
            guard.evaluate(&second).await.unwrap_err().reason,
            RejectReason::Duplicate
        );

        let later = open_time() + Duration::seconds(901);
        let third = with_header(signed(BODY, later), "idempotency-key", "k1");
        assert!(guard.evaluate(&third).await.is_ok());
    }

    #[tokio::test]
    async fn test_outside_session() {
        let (guard, _) = guard_with(config(), 0);
        // Saturday
        let saturday = Utc.with_ymd_and_hms(2025, 3, 8, 15, 0, 0).unwrap();
        let rejection = guard.evaluate(&signed(BODY, saturday)).await.unwrap_err();
        assert_eq!(rejection.reason, RejectReason::OutsideSession);
    }

    #[tokio::test]
    async fn test_position_cap_reports_count() {
        let (guard, _) = guard_with(config(), 4);
        let rejection = guard.evaluate(&signed(BODY, open_time())).await.unwrap_err();
        assert_eq!(rejection.reason, RejectReason::PositionCapReached);
        assert_eq!(rejection.positions, Some(4));
        assert_eq!(rejection.body()["positions"], 4);

        // sells are not position-capped
        let sell = r#"{"symbol":"AAPL","side":"sell","qty":1}"#;
        assert!(guard.evaluate(&signed(sell, open_time())).await.is_ok());
    }

    #[tokio::test]
    async fn test_trade_counter_flow() {
        let mut cfg = config();
        cfg.caps.max_trades_day = 2;
        let (guard, clock) = guard_with(cfg, 0);

        for expected in 1..=2 {
            let admission = guard.evaluate(&signed(BODY, open_time())).await.unwrap();
            assert_eq!(
                guard.record_response(&admission, StatusCode::OK).await,
                Some(expected)
            );
        }
        let rejection = guard.evaluate(&signed(BODY, open_time())).await.unwrap_err();
        assert_eq!(rejection.reason, RejectReason::TradeCapReached);
        assert_eq!(rejection.reason.status(), StatusCode::TOO_MANY_REQUESTS);

        // dry runs bypass the cap and never count
        let dry = r#"{"symbol":"AAPL","side":"buy","qty":1,"dry_run":true}"#;
        let admission = guard.evaluate(&signed(dry, open_time())).await.unwrap();
        assert_eq!(guard.record_response(&admission, StatusCode::OK).await, None);

        // next UTC day starts fresh
        let tomorrow = open_time() + Duration::days(1);
        clock.set(tomorrow);
        assert!(guard.evaluate(&signed(BODY, tomorrow)).await.is_ok());
        assert_eq!(guard.trades_today().await.1, 0);
    }

    #[tokio::test]
    async fn test_failed_downstream_not_counted() {
        let (guard, _) = guard_with(config(), 0);
        let admission = guard.evaluate(&signed(BODY, open_time())).await.unwrap();
        assert_eq!(
            guard
                .record_response(&admission, StatusCode::UNPROCESSABLE_ENTITY)
                .await,
            None
        );
        assert_eq!(guard.trades_today().await.1, 0);
    }

    #[tokio::test]
    async fn test_concurrent_intents_both_admitted_below_cap() {
        let mut cfg = config();
        cfg.caps.max_trades_day = 2;
        let (guard, _) = guard_with(cfg, 0);

        let admission = guard.evaluate(&signed(BODY, open_time())).await.unwrap();
        guard.record_response(&admission, StatusCode::OK).await;

        // one slot left, but neither in-flight intent has been counted yet
        let (intent_a, intent_b) = (signed(BODY, open_time()), signed(BODY, open_time()));
        let (first, second) = tokio::join!(guard.evaluate(&intent_a), guard.evaluate(&intent_b));
        let (first, second) = (first.unwrap(), second.unwrap());
        guard.record_response(&first, StatusCode::OK).await;
        guard.record_response(&second, StatusCode::OK).await;
        assert_eq!(guard.trades_today().await.1, 3);

        let rejection = guard.evaluate(&signed(BODY, open_time())).await.unwrap_err();
        assert_eq!(rejection.reason, RejectReason::TradeCapReached);
    }

    #[tokio::test]
    async fn test_rejection_metrics() {
        let registry = prometheus::Registry::new();
        let metrics = GuardMetrics::new(&registry);
        let guard = IntentGuard::new(config(), Arc::new(FixedPositions(0)), metrics.clone())
            .with_clock(Arc::new(ManualClock::new(open_time())));
        let saturday = Utc.with_ymd_and_hms(2025, 3, 8, 15, 0, 0).unwrap();
        let _ = guard.evaluate(&signed(BODY, saturday)).await;
        assert_eq!(
            metrics
                .intents_rejected
                .with_label_values(&["outside_session"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_generated_correlation_ids_vary_with_time() {
        let (guard, _) = guard_with(config(), 0);
        let headers = HeaderMap::new();
        let a = guard.correlation_id(&headers, open_time());
        let b = guard.correlation_id(&headers, open_time() + Duration::nanoseconds(1));
        assert_eq!(a, guard.correlation_id(&headers, open_time()));
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_admission_records_rate_windows() {
        let (guard, _) = guard_with(config(), 0);
        guard.evaluate(&signed(BODY, open_time())).await.unwrap();
        let state = guard.state.lock().await;
        assert_eq!(state.rate.window_len("10.0.0.1"), 1);
        assert_eq!(state.rate.global_len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_drops_idle_state() {
        let (guard, clock) = guard_with(config(), 0);
        let req = with_header(signed(BODY, open_time()), "idempotency-key", "k1");
        guard.evaluate(&req).await.unwrap();

        clock.advance(Duration::seconds(901));
        guard.sweep().await;
        let state = guard.state_snapshot().await;
        assert!(state.idempotency.is_empty());
        assert_eq!(state.rate.tracked_identities(), 0);
    }
}
