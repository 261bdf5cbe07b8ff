//! axum middleware wrapping the whole router with the intent guard.
//!
//! Only `POST <intent path>` is inspected; everything else is forwarded
//! untouched. The guarded body is buffered once and re-attached to the
//! forwarded request.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::RejectReason;
use crate::guard::{attach_correlation_id, IntentGuard, Rejection, Route, SignedRequest};

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const UNKNOWN_IDENTITY: &str = "unknown";

pub async fn intent_guard(
    State(guard): State<Arc<IntentGuard>>,
    request: Request,
    next: Next,
) -> Response {
    if guard.route(request.method(), request.uri().path()) != Route::Guarded {
        return next.run(request).await;
    }

    let received_at = guard.now();
    let identity = client_identity(&request);
    let (mut parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, guard.config().max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            let correlation_id = guard.correlation_id(&parts.headers, received_at);
            let rejection =
                Rejection::new(RejectReason::InvalidBody, correlation_id).with_detail(e.to_string());
            return guard.rejected(rejection, &identity).into_response();
        }
    };

    let snapshot = SignedRequest {
        body,
        headers: parts.headers.clone(),
        identity,
        received_at,
    };

    let admission = match guard.evaluate(&snapshot).await {
        Ok(admission) => admission,
        Err(rejection) => return rejection.into_response(),
    };

    parts.headers = admission.headers.clone();
    let forwarded = Request::from_parts(parts, Body::from(snapshot.body));

    let mut response = next.run(forwarded).await;
    guard.record_response(&admission, response.status()).await;
    attach_correlation_id(response.headers_mut(), &admission.correlation_id);
    response
}

/// First `X-Forwarded-For` hop, else the peer address.
pub fn client_identity(request: &Request) -> String {
    if let Some(first) = request
        .headers()
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
}
