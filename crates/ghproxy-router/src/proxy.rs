use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use bytes::Bytes;
use tracing::warn;

use ghproxy_core::{AuthProvider, Principal, ProxyCall, ProxyEngine};
use ghproxy_provider_core::{Headers, HttpMethod, UpstreamHttpResponse};

#[derive(Clone)]
pub struct ProxyState {
    pub engine: Arc<ProxyEngine>,
    pub auth: Arc<dyn AuthProvider>,
}

/// Mounts the catch-all proxy route under the engine's path prefix, plus
/// `GET /healthz`.
pub fn proxy_router(state: ProxyState) -> Router {
    let route = format!("{}/{{*path}}", state.engine.config().path_prefix);
    Router::new()
        .route("/healthz", get(healthz))
        .route(&route, any(proxy_handler))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn proxy_handler(
    State(state): State<ProxyState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let trace_id = uuid::Uuid::now_v7().to_string();

    let Some(method) = HttpMethod::parse(method.as_str()) else {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [("content-type", "application/json")],
            serde_json::json!({ "error": format!("method {method} is not proxied") }).to_string(),
        )
            .into_response();
    };

    // The principal only labels metrics, so a caller we cannot identify is
    // still served.
    let principal = state.auth.authenticate(&headers).unwrap_or_else(|err| {
        warn!(event = "proxy.auth_failed", trace_id = %trace_id, error = %err);
        Principal::Anonymous
    });

    let call = ProxyCall {
        trace_id,
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: headers_to_vec(&headers),
        body: Some(body).filter(|body| !body.is_empty()),
        principal,
    };

    let outcome = state.engine.handle(&call).await;
    let response = to_axum_response(outcome.response.clone());
    state.engine.observe(&call, &outcome, started.elapsed());
    response
}

fn to_axum_response(resp: UpstreamHttpResponse) -> Response {
    let mut builder = Response::builder().status(resp.status);
    if let Some(h) = builder.headers_mut() {
        for (k, v) in resp.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(&v),
            ) {
                h.append(name, value);
            }
        }
    }
    builder.body(Body::from(resp.body)).unwrap_or_else(|_| {
        (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response()
    })
}

fn headers_to_vec(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}
