use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde_json::Value as JsonValue;
use tracing::error;

use ghproxy_provider_core::{
    DownstreamEvent, Event, EventHub, Headers, UpstreamHttpResponse, header_get,
    header_remove_all, header_set,
};

use crate::factory::ClientFactory;
use crate::github_client::{GithubError, GithubRequest};
use crate::rate_limit::rate_limit_snapshot;

mod types;

pub use types::{ProxyCall, ProxyEngineConfig, ProxyOutcome};

/// Inbound headers passed on to GitHub. Everything else (notably the
/// caller's own `authorization`) stays behind.
const FORWARDED_REQUEST_HEADERS: [&str; 4] =
    ["accept", "content-type", "if-none-match", "if-modified-since"];

/// Response headers that describe the upstream wire framing and no longer
/// apply once the body is re-serialized.
const DROPPED_RESPONSE_HEADERS: [&str; 10] = [
    "transfer-encoding",
    "content-encoding",
    "content-length",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "upgrade",
];

#[derive(Clone)]
pub struct ProxyEngine {
    factory: ClientFactory,
    events: EventHub,
    config: ProxyEngineConfig,
}

impl ProxyEngine {
    pub fn new(factory: ClientFactory, events: EventHub, config: ProxyEngineConfig) -> Self {
        Self {
            factory,
            events,
            config,
        }
    }

    pub fn config(&self) -> &ProxyEngineConfig {
        &self.config
    }

    pub async fn handle(&self, call: &ProxyCall) -> ProxyOutcome {
        let host = header_get(&call.headers, &self.config.host_header)
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_ascii_lowercase);
        let Some(host) = host else {
            let message = format!("Missing required header '{}'", self.config.host_header);
            error!(
                event = "proxy.input_error",
                trace_id = %call.trace_id,
                path = %call.path,
                error = %message
            );
            return ProxyOutcome {
                response: input_error(&message),
                upstream_headers: Vec::new(),
                github_host: None,
            };
        };

        let Some(client) = self.factory.get_client(&format!("https://{host}")).await else {
            let message = format!("No GitHub client available for host {host}");
            error!(
                event = "proxy.no_client",
                trace_id = %call.trace_id,
                github_host = %host,
                error = %message
            );
            return ProxyOutcome {
                response: json_error(500, message),
                upstream_headers: Vec::new(),
                github_host: Some(host),
            };
        };

        let mut req = GithubRequest::new(call.method, self.upstream_path(call))
            .body(call.body.clone().filter(|body| !body.is_empty()));
        for name in FORWARDED_REQUEST_HEADERS {
            if let Some(value) = header_get(&call.headers, name) {
                req = req.header(name, value);
            }
        }

        match client.request(req).await {
            Ok(resp) => {
                let upstream_headers = resp.headers.clone();
                ProxyOutcome {
                    response: relay_success(resp),
                    upstream_headers,
                    github_host: Some(host),
                }
            }
            Err(err) => {
                let status = err.status().unwrap_or(500);
                let message = err.message();
                error!(
                    event = "proxy.upstream_error",
                    trace_id = %call.trace_id,
                    github_host = %host,
                    method = call.method.as_str(),
                    path = %call.path,
                    status,
                    error = %message
                );
                let upstream_headers = match err {
                    GithubError::Http { headers, .. } => headers,
                    _ => Vec::new(),
                };
                ProxyOutcome {
                    response: json_error(status, message),
                    upstream_headers,
                    github_host: Some(host),
                }
            }
        }
    }

    /// Inbound path with the mount prefix removed, plus the query string.
    pub fn upstream_path(&self, call: &ProxyCall) -> String {
        let stripped = call
            .path
            .strip_prefix(self.config.path_prefix.as_str())
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .unwrap_or(&call.path);
        let mut path = if stripped.starts_with('/') {
            stripped.to_string()
        } else {
            format!("/{stripped}")
        };
        if let Some(query) = call.query.as_deref().filter(|q| !q.is_empty()) {
            path.push('?');
            path.push_str(query);
        }
        path
    }

    /// Emits the downstream record and the rate-limit snapshot without
    /// waiting for sinks.
    pub fn observe(&self, call: &ProxyCall, outcome: &ProxyOutcome, elapsed: Duration) {
        self.events.emit_detached(Event::Downstream(DownstreamEvent {
            trace_id: call.trace_id.clone(),
            at: SystemTime::now(),
            principal: call.principal.label().to_string(),
            github_host: outcome.github_host.clone(),
            request_method: call.method.as_str().to_string(),
            request_path: call.path.clone(),
            response_status: outcome.response.status,
            elapsed_ms: elapsed.as_millis(),
        }));
        self.events.emit_detached(Event::RateLimit(rate_limit_snapshot(
            &outcome.upstream_headers,
            &self.config.rate_limit_headers,
            call.principal.label(),
            &self.config.api_name,
            time::OffsetDateTime::now_utc(),
        )));
    }
}

fn relay_success(resp: UpstreamHttpResponse) -> UpstreamHttpResponse {
    let mut headers: Headers = resp.headers;
    header_remove_all(&mut headers, &DROPPED_RESPONSE_HEADERS);
    header_set(&mut headers, "content-type", "application/json");
    UpstreamHttpResponse {
        status: resp.status,
        headers,
        body: reserialize_json(resp.body),
    }
}

/// Upstream bodies go back out as JSON: parsed documents are re-encoded and
/// anything else becomes a JSON string. An empty body stays empty.
fn reserialize_json(body: Bytes) -> Bytes {
    if body.is_empty() {
        return body;
    }
    let value = serde_json::from_slice::<JsonValue>(&body)
        .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(&body).into_owned()));
    Bytes::from(serde_json::to_vec(&value).unwrap_or_default())
}

fn input_error(message: &str) -> UpstreamHttpResponse {
    json_response(
        400,
        serde_json::json!({
            "error": { "name": "InputError", "message": message },
        }),
    )
}

fn json_error(status: u16, message: impl Into<String>) -> UpstreamHttpResponse {
    json_response(status, serde_json::json!({ "error": message.into() }))
}

fn json_response(status: u16, body: JsonValue) -> UpstreamHttpResponse {
    let mut headers: Headers = Vec::new();
    header_set(&mut headers, "content-type", "application/json");
    UpstreamHttpResponse {
        status,
        headers,
        body: Bytes::from(serde_json::to_vec(&body).unwrap_or_default()),
    }
}
