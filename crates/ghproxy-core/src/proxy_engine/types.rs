use bytes::Bytes;

use ghproxy_common::{GlobalConfig, RateLimitHeaderNames};
use ghproxy_provider_core::{Headers, HttpMethod, UpstreamHttpResponse};

use crate::auth::Principal;

#[derive(Debug, Clone)]
pub struct ProxyEngineConfig {
    pub path_prefix: String,
    pub host_header: String,
    pub api_name: String,
    pub rate_limit_headers: RateLimitHeaderNames,
}

impl ProxyEngineConfig {
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            path_prefix: global.path_prefix.clone(),
            host_header: global.host_header.clone(),
            api_name: global.api_name.clone(),
            rate_limit_headers: global.rate_limit_headers.clone(),
        }
    }
}

/// One inbound call as received by the router.
#[derive(Debug, Clone)]
pub struct ProxyCall {
    pub trace_id: String,
    pub method: HttpMethod,
    /// Inbound path, still carrying the mount prefix.
    pub path: String,
    pub query: Option<String>,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub principal: Principal,
}

#[derive(Debug, Clone)]
pub struct ProxyOutcome {
    /// What the caller receives.
    pub response: UpstreamHttpResponse,
    /// Headers of the last upstream response, if one arrived. Rate-limit
    /// gauges are read from here on both success and failure.
    pub upstream_headers: Headers,
    pub github_host: Option<String>,
}
