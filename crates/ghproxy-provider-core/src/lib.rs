//! Provider-side abstractions for ghproxy.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP client.
//! It describes upstream requests, the collaborators the proxy relies on
//! (integrations, credentials, discovery) and the event plumbing used for
//! metrics, while a higher layer performs IO.

pub mod discovery;
pub mod errors;
pub mod events;
pub mod headers;
pub mod integration;
pub mod upstream;

pub use discovery::{Discovery, StaticDiscovery};
pub use errors::{ProviderError, ProviderResult};
pub use events::{
    DownstreamEvent, Event, EventHub, EventSink, GaugeEventSink, GaugeKey, RATE_LIMIT_LIMIT,
    RATE_LIMIT_REMAINING, RATE_LIMIT_RESET_SECONDS, RateLimitSnapshot, TerminalEventSink,
};
pub use headers::{Headers, header_get, header_parse, header_remove, header_remove_all, header_set};
pub use integration::{
    ConfigIntegrations, CredentialsProvider, GITHUB_COM, GITHUB_COM_API, GithubCredentials,
    GithubIntegration, ScmIntegrations, default_api_base_url, host_from_url,
};
pub use upstream::{
    HttpMethod, TransportFailure, UpstreamClient, UpstreamHttpRequest, UpstreamHttpResponse,
    UpstreamTransportErrorKind,
};
