//! GitHub proxy engine: transport, retrying client, client factory, inbound
//! auth and the proxy control flow. HTTP framing lives in `ghproxy-router`.

pub mod auth;
pub mod bootstrap;
pub mod factory;
pub mod github_client;
pub mod proxy_engine;
pub mod rate_limit;
pub mod upstream_client;

pub use auth::{AuthError, AuthProvider, AuthSnapshot, MemoryAuth, NoopAuth, Principal};
pub use bootstrap::{Bootstrap, CliArgs, DISCOVERY_SERVICE_ID, bootstrap, load_config};
pub use factory::ClientFactory;
pub use github_client::{
    DO_NOT_RETRY, GITHUB_MEDIA_TYPE, GithubClient, GithubClientBuilder, GithubError,
    GithubRequest, MIN_THROTTLE_DELAY, RateLimitKind, RetryPolicy, ThrottlePolicy, rate_limit_delay,
};
pub use proxy_engine::{ProxyCall, ProxyEngine, ProxyEngineConfig, ProxyOutcome};
pub use rate_limit::rate_limit_snapshot;
pub use upstream_client::{UpstreamClientConfig, WreqUpstreamClient};
