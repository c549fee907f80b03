use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;

use ghproxy_common::{GithubIntegrationConfig, GlobalConfig, GlobalConfigPatch};
use ghproxy_provider_core::{
    ConfigIntegrations, EventHub, GITHUB_COM, GaugeEventSink, StaticDiscovery,
    TerminalEventSink, UpstreamClient,
};

use crate::auth::{AuthSnapshot, MemoryAuth};
use crate::factory::ClientFactory;
use crate::proxy_engine::{ProxyEngine, ProxyEngineConfig};
use crate::upstream_client::{UpstreamClientConfig, WreqUpstreamClient};

/// Service id the reader uses to find this proxy.
pub const DISCOVERY_SERVICE_ID: &str = "github";

#[derive(Debug, Clone, Default, Args)]
pub struct CliArgs {
    /// JSON config file (integrations, auth tokens, defaults).
    #[arg(long, env = "GHPROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind host.
    #[arg(long, env = "GHPROXY_HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "GHPROXY_PORT")]
    pub port: Option<String>,

    /// Inbound path prefix stripped before forwarding.
    #[arg(long, env = "GHPROXY_PATH_PREFIX")]
    pub path_prefix: Option<String>,

    /// Header naming the GitHub host a call targets.
    #[arg(long, env = "GHPROXY_HOST_HEADER")]
    pub host_header: Option<String>,

    /// Externally reachable base URL of this service.
    #[arg(long, env = "GHPROXY_EXTERNAL_BASE_URL")]
    pub external_base_url: Option<String>,

    /// Optional outbound proxy for GitHub requests.
    #[arg(long, env = "GHPROXY_PROXY")]
    pub proxy: Option<String>,

    /// Token for github.com; overrides the config file entry.
    #[arg(long, env = "GHPROXY_GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Max simultaneous blob fetches during a tree read.
    #[arg(long, env = "GHPROXY_FETCH_CONCURRENCY")]
    pub fetch_concurrency: Option<String>,
}

pub struct Bootstrap {
    pub config: GlobalConfig,
    pub events: EventHub,
    pub gauges: Arc<GaugeEventSink>,
    pub http: Arc<dyn UpstreamClient>,
    pub engine: ProxyEngine,
    pub auth: Arc<MemoryAuth>,
    pub discovery: Arc<StaticDiscovery>,
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let config = load_config(&args)?;

    let events = EventHub::new(1024);
    let gauges = Arc::new(GaugeEventSink::new());
    events.add_sink(Arc::new(TerminalEventSink::new())).await;
    events.add_sink(gauges.clone()).await;

    let http: Arc<dyn UpstreamClient> = Arc::new(
        WreqUpstreamClient::new(UpstreamClientConfig::from_global(&config))
            .context("build upstream http client")?,
    );
    let integrations = Arc::new(ConfigIntegrations::new(&config.integrations));
    let factory = ClientFactory::new(integrations.clone(), integrations, http.clone());
    let engine = ProxyEngine::new(
        factory,
        events.clone(),
        ProxyEngineConfig::from_global(&config),
    );
    let auth = Arc::new(MemoryAuth::new(AuthSnapshot::from_config(&config.auth_tokens)));
    let discovery = Arc::new(StaticDiscovery::new().with_endpoint(
        DISCOVERY_SERVICE_ID,
        format!("{}{}", config.external_base_url, config.path_prefix),
    ));

    Ok(Bootstrap {
        config,
        events,
        gauges,
        http,
        engine,
        auth,
        discovery,
    })
}

/// Merges config file, ENV and CLI. clap already resolves CLI over ENV per
/// field; the result is overlaid on the file.
pub fn load_config(args: &CliArgs) -> anyhow::Result<GlobalConfig> {
    let mut merged = match args.config.as_deref() {
        Some(path) => read_config_file(path)?,
        None => GlobalConfigPatch::default(),
    };

    let cli_patch = GlobalConfigPatch {
        host: sanitize_optional_env_value(args.host.clone()),
        port: parse_env_value(args.port.clone(), "GHPROXY_PORT")?,
        path_prefix: sanitize_optional_env_value(args.path_prefix.clone()),
        host_header: sanitize_optional_env_value(args.host_header.clone()),
        external_base_url: sanitize_optional_env_value(args.external_base_url.clone()),
        proxy: sanitize_optional_env_value(args.proxy.clone()),
        fetch_concurrency: parse_env_value(
            args.fetch_concurrency.clone(),
            "GHPROXY_FETCH_CONCURRENCY",
        )?,
        ..Default::default()
    };
    merged.overlay(cli_patch);

    if let Some(token) = sanitize_optional_env_value(args.github_token.clone()) {
        let integrations = merged.integrations.get_or_insert_with(Vec::new);
        match integrations
            .iter_mut()
            .find(|entry| entry.host.trim().eq_ignore_ascii_case(GITHUB_COM))
        {
            Some(entry) => entry.token = Some(token),
            None => integrations.push(GithubIntegrationConfig {
                host: GITHUB_COM.to_string(),
                api_base_url: None,
                token: Some(token),
            }),
        }
    }

    merged
        .into_config()
        .context("finalize merged global config")
}

fn read_config_file(path: &Path) -> anyhow::Result<GlobalConfigPatch> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse config file {}", path.display()))
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    // Unresolved `${VAR}` placeholders injected by some platforms count as unset.
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn parse_env_value<T>(value: Option<String>, env_name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<T>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}
