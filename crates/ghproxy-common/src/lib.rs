use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST_HEADER: &str = "github-host";
pub const DEFAULT_PATH_PREFIX: &str = "/api/github";
pub const DEFAULT_API_NAME: &str = "github";
pub const DEFAULT_FETCH_CONCURRENCY: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("invalid global config field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// One configured GitHub (or GitHub Enterprise) host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubIntegrationConfig {
    pub host: String,
    /// Defaults to `https://api.github.com` for github.com and
    /// `https://{host}/api/v3` otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Bearer token accepted from internal callers, mapped to the principal it
/// identifies. Principals starting with `user:` are users; anything else is a
/// service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokenConfig {
    pub token: String,
    pub principal: String,
}

/// Response headers read for the rate-limit gauges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitHeaderNames {
    pub limit: String,
    pub remaining: String,
    pub reset: String,
}

impl Default for RateLimitHeaderNames {
    fn default() -> Self {
        Self {
            limit: "x-ratelimit-limit".to_string(),
            remaining: "x-ratelimit-remaining".to_string(),
            reset: "x-ratelimit-reset".to_string(),
        }
    }
}

/// Final, merged global configuration used by the running process.
///
/// Merge order: CLI > ENV > config file > defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Inbound path prefix removed before a call is re-issued upstream.
    pub path_prefix: String,
    /// Request header naming the GitHub host a proxied call targets.
    pub host_header: String,
    /// Label attached to the rate-limit gauges.
    pub api_name: String,
    /// Externally reachable base URL of this service, used for discovery.
    pub external_base_url: String,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    pub rate_limit_headers: RateLimitHeaderNames,
    /// Upper bound on simultaneous content fetches during a tree read.
    pub fetch_concurrency: usize,
    pub integrations: Vec<GithubIntegrationConfig>,
    pub auth_tokens: Vec<AuthTokenConfig>,
}

/// Optional layer used for merging global config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path_prefix: Option<String>,
    pub host_header: Option<String>,
    pub api_name: Option<String>,
    pub external_base_url: Option<String>,
    pub proxy: Option<String>,
    pub rate_limit_headers: Option<RateLimitHeaderNames>,
    pub fetch_concurrency: Option<usize>,
    pub integrations: Option<Vec<GithubIntegrationConfig>>,
    pub auth_tokens: Option<Vec<AuthTokenConfig>>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.path_prefix.is_some() {
            self.path_prefix = other.path_prefix;
        }
        if other.host_header.is_some() {
            self.host_header = other.host_header;
        }
        if other.api_name.is_some() {
            self.api_name = other.api_name;
        }
        if other.external_base_url.is_some() {
            self.external_base_url = other.external_base_url;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.rate_limit_headers.is_some() {
            self.rate_limit_headers = other.rate_limit_headers;
        }
        if other.fetch_concurrency.is_some() {
            self.fetch_concurrency = other.fetch_concurrency;
        }
        if other.integrations.is_some() {
            self.integrations = other.integrations;
        }
        if other.auth_tokens.is_some() {
            self.auth_tokens = other.auth_tokens;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        let host = self.host.unwrap_or_else(|| "0.0.0.0".to_string());
        let port = self.port.unwrap_or(7007);

        let path_prefix = normalize_prefix(
            self.path_prefix
                .unwrap_or_else(|| DEFAULT_PATH_PREFIX.to_string()),
        )?;

        let host_header = self
            .host_header
            .unwrap_or_else(|| DEFAULT_HOST_HEADER.to_string())
            .trim()
            .to_ascii_lowercase();
        if host_header.is_empty() {
            return Err(GlobalConfigError::InvalidField {
                field: "host_header",
                reason: "must not be empty".to_string(),
            });
        }

        let fetch_concurrency = self.fetch_concurrency.unwrap_or(DEFAULT_FETCH_CONCURRENCY);
        if fetch_concurrency == 0 {
            return Err(GlobalConfigError::InvalidField {
                field: "fetch_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }

        let external_base_url = self
            .external_base_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| default_external_base_url(&host, port));

        Ok(GlobalConfig {
            host,
            port,
            path_prefix,
            host_header,
            api_name: self
                .api_name
                .unwrap_or_else(|| DEFAULT_API_NAME.to_string()),
            external_base_url,
            proxy: self.proxy,
            rate_limit_headers: self.rate_limit_headers.unwrap_or_default(),
            fetch_concurrency,
            integrations: self.integrations.unwrap_or_default(),
            auth_tokens: self.auth_tokens.unwrap_or_default(),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            path_prefix: Some(value.path_prefix),
            host_header: Some(value.host_header),
            api_name: Some(value.api_name),
            external_base_url: Some(value.external_base_url),
            proxy: value.proxy,
            rate_limit_headers: Some(value.rate_limit_headers),
            fetch_concurrency: Some(value.fetch_concurrency),
            integrations: Some(value.integrations),
            auth_tokens: Some(value.auth_tokens),
        }
    }
}

fn normalize_prefix(raw: String) -> Result<String, GlobalConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if !trimmed.starts_with('/') {
        return Err(GlobalConfigError::InvalidField {
            field: "path_prefix",
            reason: format!("must start with '/': {trimmed}"),
        });
    }
    Ok(trimmed.to_string())
}

fn default_external_base_url(host: &str, port: u16) -> String {
    // A wildcard bind address is not routable; loop back to ourselves.
    let host = match host {
        "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
        other => other,
    };
    format!("http://{host}:{port}")
}
