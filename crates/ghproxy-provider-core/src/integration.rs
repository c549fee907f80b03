use std::collections::HashMap;

use async_trait::async_trait;
use ghproxy_common::GithubIntegrationConfig;

use crate::errors::{ProviderError, ProviderResult};

pub const GITHUB_COM: &str = "github.com";
pub const GITHUB_COM_API: &str = "https://api.github.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubIntegration {
    pub host: String,
    pub api_base_url: String,
}

/// SCM integration lookup: which API root serves the host behind a URL.
pub trait ScmIntegrations: Send + Sync {
    fn by_host(&self, host: &str) -> Option<GithubIntegration>;

    fn by_url(&self, url: &str) -> Option<GithubIntegration> {
        self.by_host(&host_from_url(url).ok()?)
    }
}

/// Token lookup keyed by target URL.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn credentials(&self, url: &str) -> ProviderResult<GithubCredentials>;
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct GithubCredentials {
    /// `None` means anonymous access.
    pub token: Option<String>,
}

impl std::fmt::Debug for GithubCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubCredentials")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Integrations and credentials read from the global config.
///
/// github.com is always present; configured entries override it.
#[derive(Debug, Clone)]
pub struct ConfigIntegrations {
    entries: HashMap<String, Entry>,
}

#[derive(Debug, Clone)]
struct Entry {
    integration: GithubIntegration,
    token: Option<String>,
}

impl ConfigIntegrations {
    pub fn new(configs: &[GithubIntegrationConfig]) -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            GITHUB_COM.to_string(),
            Entry {
                integration: GithubIntegration {
                    host: GITHUB_COM.to_string(),
                    api_base_url: GITHUB_COM_API.to_string(),
                },
                token: None,
            },
        );
        for config in configs {
            let host = config.host.trim().to_ascii_lowercase();
            if host.is_empty() {
                continue;
            }
            let api_base_url = config
                .api_base_url
                .as_deref()
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| default_api_base_url(&host));
            let token = config
                .token
                .as_deref()
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_string);
            entries.insert(
                host.clone(),
                Entry {
                    integration: GithubIntegration { host, api_base_url },
                    token,
                },
            );
        }
        Self { entries }
    }

    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.entries.keys().cloned().collect();
        hosts.sort();
        hosts
    }
}

impl ScmIntegrations for ConfigIntegrations {
    fn by_host(&self, host: &str) -> Option<GithubIntegration> {
        self.entries
            .get(&host.to_ascii_lowercase())
            .map(|entry| entry.integration.clone())
    }
}

#[async_trait]
impl CredentialsProvider for ConfigIntegrations {
    async fn credentials(&self, url: &str) -> ProviderResult<GithubCredentials> {
        let host = host_from_url(url)?;
        let entry = self
            .entries
            .get(&host)
            .ok_or_else(|| ProviderError::NoIntegration(host.clone()))?;
        Ok(GithubCredentials {
            token: entry.token.clone(),
        })
    }
}

pub fn default_api_base_url(host: &str) -> String {
    if host.eq_ignore_ascii_case(GITHUB_COM) {
        GITHUB_COM_API.to_string()
    } else {
        format!("https://{host}/api/v3")
    }
}

/// Lower-cased `host[:port]` of an absolute URL.
pub fn host_from_url(url: &str) -> ProviderResult<String> {
    let parsed = url::Url::parse(url).map_err(|_| ProviderError::InvalidUrl(url.to_string()))?;
    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ProviderError::InvalidUrl(url.to_string()))?
        .to_ascii_lowercase();
    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}
