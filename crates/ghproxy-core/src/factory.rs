use std::sync::Arc;

use tracing::error;

use ghproxy_provider_core::{
    CredentialsProvider, ProviderError, ProviderResult, ScmIntegrations, UpstreamClient,
};

use crate::github_client::{GithubClient, RetryPolicy, ThrottlePolicy};

/// Builds an authenticated, retrying client for whichever GitHub host a URL
/// points at. Clients are cheap and built fresh per call.
#[derive(Clone)]
pub struct ClientFactory {
    integrations: Arc<dyn ScmIntegrations>,
    credentials: Arc<dyn CredentialsProvider>,
    http: Arc<dyn UpstreamClient>,
    retry: RetryPolicy,
    throttle: ThrottlePolicy,
}

impl ClientFactory {
    pub fn new(
        integrations: Arc<dyn ScmIntegrations>,
        credentials: Arc<dyn CredentialsProvider>,
        http: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            integrations,
            credentials,
            http,
            retry: RetryPolicy::proxy_default(),
            throttle: ThrottlePolicy::unbounded(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottlePolicy) -> Self {
        self.throttle = throttle;
        self
    }

    /// `None` when the host has no integration or its credentials cannot be
    /// resolved; the cause is logged.
    pub async fn get_client(&self, target_url: &str) -> Option<GithubClient> {
        match self.try_get_client(target_url).await {
            Ok(client) => Some(client),
            Err(err) => {
                error!(
                    event = "github.client_unavailable",
                    target_url = %target_url,
                    error = %err
                );
                None
            }
        }
    }

    async fn try_get_client(&self, target_url: &str) -> ProviderResult<GithubClient> {
        let credentials = self.credentials.credentials(target_url).await?;
        let integration = self
            .integrations
            .by_url(target_url)
            .ok_or_else(|| ProviderError::NoIntegration(target_url.to_string()))?;

        Ok(GithubClient::builder(self.http.clone(), integration.api_base_url)
            .token(credentials.token)
            .retry(self.retry.clone())
            .throttle(self.throttle.clone())
            .build())
    }
}
