use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::{ProviderError, ProviderResult};

/// Resolves a logical service id (for example `github`) to its base URL.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn base_url(&self, service_id: &str) -> ProviderResult<String>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    endpoints: HashMap<String, String>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, service_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        self.endpoints
            .insert(service_id.into(), base_url.trim_end_matches('/').to_string());
        self
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn base_url(&self, service_id: &str) -> ProviderResult<String> {
        self.endpoints
            .get(service_id)
            .cloned()
            .ok_or_else(|| ProviderError::Discovery(format!("unknown service {service_id}")))
    }
}
