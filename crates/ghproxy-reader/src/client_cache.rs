use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use ghproxy_common::DEFAULT_HOST_HEADER;
use ghproxy_core::{DISCOVERY_SERVICE_ID, GithubClient};
use ghproxy_provider_core::{Discovery, UpstreamClient};

use crate::error::ReaderError;

/// One client per GitHub host, pointed at the proxy and tagged with the host
/// it serves. Retry and throttling are left to the proxy side.
pub struct ClientCache {
    discovery: Arc<dyn Discovery>,
    http: Arc<dyn UpstreamClient>,
    host_header: String,
    clients: Mutex<HashMap<String, Arc<OnceCell<Arc<GithubClient>>>>>,
}

impl ClientCache {
    pub fn new(discovery: Arc<dyn Discovery>, http: Arc<dyn UpstreamClient>) -> Self {
        Self {
            discovery,
            http,
            host_header: DEFAULT_HOST_HEADER.to_string(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_host_header(mut self, host_header: impl Into<String>) -> Self {
        self.host_header = host_header.into();
        self
    }

    /// Concurrent first calls for a host share a single discovery lookup. A
    /// failed lookup is not cached.
    pub async fn for_host(&self, host: &str) -> Result<Arc<GithubClient>, ReaderError> {
        let cell = {
            let mut clients = self
                .clients
                .lock()
                .map_err(|_| ReaderError::CachePoisoned)?;
            clients.entry(host.to_string()).or_default().clone()
        };

        let client = cell
            .get_or_try_init(|| async {
                let base_url = self.discovery.base_url(DISCOVERY_SERVICE_ID).await?;
                let client = GithubClient::builder(self.http.clone(), base_url)
                    .default_header(self.host_header.clone(), host)
                    .build();
                Ok::<_, ReaderError>(Arc::new(client))
            })
            .await?;
        Ok(client.clone())
    }

    pub fn len(&self) -> usize {
        self.clients
            .lock()
            .map(|clients| clients.values().filter(|cell| cell.initialized()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ghproxy_provider_core::{
        StaticDiscovery, TransportFailure, UpstreamHttpRequest, UpstreamHttpResponse,
        UpstreamTransportErrorKind,
    };

    struct Offline;

    impl UpstreamClient for Offline {
        fn send<'a>(
            &'a self,
            _req: UpstreamHttpRequest,
        ) -> std::pin::Pin<
            Box<
                dyn std::future::Future<Output = Result<UpstreamHttpResponse, TransportFailure>>
                    + Send
                    + 'a,
            >,
        > {
            Box::pin(async {
                Err(TransportFailure {
                    kind: UpstreamTransportErrorKind::Connect,
                    message: "offline".to_string(),
                })
            })
        }
    }

    #[tokio::test]
    async fn poisoned_cache_is_not_reported_as_discovery() {
        let discovery = Arc::new(
            StaticDiscovery::new().with_endpoint(DISCOVERY_SERVICE_ID, "http://proxy.test"),
        );
        let cache = Arc::new(ClientCache::new(discovery, Arc::new(Offline)));

        let poisoner = cache.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.clients.lock().unwrap();
            panic!("poison the cache");
        })
        .join();

        let err = cache.for_host("github.com").await.unwrap_err();
        assert!(matches!(err, ReaderError::CachePoisoned));
        assert!(cache.is_empty());
    }
}
