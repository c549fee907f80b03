use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wreq::{Client, Method, Proxy};

use ghproxy_common::GlobalConfig;
use ghproxy_provider_core::{
    Headers, HttpMethod, TransportFailure, UpstreamClient, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamTransportErrorKind,
};

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl UpstreamClientConfig {
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            proxy: global.proxy.clone(),
            ..Self::default()
        }
    }
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// wreq-backed transport shared by every GitHub client in the process.
///
/// One underlying `wreq::Client` is kept per egress proxy so connection pools
/// survive across calls.
#[derive(Clone)]
pub struct WreqUpstreamClient {
    config: UpstreamClientConfig,
    clients: Arc<Mutex<HashMap<Option<String>, Client>>>,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let proxy = normalize_proxy(config.proxy.clone());
        let initial = build_client(&config, proxy.as_deref())?;
        let mut clients = HashMap::new();
        clients.insert(proxy, initial);
        Ok(Self {
            config,
            clients: Arc::new(Mutex::new(clients)),
        })
    }

    fn client(&self) -> Result<Client, TransportFailure> {
        let proxy = normalize_proxy(self.config.proxy.clone());
        let mut guard = self.clients.lock().map_err(|_| TransportFailure {
            kind: UpstreamTransportErrorKind::Other,
            message: "upstream client cache lock failed".to_string(),
        })?;
        if let Some(client) = guard.get(&proxy) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config, proxy.as_deref()).map_err(map_wreq_error)?;
        guard.insert(proxy, client.clone());
        Ok(client)
    }
}

fn normalize_proxy(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

fn build_client(config: &UpstreamClientConfig, proxy: Option<&str>) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, TransportFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            let client = self.client()?;
            let mut builder = client.request(to_wreq_method(req.method), &req.url);
            for (k, v) in &req.headers {
                builder = builder.header(k, v);
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }

            let resp = builder.send().await.map_err(map_wreq_error)?;
            let status = resp.status().as_u16();
            let headers = headers_from_wreq(resp.headers());
            let body = resp.bytes().await.map_err(map_wreq_error)?;
            Ok(UpstreamHttpResponse {
                status,
                headers,
                body,
            })
        })
    }
}

fn to_wreq_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(k, v)| {
            v.to_str()
                .ok()
                .map(|v| (k.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn map_wreq_error(err: wreq::Error) -> TransportFailure {
    TransportFailure {
        kind: classify_wreq_error(&err),
        message: err.to_string(),
    }
}

fn classify_wreq_error(err: &wreq::Error) -> UpstreamTransportErrorKind {
    let message = err.to_string().to_ascii_lowercase();
    if err.is_timeout() {
        return UpstreamTransportErrorKind::Timeout;
    }
    if err.is_connect() {
        if message.contains("dns") || message.contains("resolve") {
            return UpstreamTransportErrorKind::Dns;
        }
        if message.contains("tls") || message.contains("ssl") {
            return UpstreamTransportErrorKind::Tls;
        }
        return UpstreamTransportErrorKind::Connect;
    }
    if err.is_connection_reset() {
        return UpstreamTransportErrorKind::Connect;
    }
    if message.contains("tls") || message.contains("ssl") {
        return UpstreamTransportErrorKind::Tls;
    }
    UpstreamTransportErrorKind::Other
}
