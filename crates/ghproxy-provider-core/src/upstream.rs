use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::headers::Headers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn parse(method: &str) -> Option<Self> {
        [
            HttpMethod::Get,
            HttpMethod::Head,
            HttpMethod::Post,
            HttpMethod::Put,
            HttpMethod::Patch,
            HttpMethod::Delete,
        ]
        .into_iter()
        .find(|candidate| method.eq_ignore_ascii_case(candidate.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

impl UpstreamHttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl UpstreamHttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UpstreamTransportErrorKind {
    Timeout,
    Connect,
    Dns,
    Tls,
    Other,
}

/// Failure to obtain any HTTP response at all.
#[derive(Debug, Clone)]
pub struct TransportFailure {
    pub kind: UpstreamTransportErrorKind,
    pub message: String,
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upstream transport error ({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportFailure {}

/// Raw HTTP transport. Every HTTP status, including errors, is returned as a
/// response; only connection-level problems surface as `TransportFailure`.
pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, TransportFailure>> + Send + 'a>>;
}
