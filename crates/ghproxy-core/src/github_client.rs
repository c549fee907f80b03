use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use ghproxy_provider_core::{
    Headers, HttpMethod, TransportFailure, UpstreamClient, UpstreamHttpRequest,
    UpstreamHttpResponse, header_get, header_parse, header_set,
};

pub const GITHUB_MEDIA_TYPE: &str = "application/vnd.github+json";
const USER_AGENT: &str = concat!("ghproxy/", env!("CARGO_PKG_VERSION"));

/// Statuses the generic retry never repeats.
pub const DO_NOT_RETRY: [u16; 7] = [400, 401, 403, 404, 422, 429, 501];

#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error("{message}")]
    Http {
        status: u16,
        headers: Headers,
        body: Bytes,
        message: String,
    },
    #[error(transparent)]
    Transport(#[from] TransportFailure),
    #[error("failed to decode GitHub response: {0}")]
    Decode(String),
}

impl GithubError {
    fn from_response(resp: UpstreamHttpResponse) -> Self {
        let message = error_message(resp.status, &resp.body);
        GithubError::Http {
            status: resp.status,
            headers: resp.headers,
            body: resp.body,
            message,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            GithubError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            GithubError::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

fn error_message(status: u16, body: &[u8]) -> String {
    let from_body = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .filter(|message| !message.is_empty());
    match from_body {
        Some(message) => message,
        None if status == 304 => "Not Modified".to_string(),
        None => format!("HTTP {status}"),
    }
}

/// Generic retry for transport failures and non-excluded error statuses.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub do_not_retry: Vec<u16>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            do_not_retry: Vec::new(),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Policy applied to every client handed out for proxied calls.
    pub fn proxy_default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            do_not_retry: DO_NOT_RETRY.to_vec(),
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }

    fn allows_status(&self, status: u16) -> bool {
        status >= 400 && !self.do_not_retry.contains(&status)
    }

    fn backoff(&self, attempt_no: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let step = attempt_no.saturating_sub(1).min(6);
        let backoff = base_ms.saturating_mul(1u64 << step);
        let jitter = rand::random::<u64>() % (base_ms + 1);
        Duration::from_millis(backoff + jitter).min(self.max_delay)
    }
}

/// Shortest wait between rate-limited attempts.
pub const MIN_THROTTLE_DELAY: Duration = Duration::from_secs(1);

/// Rate-limit aware waiting. Continuations are unbounded unless `max_retries`
/// is set.
#[derive(Debug, Clone)]
pub struct ThrottlePolicy {
    pub enabled: bool,
    pub max_retries: Option<u32>,
    /// Wait applied to a secondary limit without a usable `retry-after`.
    pub fallback_delay: Duration,
}

impl ThrottlePolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_retries: None,
            fallback_delay: Duration::from_secs(60),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            enabled: true,
            ..Self::disabled()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKind {
    Primary,
    Secondary,
}

impl RateLimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitKind::Primary => "primary",
            RateLimitKind::Secondary => "secondary",
        }
    }
}

/// Classifies a rate-limited response and the wait it asks for.
///
/// Only 403 and 429 qualify. A secondary limit is signalled by a
/// `retry-after` header or a "secondary rate limit" message; a primary limit by
/// `x-ratelimit-remaining: 0`, waiting until one second past
/// `x-ratelimit-reset`. An unparseable `retry-after` uses `fallback`, and no
/// wait is shorter than [`MIN_THROTTLE_DELAY`].
pub fn rate_limit_delay(
    resp: &UpstreamHttpResponse,
    now_unix: i64,
    fallback: Duration,
) -> Option<(RateLimitKind, Duration)> {
    if resp.status != 403 && resp.status != 429 {
        return None;
    }

    let retry_after = header_get(&resp.headers, "retry-after");
    let secondary_message = String::from_utf8_lossy(&resp.body)
        .to_ascii_lowercase()
        .contains("secondary rate");
    if retry_after.is_some() || secondary_message {
        let delay = header_parse::<u64>(&resp.headers, "retry-after")
            .map(Duration::from_secs)
            .unwrap_or(fallback);
        return Some((RateLimitKind::Secondary, delay.max(MIN_THROTTLE_DELAY)));
    }

    if header_get(&resp.headers, "x-ratelimit-remaining").map(str::trim) == Some("0") {
        let delay = match header_parse::<i64>(&resp.headers, "x-ratelimit-reset") {
            Some(reset) => Duration::from_secs((reset - now_unix + 1).max(0) as u64),
            None => fallback,
        };
        return Some((RateLimitKind::Primary, delay.max(MIN_THROTTLE_DELAY)));
    }
    None
}

#[derive(Debug, Clone)]
pub struct GithubRequest {
    pub method: HttpMethod,
    /// API path, including any query string.
    pub path: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

impl GithubRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        header_set(&mut self.headers, name, value);
        self
    }

    pub fn body(mut self, body: Option<Bytes>) -> Self {
        self.body = body;
        self
    }
}

/// Client bound to one GitHub API root.
#[derive(Clone)]
pub struct GithubClient {
    http: Arc<dyn UpstreamClient>,
    base_url: String,
    default_headers: Headers,
    retry: RetryPolicy,
    throttle: ThrottlePolicy,
}

impl fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

pub struct GithubClientBuilder {
    http: Arc<dyn UpstreamClient>,
    base_url: String,
    token: Option<String>,
    default_headers: Headers,
    retry: RetryPolicy,
    throttle: ThrottlePolicy,
}

impl GithubClientBuilder {
    pub fn token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|token| !token.is_empty());
        self
    }

    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        header_set(&mut self.default_headers, name, value);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn throttle(mut self, throttle: ThrottlePolicy) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn build(self) -> GithubClient {
        let mut default_headers = self.default_headers;
        if let Some(token) = self.token {
            header_set(&mut default_headers, "authorization", format!("token {token}"));
        }
        GithubClient {
            http: self.http,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            default_headers,
            retry: self.retry,
            throttle: self.throttle,
        }
    }
}

impl GithubClient {
    pub fn builder(http: Arc<dyn UpstreamClient>, base_url: impl Into<String>) -> GithubClientBuilder {
        let mut default_headers = Vec::new();
        header_set(&mut default_headers, "accept", GITHUB_MEDIA_TYPE);
        header_set(&mut default_headers, "user-agent", USER_AGENT);
        GithubClientBuilder {
            http,
            base_url: base_url.into(),
            token: None,
            default_headers,
            retry: RetryPolicy::disabled(),
            throttle: ThrottlePolicy::disabled(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Issues one logical call, retrying and waiting out rate limits per the
    /// client's policies. Any non-2xx final status is an error.
    pub async fn request(&self, req: GithubRequest) -> Result<UpstreamHttpResponse, GithubError> {
        let url = self.url_for(&req.path);
        let mut headers = self.default_headers.clone();
        for (name, value) in req.headers {
            header_set(&mut headers, name, value);
        }
        let upstream = UpstreamHttpRequest {
            method: req.method,
            url: url.clone(),
            headers,
            body: req.body,
        };

        let mut attempt_no = 0u32;
        let mut retries = 0u32;
        let mut throttled = 0u32;
        loop {
            attempt_no += 1;
            let result = self.http.send(upstream.clone()).await;

            let resp = match result {
                Ok(resp) if resp.is_success() => return Ok(resp),
                Ok(resp) => resp,
                Err(failure) => {
                    if self.retry.enabled && retries < self.retry.max_retries {
                        retries += 1;
                        debug!(
                            event = "github.retry",
                            method = upstream.method.as_str(),
                            url = %url,
                            error = %failure,
                            attempt = attempt_no
                        );
                        sleep(self.retry.backoff(retries)).await;
                        continue;
                    }
                    return Err(GithubError::Transport(failure));
                }
            };

            if resp.status < 400 {
                return Err(GithubError::from_response(resp));
            }

            if self.throttle.enabled
                && self
                    .throttle
                    .max_retries
                    .is_none_or(|max| throttled < max)
                && let Some((kind, delay)) = rate_limit_delay(
                    &resp,
                    time::OffsetDateTime::now_utc().unix_timestamp(),
                    self.throttle.fallback_delay,
                )
            {
                throttled += 1;
                warn!(
                    event = "github.rate_limited",
                    kind = kind.as_str(),
                    method = upstream.method.as_str(),
                    url = %url,
                    retry_after_secs = delay.as_secs(),
                    attempt = attempt_no
                );
                sleep(delay).await;
                continue;
            }

            if self.retry.enabled
                && retries < self.retry.max_retries
                && self.retry.allows_status(resp.status)
            {
                retries += 1;
                debug!(
                    event = "github.retry",
                    method = upstream.method.as_str(),
                    url = %url,
                    status = resp.status,
                    attempt = attempt_no
                );
                sleep(self.retry.backoff(retries)).await;
                continue;
            }

            return Err(GithubError::from_response(resp));
        }
    }

    /// GET returning the decoded JSON body together with the response headers.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        req: GithubRequest,
    ) -> Result<(T, Headers), GithubError> {
        let resp = self.request(req).await?;
        let value = serde_json::from_slice(&resp.body)
            .map_err(|err| GithubError::Decode(err.to_string()))?;
        Ok((value, resp.headers))
    }
}

async fn sleep(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(status: u16, headers: &[(&str, &str)], body: &str) -> UpstreamHttpResponse {
        UpstreamHttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Bytes::from(body.to_string()),
        }
    }

    const FALLBACK: Duration = Duration::from_secs(60);

    #[test]
    fn primary_limit_waits_until_reset() {
        let r = resp(
            403,
            &[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", "1010")],
            "{}",
        );
        assert_eq!(
            rate_limit_delay(&r, 1000, FALLBACK),
            Some((RateLimitKind::Primary, Duration::from_secs(11)))
        );

        let past = resp(429, &[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", "5")], "");
        assert_eq!(
            rate_limit_delay(&past, 1000, FALLBACK),
            Some((RateLimitKind::Primary, MIN_THROTTLE_DELAY))
        );
    }

    #[test]
    fn secondary_limit_prefers_retry_after() {
        let r = resp(403, &[("retry-after", "7")], "{}");
        assert_eq!(
            rate_limit_delay(&r, 0, FALLBACK),
            Some((RateLimitKind::Secondary, Duration::from_secs(7)))
        );

        let zero = resp(403, &[("retry-after", "0")], "{}");
        assert_eq!(
            rate_limit_delay(&zero, 0, FALLBACK),
            Some((RateLimitKind::Secondary, MIN_THROTTLE_DELAY))
        );

        let dated = resp(429, &[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")], "{}");
        assert_eq!(
            rate_limit_delay(&dated, 0, FALLBACK),
            Some((RateLimitKind::Secondary, FALLBACK))
        );

        let by_message = resp(
            403,
            &[],
            r#"{"message":"You have exceeded a secondary rate limit"}"#,
        );
        assert_eq!(
            rate_limit_delay(&by_message, 0, FALLBACK),
            Some((RateLimitKind::Secondary, FALLBACK))
        );
    }

    #[test]
    fn plain_errors_are_not_rate_limits() {
        assert_eq!(rate_limit_delay(&resp(403, &[], "{}"), 0, FALLBACK), None);
        assert_eq!(rate_limit_delay(&resp(429, &[], ""), 0, FALLBACK), None);
        assert_eq!(
            rate_limit_delay(&resp(500, &[("retry-after", "1")], ""), 0, FALLBACK),
            None
        );
    }

    #[test]
    fn error_message_prefers_github_message() {
        assert_eq!(error_message(404, br#"{"message":"Not Found"}"#), "Not Found");
        assert_eq!(error_message(502, b"bad gateway"), "HTTP 502");
        assert_eq!(error_message(304, b""), "Not Modified");
    }

    #[test]
    fn proxy_retry_excludes_client_errors() {
        let policy = RetryPolicy::proxy_default();
        for status in DO_NOT_RETRY {
            assert!(!policy.allows_status(status));
        }
        assert!(policy.allows_status(500));
        assert!(policy.allows_status(502));
        assert!(!policy.allows_status(304));
        assert!(policy.backoff(10) <= policy.max_delay);
    }
}
