use std::time::SystemTime;

use time::OffsetDateTime;

use ghproxy_common::RateLimitHeaderNames;
use ghproxy_provider_core::{Headers, RateLimitSnapshot, header_parse};

/// Reads the rate-limit gauges from one response. `reset` is an epoch
/// timestamp upstream and is turned into seconds remaining (never negative).
pub fn rate_limit_snapshot(
    headers: &Headers,
    names: &RateLimitHeaderNames,
    principal: &str,
    api: &str,
    now: OffsetDateTime,
) -> RateLimitSnapshot {
    let read = |name: &str| header_parse::<f64>(headers, name).filter(|value| value.is_finite());
    let now_secs = now.unix_timestamp() as f64;
    RateLimitSnapshot {
        at: SystemTime::from(now),
        principal: principal.to_string(),
        api: api.to_string(),
        limit: read(&names.limit),
        remaining: read(&names.remaining),
        reset_seconds: read(&names.reset).map(|reset| (reset - now_secs).max(0.0)),
    }
}
