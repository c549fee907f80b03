use std::time::SystemTime;

use serde::{Deserialize, Serialize};

pub const RATE_LIMIT_LIMIT: &str = "github_rate_limit_limit";
pub const RATE_LIMIT_REMAINING: &str = "github_rate_limit_remaining";
pub const RATE_LIMIT_RESET_SECONDS: &str = "github_rate_limit_reset_seconds";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Downstream(DownstreamEvent),
    RateLimit(RateLimitSnapshot),
}

/// One proxied call as seen by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamEvent {
    pub trace_id: String,
    pub at: SystemTime,
    pub principal: String,
    pub github_host: Option<String>,
    pub request_method: String,
    pub request_path: String,
    pub response_status: u16,
    pub elapsed_ms: u128,
}

/// Rate-limit observations read from one proxied response.
///
/// Each gauge is optional; a missing or non-numeric header leaves it `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub at: SystemTime,
    pub principal: String,
    pub api: String,
    pub limit: Option<f64>,
    pub remaining: Option<f64>,
    pub reset_seconds: Option<f64>,
}

impl RateLimitSnapshot {
    /// `(metric name, value)` for every gauge that was observed.
    pub fn gauges(&self) -> Vec<(&'static str, f64)> {
        [
            (RATE_LIMIT_LIMIT, self.limit),
            (RATE_LIMIT_REMAINING, self.remaining),
            (RATE_LIMIT_RESET_SECONDS, self.reset_seconds),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|value| (name, value)))
        .collect()
    }
}
