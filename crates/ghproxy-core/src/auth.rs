use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use http::HeaderMap;

use ghproxy_common::AuthTokenConfig;

/// Identity behind an inbound call. Only used to label metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    User { user_entity_ref: String },
    Service { subject: String },
    Anonymous,
}

impl Principal {
    pub fn label(&self) -> &str {
        match self {
            Principal::User { user_entity_ref } => user_entity_ref,
            Principal::Service { subject } => subject,
            Principal::Anonymous => "anonymous",
        }
    }

    fn from_config(principal: &str) -> Self {
        let principal = principal.trim();
        if principal.starts_with("user:") {
            Principal::User {
                user_entity_ref: principal.to_string(),
            }
        } else {
            Principal::Service {
                subject: principal.to_string(),
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unknown bearer token")]
    UnknownToken,
    #[error("malformed authorization header")]
    Malformed,
}

pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError>;
}

/// Treats every caller as anonymous.
#[derive(Debug, Default)]
pub struct NoopAuth;

impl AuthProvider for NoopAuth {
    fn authenticate(&self, _headers: &HeaderMap) -> Result<Principal, AuthError> {
        Ok(Principal::Anonymous)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthSnapshot {
    pub principals_by_token: HashMap<String, Principal>,
}

impl AuthSnapshot {
    pub fn from_config(tokens: &[AuthTokenConfig]) -> Self {
        let principals_by_token = tokens
            .iter()
            .filter(|entry| !entry.token.trim().is_empty())
            .map(|entry| {
                (
                    entry.token.trim().to_string(),
                    Principal::from_config(&entry.principal),
                )
            })
            .collect();
        Self {
            principals_by_token,
        }
    }
}

/// Bearer-token table held in memory; swappable at runtime.
#[derive(Debug)]
pub struct MemoryAuth {
    snapshot: ArcSwap<AuthSnapshot>,
}

impl MemoryAuth {
    pub fn new(snapshot: AuthSnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn replace_snapshot(&self, snapshot: AuthSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }
}

impl AuthProvider for MemoryAuth {
    /// No `authorization` header means anonymous; a token that is present but
    /// unknown is an error.
    fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let Some(token) = extract_bearer(headers)? else {
            return Ok(Principal::Anonymous);
        };
        self.snapshot
            .load()
            .principals_by_token
            .get(token.as_str())
            .cloned()
            .ok_or(AuthError::UnknownToken)
    }
}

fn extract_bearer(headers: &HeaderMap) -> Result<Option<String>, AuthError> {
    let Some(value) = headers.get(http::header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| AuthError::Malformed)?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or(AuthError::Malformed)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::Malformed);
    }
    Ok(Some(token.to_string()))
}
