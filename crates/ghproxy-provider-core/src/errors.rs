use std::error::Error;
use std::fmt;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone)]
pub enum ProviderError {
    /// No integration is configured for the host behind a URL.
    NoIntegration(String),
    InvalidUrl(String),
    InvalidConfig(String),
    Credentials(String),
    Discovery(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::NoIntegration(target) => {
                write!(f, "no GitHub integration configured for {target}")
            }
            ProviderError::InvalidUrl(url) => write!(f, "invalid url: {url}"),
            ProviderError::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            ProviderError::Credentials(msg) => write!(f, "credential lookup failed: {msg}"),
            ProviderError::Discovery(msg) => write!(f, "service discovery failed: {msg}"),
        }
    }
}

impl Error for ProviderError {}
