use ghproxy_core::GithubError;
use ghproxy_provider_core::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// Bad caller input: unparseable URL, directory where a file was expected,
    /// unsafe tree path.
    #[error("{0}")]
    Input(String),
    /// The caller's etag still matches.
    #[error("not modified")]
    NotModified,
    #[error("unsupported content encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("GitHub request failed with status {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("GitHub transport error: {0}")]
    Transport(String),
    #[error("unexpected GitHub response: {0}")]
    Decode(String),
    #[error("discovery failed: {0}")]
    Discovery(String),
    /// A thread panicked while holding the client cache.
    #[error("client cache unavailable: lock poisoned")]
    CachePoisoned,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),
}

impl From<GithubError> for ReaderError {
    fn from(err: GithubError) -> Self {
        match err {
            GithubError::Http { status: 304, .. } => ReaderError::NotModified,
            GithubError::Http {
                status, message, ..
            } => ReaderError::Upstream { status, message },
            GithubError::Transport(failure) => ReaderError::Transport(failure.to_string()),
            GithubError::Decode(message) => ReaderError::Decode(message),
        }
    }
}

impl From<ProviderError> for ReaderError {
    fn from(err: ProviderError) -> Self {
        ReaderError::Discovery(err.to_string())
    }
}

impl From<zip::result::ZipError> for ReaderError {
    fn from(err: zip::result::ZipError) -> Self {
        ReaderError::Archive(err.to_string())
    }
}
