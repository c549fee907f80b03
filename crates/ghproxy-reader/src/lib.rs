//! Reads GitHub repositories by URL: single files, whole trees materialized
//! to a temporary directory, and glob search. Calls are routed through the
//! ghproxy service found via discovery.

mod archive;
pub mod client_cache;
pub mod error;
pub mod git_url;
pub mod reader;

pub use client_cache::ClientCache;
pub use error::ReaderError;
pub use git_url::{DEFAULT_REF, GitRef, parse_git_url};
pub use reader::{
    GithubProxyReader, ReadTreeResponse, ReadUrlOptions, ReadUrlResponse, SearchResponse,
    SearchResult, TreeFile,
};
