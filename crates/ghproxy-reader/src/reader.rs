use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use base64::Engine;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt, stream};
use globset::GlobBuilder;
use serde::Deserialize;
use tempfile::TempDir;
use tracing::debug;

use ghproxy_common::DEFAULT_FETCH_CONCURRENCY;
use ghproxy_core::{GithubClient, GithubRequest};
use ghproxy_provider_core::{Headers, header_get};

use crate::archive::zip_files;
use crate::client_cache::ClientCache;
use crate::error::ReaderError;
use crate::git_url::{GitRef, parse_git_url};

#[derive(Debug, Clone, Default)]
pub struct ReadUrlOptions {
    /// Etag from an earlier read; an unchanged file yields `NotModified`.
    pub etag: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReadUrlResponse {
    content: Bytes,
    pub etag: Option<String>,
    pub last_modified_at: Option<SystemTime>,
}

impl ReadUrlResponse {
    /// The decoded file. Can be called any number of times.
    pub fn buffer(&self) -> Bytes {
        self.content.clone()
    }
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreeListing {
    sha: String,
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(default)]
    path: Option<String>,
    #[serde(rename = "type")]
    kind: String,
}

/// A tree materialized on local disk. The directory is deleted when this value
/// is dropped or released.
#[derive(Debug)]
pub struct ReadTreeResponse {
    dir: TempDir,
    paths: Vec<String>,
    etag: String,
}

#[derive(Debug, Clone)]
pub struct TreeFile {
    pub path: String,
    local_path: PathBuf,
}

impl TreeFile {
    pub async fn content(&self) -> Result<Bytes, ReaderError> {
        Ok(Bytes::from(tokio::fs::read(&self.local_path).await?))
    }
}

impl ReadTreeResponse {
    /// Repository paths in sorted order.
    pub fn files(&self) -> Vec<TreeFile> {
        self.paths
            .iter()
            .map(|path| TreeFile {
                path: path.clone(),
                local_path: self.dir.path().join(path),
            })
            .collect()
    }

    pub async fn archive(&self) -> Result<Bytes, ReaderError> {
        let root = self.dir.path().to_path_buf();
        let paths = self.paths.clone();
        let bytes = tokio::task::spawn_blocking(move || zip_files(&root, &paths))
            .await
            .map_err(|err| ReaderError::Archive(err.to_string()))??;
        Ok(Bytes::from(bytes))
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn release(self) -> Result<(), ReaderError> {
        self.dir.close()?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct SearchResponse {
    pub files: Vec<SearchResult>,
    pub etag: String,
}

/// One search hit. Content is only fetched when asked for.
#[derive(Clone)]
pub struct SearchResult {
    pub url: String,
    pub path: String,
    git_ref: GitRef,
    reader: GithubProxyReader,
}

impl std::fmt::Debug for SearchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchResult")
            .field("url", &self.url)
            .field("path", &self.path)
            .finish()
    }
}

impl SearchResult {
    pub async fn content(&self) -> Result<Bytes, ReaderError> {
        let client = self.reader.cache.for_host(&self.git_ref.host).await?;
        let resp = fetch_file(&client, &self.git_ref, &self.path, None).await?;
        Ok(resp.buffer())
    }
}

/// Treats GitHub as a URL-addressable content source. Every call goes
/// through the proxy via a host-tagged client from the cache.
#[derive(Clone)]
pub struct GithubProxyReader {
    cache: Arc<ClientCache>,
    fetch_concurrency: usize,
    temp_root: Option<PathBuf>,
}

impl GithubProxyReader {
    pub fn new(cache: Arc<ClientCache>) -> Self {
        Self {
            cache,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            temp_root: None,
        }
    }

    /// Directory under which tree reads create their scratch directories;
    /// the system temp dir by default.
    pub fn with_temp_root(mut self, temp_root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(temp_root.into());
        self
    }

    pub fn with_fetch_concurrency(mut self, fetch_concurrency: usize) -> Self {
        self.fetch_concurrency = fetch_concurrency.max(1);
        self
    }

    pub fn cache(&self) -> &Arc<ClientCache> {
        &self.cache
    }

    pub fn parse_git_url(&self, url: &str) -> Result<GitRef, ReaderError> {
        parse_git_url(url)
    }

    pub async fn read_url(
        &self,
        url: &str,
        options: ReadUrlOptions,
    ) -> Result<ReadUrlResponse, ReaderError> {
        let git_ref = parse_git_url(url)?;
        let client = self.cache.for_host(&git_ref.host).await?;
        fetch_file(&client, &git_ref, &git_ref.path, options.etag.as_deref()).await
    }

    pub async fn read_tree(&self, url: &str) -> Result<ReadTreeResponse, ReaderError> {
        let git_ref = parse_git_url(url)?;
        let client = self.cache.for_host(&git_ref.host).await?;
        let (listing, headers) = list_tree(&client, &git_ref).await?;

        let mut paths: Vec<String> = blob_paths(&listing)
            .filter(|path| path.starts_with(git_ref.path.as_str()))
            .map(str::to_string)
            .collect();
        for path in &paths {
            ensure_relative(path)?;
        }
        paths.sort();

        let mut builder = tempfile::Builder::new();
        builder.prefix("ghproxy-tree-");
        let dir = match self.temp_root.as_deref() {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        let root = dir.path().to_path_buf();
        debug!(
            event = "reader.read_tree",
            url = %url,
            files = paths.len(),
            dir = %root.display()
        );

        // On error `dir` is dropped here and the partial tree goes with it.
        stream::iter(paths.iter())
            .map(|path| {
                let client = client.clone();
                let git_ref = &git_ref;
                let target = root.join(path);
                async move {
                    let file = fetch_file(&client, git_ref, path, None).await?;
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&target, &file.content).await?;
                    Ok::<_, ReaderError>(())
                }
            })
            .buffer_unordered(self.fetch_concurrency)
            .try_collect::<Vec<()>>()
            .await?;

        Ok(ReadTreeResponse {
            dir,
            paths,
            etag: etag_or_sha(&headers, &listing),
        })
    }

    pub async fn search(&self, url: &str) -> Result<SearchResponse, ReaderError> {
        let git_ref = parse_git_url(url)?;
        let client = self.cache.for_host(&git_ref.host).await?;
        let (listing, headers) = list_tree(&client, &git_ref).await?;

        let pattern = if git_ref.path.is_empty() {
            "**"
        } else {
            git_ref.path.as_str()
        };
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()?
            .compile_matcher();

        let files = blob_paths(&listing)
            .filter(|path| matcher.is_match(path))
            .map(|path| SearchResult {
                url: git_ref.blob_url(path),
                path: path.to_string(),
                git_ref: git_ref.clone(),
                reader: self.clone(),
            })
            .collect();

        Ok(SearchResponse {
            files,
            etag: etag_or_sha(&headers, &listing),
        })
    }
}

/// Fetches one file through the contents API. `etag` turns an unchanged file
/// into `NotModified`.
async fn fetch_file(
    client: &GithubClient,
    git_ref: &GitRef,
    path: &str,
    etag: Option<&str>,
) -> Result<ReadUrlResponse, ReaderError> {
    let mut req = GithubRequest::get(contents_path(git_ref, path));
    if let Some(etag) = etag {
        req = req.header("if-none-match", etag);
    }
    let resp = client.request(req).await?;

    let label = if path.is_empty() { "/" } else { path };
    let content = decode_file(label, &resp.body)?;
    Ok(ReadUrlResponse {
        content,
        etag: header_get(&resp.headers, "etag").map(str::to_string),
        last_modified_at: header_get(&resp.headers, "last-modified")
            .and_then(|value| httpdate::parse_http_date(value).ok()),
    })
}

fn contents_path(git_ref: &GitRef, path: &str) -> String {
    let encoded: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!(
        "/repos/{}/{}/contents/{}?ref={}",
        urlencoding::encode(&git_ref.owner),
        urlencoding::encode(&git_ref.repo),
        encoded.join("/"),
        urlencoding::encode(&git_ref.git_ref)
    )
}

async fn list_tree(
    client: &GithubClient,
    git_ref: &GitRef,
) -> Result<(TreeListing, Headers), ReaderError> {
    let path = format!(
        "/repos/{}/{}/git/trees/{}?recursive=true",
        urlencoding::encode(&git_ref.owner),
        urlencoding::encode(&git_ref.repo),
        urlencoding::encode(&git_ref.git_ref)
    );
    Ok(client.get_json(GithubRequest::get(path)).await?)
}

fn blob_paths(listing: &TreeListing) -> impl Iterator<Item = &str> {
    listing
        .tree
        .iter()
        .filter(|entry| entry.kind == "blob")
        .filter_map(|entry| entry.path.as_deref())
        .filter(|path| !path.is_empty())
}

fn etag_or_sha(headers: &Headers, listing: &TreeListing) -> String {
    header_get(headers, "etag")
        .map(str::to_string)
        .unwrap_or_else(|| listing.sha.clone())
}

/// Decodes a contents API file body. Directories and non-base64 encodings are
/// rejected.
fn decode_file(target: &str, body: &[u8]) -> Result<Bytes, ReaderError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|err| ReaderError::Decode(err.to_string()))?;
    if value.is_array() {
        return Err(ReaderError::Input(format!("{target} is a directory")));
    }
    let item: ContentItem =
        serde_json::from_value(value).map_err(|err| ReaderError::Decode(err.to_string()))?;
    if item.kind != "file" {
        return Err(ReaderError::Input(format!("{target} is a directory")));
    }
    match item.encoding.as_deref() {
        Some("base64") => {}
        other => {
            return Err(ReaderError::UnsupportedEncoding(
                other.unwrap_or("none").to_string(),
            ));
        }
    }
    let compact: String = item
        .content
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map(Bytes::from)
        .map_err(|err| ReaderError::Decode(format!("bad base64 content for {target}: {err}")))
}

fn ensure_relative(path: &str) -> Result<(), ReaderError> {
    let safe = Path::new(path)
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if safe {
        Ok(())
    } else {
        Err(ReaderError::Input(format!(
            "tree entry {path} escapes the target directory"
        )))
    }
}
