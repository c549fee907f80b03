use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use ghproxy_provider_core::{
    Discovery, ProviderError, ProviderResult, StaticDiscovery, TransportFailure, UpstreamClient,
    UpstreamHttpRequest, UpstreamHttpResponse, UpstreamTransportErrorKind, header_get,
};
use ghproxy_reader::{ClientCache, GithubProxyReader, ReadUrlOptions, ReaderError};

const BASE: &str = "http://proxy.test/api/github";

/// Stand-in for the proxy: answers by request path and records traffic.
#[derive(Default)]
struct FakeProxy {
    routes: Mutex<HashMap<String, UpstreamHttpResponse>>,
    seen: Mutex<Vec<UpstreamHttpRequest>>,
}

impl FakeProxy {
    fn route(&self, path: &str, status: u16, headers: &[(&str, &str)], body: String) {
        self.routes.lock().unwrap().insert(
            format!("{BASE}{path}"),
            UpstreamHttpResponse {
                status,
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body: Bytes::from(body),
            },
        );
    }

    fn file(&self, path: &str, content: &str) {
        self.route(
            &format!("/repos/o/r/contents/{path}?ref=main"),
            200,
            &[],
            file_body(content),
        );
    }

    fn tree(&self, paths: &[&str]) {
        let mut entries: Vec<serde_json::Value> = paths
            .iter()
            .map(|path| serde_json::json!({ "path": path, "type": "blob", "sha": "s" }))
            .collect();
        entries.push(serde_json::json!({ "path": "docs", "type": "tree", "sha": "t" }));
        self.route(
            "/repos/o/r/git/trees/main?recursive=true",
            200,
            &[],
            serde_json::json!({ "sha": "tree-sha", "tree": entries }).to_string(),
        );
    }

    fn seen(&self) -> Vec<UpstreamHttpRequest> {
        self.seen.lock().unwrap().clone()
    }

    fn content_fetches(&self) -> usize {
        self.seen()
            .iter()
            .filter(|req| req.url.contains("/contents/"))
            .count()
    }
}

impl UpstreamClient for FakeProxy {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, TransportFailure>> + Send + 'a>>
    {
        let found = self.routes.lock().unwrap().get(&req.url).cloned();
        self.seen.lock().unwrap().push(req);
        Box::pin(async move {
            Ok(found.unwrap_or_else(|| UpstreamHttpResponse {
                status: 404,
                headers: Vec::new(),
                body: Bytes::from_static(br#"{"message":"Not Found"}"#),
            }))
        })
    }
}

fn file_body(content: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(content);
    serde_json::json!({ "type": "file", "encoding": "base64", "content": encoded }).to_string()
}

fn reader(proxy: &Arc<FakeProxy>) -> GithubProxyReader {
    let discovery = Arc::new(StaticDiscovery::new().with_endpoint("github", BASE));
    GithubProxyReader::new(Arc::new(ClientCache::new(discovery, proxy.clone())))
}

#[tokio::test]
async fn read_url_returns_content_and_validators() {
    let proxy = Arc::new(FakeProxy::default());
    proxy.route(
        "/repos/o/r/contents/docs/index.md?ref=dev",
        200,
        &[
            ("etag", "\"v1\""),
            ("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
        ],
        file_body("# hello"),
    );

    let resp = reader(&proxy)
        .read_url(
            "https://github.com/o/r/blob/dev/docs/index.md",
            ReadUrlOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(resp.buffer(), Bytes::from_static(b"# hello"));
    assert_eq!(resp.buffer(), resp.buffer());
    assert_eq!(resp.etag.as_deref(), Some("\"v1\""));
    assert_eq!(
        resp.last_modified_at,
        Some(httpdate::parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT").unwrap())
    );

    let sent = &proxy.seen()[0];
    assert_eq!(header_get(&sent.headers, "github-host"), Some("github.com"));
    assert_eq!(header_get(&sent.headers, "if-none-match"), None);
}

#[tokio::test]
async fn read_url_without_last_modified_leaves_it_empty() {
    let proxy = Arc::new(FakeProxy::default());
    proxy.file("a.txt", "a");
    let resp = reader(&proxy)
        .read_url("https://github.com/o/r/blob/main/a.txt", ReadUrlOptions::default())
        .await
        .unwrap();
    assert_eq!(resp.last_modified_at, None);
    assert_eq!(resp.etag, None);
}

#[tokio::test]
async fn unchanged_etag_is_not_modified() {
    let proxy = Arc::new(FakeProxy::default());
    proxy.route(
        "/repos/o/r/contents/a.txt?ref=main",
        304,
        &[("etag", "\"v1\"")],
        String::new(),
    );
    let err = reader(&proxy)
        .read_url(
            "https://github.com/o/r/blob/main/a.txt",
            ReadUrlOptions {
                etag: Some("\"v1\"".to_string()),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ReaderError::NotModified));
    assert_eq!(
        header_get(&proxy.seen()[0].headers, "if-none-match"),
        Some("\"v1\"")
    );
}

#[tokio::test]
async fn read_url_on_a_directory_fails() {
    let proxy = Arc::new(FakeProxy::default());
    proxy.route(
        "/repos/o/r/contents/docs?ref=main",
        200,
        &[],
        "[]".to_string(),
    );
    let err = reader(&proxy)
        .read_url("https://github.com/o/r/tree/main/docs", ReadUrlOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReaderError::Input(msg) if msg.ends_with("is a directory")));
}

#[tokio::test]
async fn upstream_errors_keep_their_status() {
    let proxy = Arc::new(FakeProxy::default());
    let err = reader(&proxy)
        .read_url("https://github.com/o/r/blob/main/missing", ReadUrlOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReaderError::Upstream { status: 404, ref message } if message == "Not Found"
    ));
}

#[tokio::test]
async fn read_tree_materializes_every_blob() {
    let proxy = Arc::new(FakeProxy::default());
    proxy.tree(&["README.md", "docs/a.md", "docs/deep/b.md"]);
    proxy.file("README.md", "readme");
    proxy.file("docs/a.md", "a");
    proxy.file("docs/deep/b.md", "b");

    let tree = reader(&proxy)
        .with_fetch_concurrency(2)
        .read_tree("https://github.com/o/r")
        .await
        .unwrap();
    assert_eq!(tree.etag(), "tree-sha");

    let files = tree.files();
    let paths: Vec<&str> = files.iter().map(|file| file.path.as_str()).collect();
    assert_eq!(paths, vec!["README.md", "docs/a.md", "docs/deep/b.md"]);
    assert_eq!(
        files[2].content().await.unwrap(),
        Bytes::from_static(b"b")
    );
    assert!(tree.dir().join("docs/deep/b.md").is_file());

    let archive = tree.archive().await.unwrap();
    assert_eq!(archive, tree.archive().await.unwrap());
    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(archive.to_vec())).unwrap();
    assert_eq!(zip.len(), 3);
    assert_eq!(zip.by_index(0).unwrap().name(), "README.md");

    let dir = tree.dir().to_path_buf();
    tree.release().unwrap();
    assert!(!dir.exists());
}

#[tokio::test]
async fn read_tree_keeps_paths_starting_with_the_sub_path() {
    let proxy = Arc::new(FakeProxy::default());
    proxy.file("docs/a.md", "a");
    proxy.file("docs/deep/b.md", "b");
    proxy.file("docs-old/c.md", "c");
    proxy.route(
        "/repos/o/r/git/trees/main?recursive=true",
        200,
        &[("etag", "W/\"tree\"")],
        serde_json::json!({
            "sha": "tree-sha",
            "tree": [
                { "path": "README.md", "type": "blob" },
                { "path": "docs/a.md", "type": "blob" },
                { "path": "docs/deep/b.md", "type": "blob" },
                { "path": "docs-old/c.md", "type": "blob" },
            ]
        })
        .to_string(),
    );

    let tree = reader(&proxy)
        .read_tree("https://github.com/o/r/tree/main/docs")
        .await
        .unwrap();
    let paths: Vec<String> = tree.files().into_iter().map(|file| file.path).collect();
    assert_eq!(paths, vec!["docs-old/c.md", "docs/a.md", "docs/deep/b.md"]);
    assert_eq!(tree.etag(), "W/\"tree\"");
    assert_eq!(proxy.content_fetches(), 3);
}

#[tokio::test]
async fn one_failed_blob_fails_the_whole_tree_and_cleans_up() {
    let proxy = Arc::new(FakeProxy::default());
    proxy.tree(&["a.txt", "b.txt"]);
    proxy.file("a.txt", "a");

    let scratch = tempfile::tempdir().unwrap();
    let err = reader(&proxy)
        .with_temp_root(scratch.path())
        .read_tree("https://github.com/o/r")
        .await
        .unwrap_err();
    assert!(matches!(err, ReaderError::Upstream { status: 404, .. }));
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn non_base64_blob_fails_the_tree() {
    let proxy = Arc::new(FakeProxy::default());
    proxy.tree(&["big.bin"]);
    proxy.route(
        "/repos/o/r/contents/big.bin?ref=main",
        200,
        &[],
        r#"{"type":"file","encoding":"none","content":""}"#.to_string(),
    );
    let err = reader(&proxy)
        .read_tree("https://github.com/o/r")
        .await
        .unwrap_err();
    assert!(matches!(err, ReaderError::UnsupportedEncoding(_)));
}

#[tokio::test]
async fn escaping_tree_paths_are_rejected() {
    let proxy = Arc::new(FakeProxy::default());
    proxy.tree(&["../outside.txt"]);
    let err = reader(&proxy)
        .read_tree("https://github.com/o/r")
        .await
        .unwrap_err();
    assert!(matches!(err, ReaderError::Input(_)));
    assert_eq!(proxy.content_fetches(), 0);
}

#[tokio::test]
async fn search_everything_matches_the_unfiltered_tree_lazily() {
    let proxy = Arc::new(FakeProxy::default());
    proxy.tree(&["README.md", "docs/a.md", "docs/deep/b.md"]);
    proxy.file("docs/a.md", "a");

    let reader = reader(&proxy);
    let found = reader.search("https://github.com/o/r").await.unwrap();
    let mut paths: Vec<&str> = found.files.iter().map(|file| file.path.as_str()).collect();
    paths.sort();
    assert_eq!(paths, vec!["README.md", "docs/a.md", "docs/deep/b.md"]);
    assert_eq!(found.etag, "tree-sha");
    assert_eq!(proxy.content_fetches(), 0);

    let a = found
        .files
        .iter()
        .find(|file| file.path == "docs/a.md")
        .unwrap();
    assert_eq!(a.url, "https://github.com/o/r/blob/main/docs/a.md");
    assert_eq!(a.content().await.unwrap(), Bytes::from_static(b"a"));
    assert_eq!(proxy.content_fetches(), 1);
}

#[tokio::test]
async fn search_star_does_not_cross_directories() {
    let proxy = Arc::new(FakeProxy::default());
    proxy.tree(&["README.md", "docs/a.md", "docs/deep/b.md", "docs/c.txt"]);

    let reader = reader(&proxy);
    let shallow = reader
        .search("https://github.com/o/r/tree/main/docs/*.md")
        .await
        .unwrap();
    let paths: Vec<&str> = shallow.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["docs/a.md"]);

    let deep = reader
        .search("https://github.com/o/r/tree/main/docs/**/*.md")
        .await
        .unwrap();
    assert_eq!(deep.files.len(), 2);
}

#[tokio::test]
async fn search_hits_on_a_slash_ref_fetch_their_own_file() {
    let proxy = Arc::new(FakeProxy::default());
    proxy.route(
        "/repos/o/r/git/trees/feature%2Fx?recursive=true",
        200,
        &[],
        serde_json::json!({
            "sha": "feature-sha",
            "tree": [{ "path": "a.md", "type": "blob" }]
        })
        .to_string(),
    );
    proxy.route(
        "/repos/o/r/contents/a.md?ref=feature%2Fx",
        200,
        &[],
        file_body("on a branch"),
    );

    let found = reader(&proxy)
        .search("https://github.com/o/r/tree/feature%2Fx")
        .await
        .unwrap();
    assert_eq!(found.files.len(), 1);
    let hit = &found.files[0];
    assert_eq!(hit.url, "https://github.com/o/r/blob/feature%2Fx/a.md");
    assert_eq!(hit.content().await.unwrap(), Bytes::from_static(b"on a branch"));
}

#[tokio::test]
async fn search_hits_with_url_delimiters_in_the_name_fetch_their_own_file() {
    let proxy = Arc::new(FakeProxy::default());
    proxy.tree(&["notes", "notes#1.md", "what?.md"]);
    proxy.file("notes", "wrong file");
    proxy.route(
        "/repos/o/r/contents/notes%231.md?ref=main",
        200,
        &[],
        file_body("first note"),
    );
    proxy.route(
        "/repos/o/r/contents/what%3F.md?ref=main",
        200,
        &[],
        file_body("question"),
    );

    let found = reader(&proxy)
        .search("https://github.com/o/r/tree/main/*.md")
        .await
        .unwrap();
    let by_path = |path: &str| {
        found
            .files
            .iter()
            .find(|file| file.path == path)
            .unwrap()
            .clone()
    };

    let note = by_path("notes#1.md");
    assert_eq!(note.url, "https://github.com/o/r/blob/main/notes%231.md");
    assert_eq!(note.content().await.unwrap(), Bytes::from_static(b"first note"));
    let question = by_path("what?.md");
    assert_eq!(question.content().await.unwrap(), Bytes::from_static(b"question"));
}

#[tokio::test]
async fn parse_errors_never_reach_the_network() {
    let proxy = Arc::new(FakeProxy::default());
    let err = reader(&proxy)
        .read_tree("https://github.com/only-owner")
        .await
        .unwrap_err();
    assert!(matches!(err, ReaderError::Input(_)));
    assert!(proxy.seen().is_empty());
}

/// Discovery that counts lookups and can be told to fail.
struct CountingDiscovery {
    calls: AtomicUsize,
    fail_first: bool,
}

#[async_trait]
impl Discovery for CountingDiscovery {
    async fn base_url(&self, service_id: &str) -> ProviderResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail_first && n == 0 {
            return Err(ProviderError::Discovery(format!("{service_id} unavailable")));
        }
        Ok(BASE.to_string())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_calls_share_one_client() {
    let discovery = Arc::new(CountingDiscovery {
        calls: AtomicUsize::new(0),
        fail_first: false,
    });
    let cache = Arc::new(ClientCache::new(
        discovery.clone(),
        Arc::new(FakeProxy::default()),
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.for_host("github.com").await.unwrap() })
        })
        .collect();
    let mut clients = Vec::new();
    for handle in handles {
        clients.push(handle.await.unwrap());
    }
    assert_eq!(discovery.calls.load(Ordering::SeqCst), 1);
    assert!(clients.iter().all(|client| Arc::ptr_eq(client, &clients[0])));

    cache.for_host("ghe.example.com").await.unwrap();
    assert_eq!(discovery.calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn repeated_calls_carry_the_same_host_tag() {
    let proxy = Arc::new(FakeProxy::default());
    proxy.file("a.txt", "a");
    let reader = reader(&proxy);
    for _ in 0..2 {
        reader
            .read_url("https://github.com/o/r/blob/main/a.txt", ReadUrlOptions::default())
            .await
            .unwrap();
    }
    let tags: Vec<Option<String>> = proxy
        .seen()
        .iter()
        .map(|req| header_get(&req.headers, "github-host").map(str::to_string))
        .collect();
    assert_eq!(tags, vec![Some("github.com".to_string()); 2]);
    assert_eq!(reader.cache().len(), 1);
}

#[tokio::test]
async fn failed_discovery_is_retried_on_the_next_call() {
    let discovery = Arc::new(CountingDiscovery {
        calls: AtomicUsize::new(0),
        fail_first: true,
    });
    let cache = ClientCache::new(discovery.clone(), Arc::new(FakeProxy::default()));
    assert!(matches!(
        cache.for_host("github.com").await,
        Err(ReaderError::Discovery(_))
    ));
    assert!(cache.is_empty());
    let client = cache.for_host("github.com").await.unwrap();
    assert_eq!(client.base_url(), BASE);
    assert_eq!(discovery.calls.load(Ordering::SeqCst), 2);
}
