use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use ghproxy_core::{Bootstrap, bootstrap};
use ghproxy_reader::{ClientCache, GithubProxyReader, ReadUrlOptions, ReaderError};
use ghproxy_router::{ProxyState, proxy_router};

mod cli;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("ghproxy failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let boot = bootstrap(cli.args).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(boot).await,
        Command::Read { url, etag, output } => {
            let reader = reader_for(&boot);
            match reader.read_url(&url, ReadUrlOptions { etag }).await {
                Ok(resp) => {
                    match output {
                        Some(path) => tokio::fs::write(&path, resp.buffer())
                            .await
                            .with_context(|| format!("write {}", path.display()))?,
                        None => std::io::stdout().write_all(&resp.buffer())?,
                    }
                    if let Some(etag) = resp.etag {
                        info!(etag = %etag, "read complete");
                    }
                    Ok(())
                }
                Err(ReaderError::NotModified) => {
                    info!(url = %url, "not modified");
                    Ok(())
                }
                Err(err) => Err(err).with_context(|| format!("read {url}")),
            }
        }
        Command::Tree { url, archive } => {
            let reader = reader_for(&boot);
            let tree = reader
                .read_tree(&url)
                .await
                .with_context(|| format!("read tree {url}"))?;
            {
                let mut stdout = std::io::stdout().lock();
                for file in tree.files() {
                    writeln!(stdout, "{}", file.path)?;
                }
            }
            if let Some(path) = archive {
                let bytes = tree.archive().await?;
                tokio::fs::write(&path, bytes)
                    .await
                    .with_context(|| format!("write {}", path.display()))?;
            }
            info!(etag = %tree.etag(), dir = %tree.dir().display(), "tree read");
            tree.release()?;
            Ok(())
        }
        Command::Search { url } => {
            let reader = reader_for(&boot);
            let found = reader
                .search(&url)
                .await
                .with_context(|| format!("search {url}"))?;
            let mut stdout = std::io::stdout().lock();
            for file in &found.files {
                writeln!(stdout, "{}", file.url)?;
            }
            Ok(())
        }
    }
}

fn reader_for(boot: &Bootstrap) -> GithubProxyReader {
    let cache = ClientCache::new(boot.discovery.clone(), boot.http.clone())
        .with_host_header(boot.config.host_header.clone());
    GithubProxyReader::new(Arc::new(cache)).with_fetch_concurrency(boot.config.fetch_concurrency)
}

async fn serve(boot: Bootstrap) -> anyhow::Result<()> {
    let config = &boot.config;
    info!(
        host = %config.host,
        port = config.port,
        path_prefix = %config.path_prefix,
        host_header = %config.host_header,
        external_base_url = %config.external_base_url,
        proxy = %config.proxy.as_deref().unwrap_or(""),
        integrations = config.integrations.len(),
        "config loaded"
    );

    let app = proxy_router(ProxyState {
        engine: Arc::new(boot.engine),
        auth: boot.auth,
    });
    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(addr = %bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ghproxy=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
