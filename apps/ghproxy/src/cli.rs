use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ghproxy_core::CliArgs;

#[derive(Debug, Parser)]
#[command(
    name = "ghproxy",
    version,
    about = "GitHub API proxy with per-host credentials and rate-limit aware retries"
)]
pub struct Cli {
    #[command(flatten)]
    pub args: CliArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the proxy (default).
    Serve,
    /// Fetch one file through a running proxy.
    Read {
        url: String,
        /// Etag from an earlier read.
        #[arg(long)]
        etag: Option<String>,
        /// Write the content here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Materialize a tree through a running proxy and list its files.
    Tree {
        url: String,
        /// Also write a zip of the tree here.
        #[arg(long)]
        archive: Option<PathBuf>,
    },
    /// List files matching the glob in the URL path.
    Search { url: String },
}
