use ghproxy_provider_core::host_from_url;

use crate::error::ReaderError;

pub const DEFAULT_REF: &str = "main";

/// A repository location parsed from a GitHub web URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRef {
    pub host: String,
    pub owner: String,
    pub repo: String,
    /// Path inside the repository; empty for the root.
    pub path: String,
    pub git_ref: String,
}

impl GitRef {
    /// Web URL of a file at this ref. The ref is a single encoded segment, so
    /// the URL parses back to the same ref and path.
    pub fn blob_url(&self, path: &str) -> String {
        let path: Vec<String> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!(
            "https://{}/{}/{}/blob/{}/{}",
            self.host,
            urlencoding::encode(&self.owner),
            urlencoding::encode(&self.repo),
            urlencoding::encode(&self.git_ref),
            path.join("/")
        )
    }
}

/// Accepts `https://{host}/{owner}/{repo}[.git]` optionally followed by
/// `/blob/{ref}/{path}` or `/tree/{ref}/{path}`. The ref defaults to `main`.
pub fn parse_git_url(url: &str) -> Result<GitRef, ReaderError> {
    let invalid = |reason: &str| ReaderError::Input(format!("invalid Git URL {url}: {reason}"));

    let parsed = url::Url::parse(url).map_err(|_| invalid("not an absolute URL"))?;
    let host = host_from_url(url).map_err(|_| invalid("missing host"))?;

    let segments: Vec<String> = parsed
        .path_segments()
        .map(|segments| {
            segments
                .filter(|segment| !segment.is_empty())
                .map(|segment| {
                    urlencoding::decode(segment)
                        .map(|decoded| decoded.into_owned())
                        .unwrap_or_else(|_| segment.to_string())
                })
                .collect()
        })
        .unwrap_or_default();

    let [owner, repo, rest @ ..] = segments.as_slice() else {
        return Err(invalid("missing owner or repository"));
    };
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if repo.is_empty() {
        return Err(invalid("missing repository"));
    }

    let (git_ref, path) = match rest {
        [] => (DEFAULT_REF.to_string(), String::new()),
        [kind, git_ref, path @ ..] if kind == "blob" || kind == "tree" => {
            (git_ref.clone(), path.join("/"))
        }
        [kind] if kind == "blob" || kind == "tree" => {
            return Err(invalid("missing ref"));
        }
        _ => return Err(invalid("expected /blob/{ref} or /tree/{ref}")),
    };

    Ok(GitRef {
        host,
        owner: owner.clone(),
        repo: repo.to_string(),
        path,
        git_ref,
    })
}
