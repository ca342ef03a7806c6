//! Content-source URL handling: remote/local classification, implicit-scp
//! coercion, credential extraction, and content-cache entry naming.
//!
//! Credentials embedded in a URL are kept exactly as written (no percent
//! decoding) so the transport can reproduce the original Basic auth token;
//! every URL stored or displayed downstream has the userinfo removed.

use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

/// Raw userinfo lifted out of a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlCredentials {
    pub username: String,
    pub password: Option<String>,
}

impl UrlCredentials {
    /// An empty or username-only userinfo segment still authenticates (as
    /// an anonymous/token credential) but is never retried after a 401.
    pub fn is_incomplete(&self) -> bool {
        self.password.is_none() || self.username.is_empty()
    }
}

/// Splits an implicit-scp URL (`git@host:path`) into `(user, host, path)`.
/// The form requires an `@` before the first `:` and no scheme separator.
pub fn split_scp_like(url: &str) -> Option<(&str, &str, &str)> {
    if url.contains("://") {
        return None;
    }
    let at = url.find('@')?;
    let colon = url.find(':')?;
    if at > colon || url[..at].contains('/') {
        return None;
    }
    let (user, rest) = url.split_at(at);
    let host_and_path = &rest[1..];
    let sep = host_and_path.find(':')?;
    let (host, path) = host_and_path.split_at(sep);
    Some((user, host, &path[1..]))
}

/// Implicit scp SSH is coerced to an https URL for cache identity and
/// transport purposes.
pub fn coerce_scp_to_https(url: &str) -> Option<String> {
    let (_, host, path) = split_scp_like(url)?;
    let path = path.trim_start_matches('/');
    let coerced = format!("https://{host}/{path}");
    Some(ensure_git_suffix(&coerced))
}

pub fn is_remote_url(url: &str) -> bool {
    url.starts_with("http://")
        || url.starts_with("https://")
        || url.starts_with("git://")
        || url.starts_with("ssh://")
        || split_scp_like(url).is_some()
}

/// Removes the userinfo segment from a scheme URL, returning the sanitized
/// URL and the raw credentials. Non-scheme URLs pass through untouched.
pub fn split_credentials(url: &str) -> (String, Option<UrlCredentials>) {
    let Some(scheme_end) = url.find("://") else {
        return (url.to_string(), None);
    };
    let authority_start = scheme_end + 3;
    let authority_end = url[authority_start..]
        .find('/')
        .map(|i| authority_start + i)
        .unwrap_or(url.len());
    let authority = &url[authority_start..authority_end];
    let Some(at) = authority.rfind('@') else {
        return (url.to_string(), None);
    };
    let userinfo = &authority[..at];
    let host = &authority[at + 1..];
    let sanitized = format!(
        "{}{}{}",
        &url[..authority_start],
        host,
        &url[authority_end..]
    );
    let credentials = match userinfo.find(':') {
        Some(sep) => UrlCredentials {
            username: userinfo[..sep].to_string(),
            password: Some(userinfo[sep + 1..].to_string()),
        },
        None => UrlCredentials {
            username: userinfo.to_string(),
            password: None,
        },
    };
    (sanitized, Some(credentials))
}

pub fn ensure_git_suffix(url: &str) -> String {
    if url.ends_with(".git") {
        url.to_string()
    } else {
        format!("{url}.git")
    }
}

/// The web URL counterpart of a remote clone URL.
pub fn web_url(url: &str) -> String {
    url.strip_suffix(".git").unwrap_or(url).to_string()
}

/// Stable content-cache entry name:
/// `basename + "-" + sha1(lowercased url, ".git"/trailing "/" stripped) + ".git"`.
pub fn cache_entry_name(url: &str) -> String {
    let mut normalized = url.to_lowercase();
    while normalized.ends_with('/') {
        normalized.pop();
    }
    if let Some(stripped) = normalized.strip_suffix(".git") {
        normalized = stripped.to_string();
    }
    let base = normalized
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(normalized.as_str())
        .to_string();
    let digest = hex::encode(Sha1::digest(normalized.as_bytes()));
    format!("{base}-{digest}.git")
}

pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Resolves a local content-source URL: `~` expands to the user home, `~+`
/// to the process working directory, relative paths resolve against the
/// playbook directory when one is set, and absolute paths pass through.
pub fn resolve_local_path(url: &str, start_dir: Option<&Path>) -> PathBuf {
    let url = url.strip_prefix("file://").unwrap_or(url);
    let cwd = || std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    if let Some(rest) = url.strip_prefix("~+") {
        cwd().join(rest.trim_start_matches('/'))
    } else if let Some(rest) = url.strip_prefix('~') {
        dirs::home_dir()
            .unwrap_or_else(cwd)
            .join(rest.trim_start_matches('/'))
    } else {
        let path = Path::new(url);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            start_dir.map(Path::to_path_buf).unwrap_or_else(cwd).join(path)
        }
    }
}
