use thiserror::Error;

use git::{GitError, Ref};

#[derive(Debug, Error)]
pub enum AggregateError {
    /// Bad playbook or source configuration.
    #[error("{0}")]
    Config(String),
    /// Component descriptor problems (syntax, missing name, bad version).
    #[error("{0}")]
    Descriptor(String),
    /// Fatal tree/start-path problems, already carrying their context.
    #[error("{0}")]
    Content(String),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("task join error: {0}")]
    TaskJoin(String),
}

/// Standard context suffix: ` (url: <sanitized>)`, ` (branch: <ref>)` /
/// ` (tag: <ref>)`, and ` | start path: <p>`.
pub(crate) fn context_suffix(url: &str, r: Option<&Ref>, start_path: Option<&str>) -> String {
    let mut out = format!(" (url: {url})");
    if let Some(r) = r {
        out.push_str(&format!(" ({}: {})", r.kind, r.shortname));
    }
    if let Some(start_path) = start_path
        && !start_path.is_empty()
    {
        out.push_str(&format!(" | start path: {start_path}"));
    }
    out
}
