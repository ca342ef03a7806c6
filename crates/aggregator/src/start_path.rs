//! Start-path resolution against the tree at a ref. An exact start path
//! must exist (and be a directory); pattern lists expand braces first,
//! treat non-matching globs as silent skips, error on missing literals,
//! and honor negated entries by removing previously matched paths.

use git::TreeQuery;
use pattern::{MatchOptions, Pattern, expand_braces, has_magic};
use thiserror::Error;

use crate::source::StartPathsSpec;
use utils::posix;

#[derive(Debug, Error)]
pub enum StartPathError {
    #[error("start path '{0}' does not exist")]
    Missing(String),
    #[error("start path '{0}' is not a directory")]
    NotDirectory(String),
    #[error("path '{0}' contains unsafe character sequences")]
    Unsafe(String),
    #[error(transparent)]
    Pattern(#[from] pattern::PatternError),
}

const PATH_OPTIONS: MatchOptions = MatchOptions {
    require_literal_leading_dot: true,
};

/// Resolves the source's start paths against `query`. An empty result for
/// a pattern list is not an error; the caller reports it as info.
pub fn resolve_start_paths(
    query: &TreeQuery<'_>,
    spec: &StartPathsSpec,
) -> Result<Vec<String>, StartPathError> {
    match spec {
        StartPathsSpec::Exact(path) => {
            let path = safe_path(path)?;
            if query.is_dir(&path) {
                Ok(vec![path])
            } else if query.is_file(&path) {
                Err(StartPathError::NotDirectory(path))
            } else {
                Err(StartPathError::Missing(path))
            }
        }
        StartPathsSpec::Patterns(patterns) => {
            let dirs = query.list_dirs();
            let mut matched: Vec<String> = Vec::new();
            for raw in patterns {
                let (negated, body) = match raw.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, raw.as_str()),
                };
                for entry in expand_braces(body) {
                    if entry.is_empty() || entry == "." {
                        if negated {
                            matched.retain(|m| !m.is_empty());
                        } else if !matched.iter().any(String::is_empty) {
                            matched.push(String::new());
                        }
                        continue;
                    }
                    if !has_magic(&entry) {
                        let entry = safe_path(&entry)?;
                        if negated {
                            matched.retain(|m| *m != entry);
                        } else if matched.contains(&entry) {
                            // already collected by an earlier entry
                        } else if query.is_dir(&entry) {
                            matched.push(entry);
                        } else if query.is_file(&entry) {
                            return Err(StartPathError::NotDirectory(entry));
                        } else {
                            return Err(StartPathError::Missing(entry));
                        }
                        continue;
                    }
                    let compiled = Pattern::compile_with(&entry, PATH_OPTIONS)?;
                    if negated {
                        matched.retain(|m| !compiled.matches(m));
                    } else {
                        // a glob that matches nothing is skipped silently
                        for dir in &dirs {
                            if compiled.matches(dir) && !matched.contains(dir) {
                                matched.push(dir.clone());
                            }
                        }
                    }
                }
            }
            Ok(matched)
        }
    }
}

fn safe_path(path: &str) -> Result<String, StartPathError> {
    posix::normalize(path).map_err(|_| StartPathError::Unsafe(path.to_string()))
}
