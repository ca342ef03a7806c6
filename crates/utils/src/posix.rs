//! POSIX path handling for repository-relative file paths. Every path that
//! leaves the aggregator uses `/` separators, carries no leading slash, and
//! has been checked against `..` escapes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("path '{0}' contains unsafe character sequences")]
    UnsafeSequence(String),
}

/// Strips leading, trailing, and duplicate slashes. The normal form of a
/// start path; an empty result means the repository root.
pub fn clean_start_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolves `.` and `..` segments. A `..` that would climb above the root
/// is rejected rather than clamped.
pub fn normalize(path: &str) -> Result<String, PathError> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(PathError::UnsafeSequence(path.to_string()));
                }
            }
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

pub fn join(base: &str, rel: &str) -> String {
    if base.is_empty() {
        rel.to_string()
    } else if rel.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{rel}")
    }
}

pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Extension including the dot, or empty. A leading dot alone (dotfile)
/// does not count as an extension.
pub fn extname(path: &str) -> &str {
    let name = basename(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[idx..],
        _ => "",
    }
}

pub fn stem(path: &str) -> &str {
    let name = basename(path);
    let ext = extname(path);
    &name[..name.len() - ext.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_start_paths() {
        assert_eq!(clean_start_path("/docs/"), "docs");
        assert_eq!(clean_start_path("docs//guides"), "docs/guides");
        assert_eq!(clean_start_path("/"), "");
        assert_eq!(clean_start_path("docs"), "docs");
    }

    #[test]
    fn normalizes_dot_segments() {
        assert_eq!(normalize("a/./b").unwrap(), "a/b");
        assert_eq!(normalize("a/b/../c").unwrap(), "a/c");
        assert_eq!(normalize("a//b").unwrap(), "a/b");
    }

    #[test]
    fn rejects_escaping_dotdot() {
        assert!(normalize("../a").is_err());
        assert!(normalize("a/../../b").is_err());
        let err = normalize("..").unwrap_err();
        assert!(err.to_string().contains("unsafe character sequences"));
    }

    #[test]
    fn path_parts() {
        assert_eq!(dirname("modules/ROOT/pages/index.adoc"), "modules/ROOT/pages");
        assert_eq!(basename("modules/ROOT/pages/index.adoc"), "index.adoc");
        assert_eq!(extname("pages/index.adoc"), ".adoc");
        assert_eq!(stem("pages/index.adoc"), "index");
        assert_eq!(extname("pages/.hidden"), "");
        assert_eq!(stem("pages/.hidden"), ".hidden");
        assert_eq!(dirname("top.adoc"), "");
    }

    #[test]
    fn joins() {
        assert_eq!(join("docs", "antora.yml"), "docs/antora.yml");
        assert_eq!(join("", "antora.yml"), "antora.yml");
        assert_eq!(join("docs", ""), "docs");
    }
}
