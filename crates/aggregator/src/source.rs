//! Source resolution: turns authored content-source entries into their
//! normal form — string-coerced pattern lists, trimmed start paths, local
//! URLs resolved against the playbook directory, and the version/edit-url
//! settings lifted into typed variants.

use git::WorktreeFilter;
use utils::{giturl, posix};

use crate::error::AggregateError;
use crate::playbook::{
    ContentSource, EditUrlSetting, Playbook, ScalarValue, StringOrList, VersionSetting,
    WorktreesSetting,
};

/// Branch patterns applied when neither the source nor the playbook supply
/// any.
pub const DEFAULT_BRANCHES: &[&str] = &["HEAD", "v{0..9}*"];

#[derive(Debug, Clone)]
pub enum StartPathsSpec {
    /// A single exact path; empty string means the repository root.
    Exact(String),
    /// Pattern list resolved against the directories at each ref.
    Patterns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum VersionSpec {
    Literal(String),
    /// `true`: derive from the ref shortname.
    Derive,
    /// refname pattern → replacement, first match wins.
    Map(Vec<(String, String)>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum EditUrlSpec {
    #[default]
    Default,
    Disabled,
    Template(String),
}

#[derive(Debug, Clone)]
pub struct ResolvedSource {
    /// Effective URL: an absolute filesystem path for local sources, the
    /// authored URL (credentials and all) for remotes.
    pub url: String,
    pub remote: Option<String>,
    pub branches: Vec<String>,
    pub tags: Vec<String>,
    pub start_paths: StartPathsSpec,
    pub worktrees: WorktreeFilter,
    pub version: Option<VersionSpec>,
    pub edit_url: EditUrlSpec,
    pub is_remote: bool,
}

pub fn resolve_sources(playbook: &Playbook) -> Result<Vec<ResolvedSource>, AggregateError> {
    playbook
        .content
        .sources
        .iter()
        .map(|source| resolve_source(playbook, source))
        .collect()
}

fn resolve_source(
    playbook: &Playbook,
    source: &ContentSource,
) -> Result<ResolvedSource, AggregateError> {
    if source.url.trim().is_empty() {
        return Err(AggregateError::Config(
            "content source is missing a url".to_string(),
        ));
    }

    let branches = source
        .branches
        .as_ref()
        .or(playbook.content.branches.as_ref())
        .map(to_string_list)
        .unwrap_or_else(|| DEFAULT_BRANCHES.iter().map(|s| s.to_string()).collect());
    let tags = source
        .tags
        .as_ref()
        .or(playbook.content.tags.as_ref())
        .map(to_string_list)
        .unwrap_or_default();

    let start_paths = match (&source.start_paths, &source.start_path) {
        (Some(patterns), _) => StartPathsSpec::Patterns(
            to_string_list(patterns)
                .into_iter()
                .map(|p| trim_start_path_pattern(&p))
                .collect(),
        ),
        (None, Some(path)) => {
            StartPathsSpec::Exact(posix::clean_start_path(&path.clone().into_string()))
        }
        (None, None) => StartPathsSpec::Exact(String::new()),
    };

    let worktrees = match &source.worktrees {
        None | Some(WorktreesSetting::Flag(false)) => WorktreeFilter::None,
        Some(WorktreesSetting::Flag(true)) => WorktreeFilter::All,
        Some(WorktreesSetting::Patterns(value)) => {
            let patterns = to_string_list(value);
            if patterns.is_empty() {
                WorktreeFilter::None
            } else if patterns.iter().any(|p| p == "*") {
                WorktreeFilter::All
            } else {
                WorktreeFilter::Patterns(patterns)
            }
        }
    };

    let version = match &source.version {
        None => None,
        Some(VersionSetting::Scalar(ScalarValue::Bool(true))) => Some(VersionSpec::Derive),
        Some(VersionSetting::Scalar(ScalarValue::Bool(false))) => {
            return Err(AggregateError::Config(format!(
                "invalid version: false (url: {})",
                sanitized(&source.url)
            )));
        }
        Some(VersionSetting::Scalar(scalar)) => {
            Some(VersionSpec::Literal(scalar.clone().into_string()))
        }
        Some(VersionSetting::Map(map)) => Some(VersionSpec::Map(
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        )),
    };

    let edit_url = match source.edit_url.as_ref().or(playbook.content.edit_url.as_ref()) {
        None | Some(EditUrlSetting::Toggle(true)) => EditUrlSpec::Default,
        Some(EditUrlSetting::Toggle(false)) => EditUrlSpec::Disabled,
        Some(EditUrlSetting::Template(template)) => EditUrlSpec::Template(template.clone()),
    };

    let is_remote = giturl::is_remote_url(&source.url);
    let url = if is_remote {
        source.url.clone()
    } else {
        giturl::resolve_local_path(&source.url, playbook.dir.as_deref())
            .to_string_lossy()
            .into_owned()
    };

    Ok(ResolvedSource {
        url,
        remote: source.remote.clone(),
        branches,
        tags,
        start_paths,
        worktrees,
        version,
        edit_url,
        is_remote,
    })
}

pub(crate) fn sanitized(url: &str) -> String {
    giturl::split_credentials(url).0
}

/// Start-path patterns keep their glob syntax but lose stray slashes.
fn trim_start_path_pattern(pattern: &str) -> String {
    let (negated, body) = match pattern.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };
    let trimmed = body
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    if negated {
        format!("!{trimmed}")
    } else {
        trimmed
    }
}

fn to_string_list(value: &StringOrList) -> Vec<String> {
    match value {
        StringOrList::One(scalar) => scalar_to_patterns(scalar),
        StringOrList::Many(values) => values.iter().flat_map(scalar_to_patterns).collect(),
    }
}

fn scalar_to_patterns(scalar: &ScalarValue) -> Vec<String> {
    match scalar {
        ScalarValue::Str(s) => split_patterns(s),
        other => vec![other.clone().into_string()],
    }
}

/// CSV splitting for pattern strings. Commas inside balanced braces belong
/// to the brace expression; when the string carries an unbalanced `{`, only
/// a comma immediately followed by whitespace separates entries.
pub(crate) fn split_patterns(value: &str) -> Vec<String> {
    let balanced = {
        let mut depth = 0i32;
        for c in value.chars() {
            match c {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                break;
            }
        }
        depth == 0
    };

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if balanced && depth == 0 => parts.push(std::mem::take(&mut current)),
            ',' if !balanced && chars.peek().is_some_and(|n| n.is_whitespace()) => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}
