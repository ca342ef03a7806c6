//! Playbook input types for the content aggregator. Parsing and validating
//! the playbook file belongs to the playbook loader; these types are the
//! contract it hands over, with serde defaults matching the documented
//! behavior when keys are omitted.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;

use git::PluginSet;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Playbook {
    pub content: ContentConfig,
    pub git: GitConfig,
    pub runtime: RuntimeConfig,
    pub network: NetworkConfig,
    /// Directory the playbook was loaded from; dot-relative content-source
    /// URLs resolve against it.
    #[serde(skip)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub sources: Vec<ContentSource>,
    /// Default branch patterns applied when a source omits `branches`.
    pub branches: Option<StringOrList>,
    /// Default tag patterns applied when a source omits `tags`.
    pub tags: Option<StringOrList>,
    pub edit_url: Option<EditUrlSetting>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub fetch_concurrency: usize,
    pub read_concurrency: usize,
    pub ensure_git_suffix: bool,
    pub credentials: Option<GitCredentialsConfig>,
    #[serde(skip)]
    pub plugins: PluginSet,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: 8,
            read_concurrency: 5,
            ensure_git_suffix: true,
            credentials: None,
            plugins: PluginSet::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GitCredentialsConfig {
    pub path: Option<PathBuf>,
    pub contents: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Defaults to `<user cache dir>/antora` when unset.
    pub cache_dir: Option<PathBuf>,
    pub fetch: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl NetworkConfig {
    pub fn is_unset(&self) -> bool {
        self.http_proxy.is_none() && self.https_proxy.is_none() && self.no_proxy.is_none()
    }
}

/// One content-source entry, as authored. Everything scalar-ish accepts the
/// usual YAML sloppiness (numbers and booleans where strings are meant,
/// CSV strings where lists are meant); normalization happens in the source
/// resolver.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContentSource {
    pub url: String,
    pub remote: Option<String>,
    pub branches: Option<StringOrList>,
    pub tags: Option<StringOrList>,
    pub start_path: Option<ScalarValue>,
    pub start_paths: Option<StringOrList>,
    pub worktrees: Option<WorktreesSetting>,
    pub version: Option<VersionSetting>,
    pub edit_url: Option<EditUrlSetting>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ScalarValue {
    pub fn into_string(self) -> String {
        match self {
            ScalarValue::Bool(b) => b.to_string(),
            ScalarValue::Int(n) => n.to_string(),
            // an integral float keeps its decimal point, so an unquoted
            // `version: 2.0` stays "2.0" rather than collapsing to "2"
            ScalarValue::Float(n) if n.is_finite() && n.fract() == 0.0 => format!("{n:.1}"),
            ScalarValue::Float(n) => n.to_string(),
            ScalarValue::Str(s) => s,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(ScalarValue),
    Many(Vec<ScalarValue>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WorktreesSetting {
    Flag(bool),
    Patterns(StringOrList),
}

/// `version: v1.2` pins, `version: true` derives from the refname, and a
/// mapping derives through refname patterns (first match wins).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VersionSetting {
    Scalar(ScalarValue),
    Map(IndexMap<String, String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EditUrlSetting {
    /// `true` restores the host default, `false` disables edit URLs.
    Toggle(bool),
    Template(String),
}
