//! Content aggregation: resolves a playbook's content sources into a
//! deduplicated, cross-referenced corpus of component versions, each
//! carrying every file required to render its documentation. Downstream
//! stages (xref resolution, edit URLs, sitemaps) depend on the origin
//! metadata emitted here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

pub mod collect;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod origin;
pub mod playbook;
pub mod source;
pub mod start_path;

pub use collect::{aggregate_content, aggregate_content_with_events};
pub use descriptor::{ComponentDesc, DESCRIPTOR_FILENAME, VersionValue};
pub use error::AggregateError;
pub use events::{AggregateEvent, EventSink};
pub use origin::{Origin, WorktreeValue};
pub use playbook::{ContentSource, Playbook};
pub use source::{ResolvedSource, StartPathsSpec, VersionSpec};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStat {
    pub mode: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<DateTime<Utc>>,
    pub is_file: bool,
}

/// Source metadata carried by every virtual file. `path` and `relative`
/// are identical POSIX paths relative to the start-path root.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSrc {
    pub path: String,
    pub relative: String,
    pub dirname: String,
    pub basename: String,
    pub stem: String,
    pub extname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abspath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_url: Option<String>,
    pub origin: Arc<Origin>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VirtualFile {
    pub path: String,
    #[serde(skip)]
    pub contents: Vec<u8>,
    pub stat: FileStat,
    pub src: FileSrc,
}

/// One `(component name, version)` bucket of the aggregate. `files` is the
/// union across origins; duplicates with the same `src.path` from
/// different origins coexist and are resolved downstream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentVersionBucket {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prerelease: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asciidoc: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav: Option<Vec<String>>,
    pub origins: Vec<Arc<Origin>>,
    pub files: Vec<VirtualFile>,
}
