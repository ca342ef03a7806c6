//! The aggregation pipeline: resolve sources, load repositories, select
//! refs, resolve start paths, read trees, and fold everything into
//! component-version buckets keyed by `(name, version)`.

use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::Semaphore;

use git::{
    CredentialStore, LoadedRepository, ManagerOptions, NetworkOptions, ProgressReporter, Ref,
    RefSelection, RepoRequest, RepositoryManager, TreeFile, TreeQuery, read_git_tree,
    read_worktree, select_refs,
};
use pattern::Pattern;
use utils::posix;

use crate::descriptor::{self, ComponentDesc, DESCRIPTOR_FILENAME, VersionValue};
use crate::error::{AggregateError, context_suffix};
use crate::events::{AggregateEvent, EventSink, SinkReporter, emit};
use crate::origin::{Origin, compute_origin};
use crate::playbook::Playbook;
use crate::source::{ResolvedSource, StartPathsSpec, VersionSpec, resolve_sources, sanitized};
use crate::{ComponentVersionBucket, FileSrc, FileStat, VirtualFile};

/// Aggregates the playbook's content sources into component-version
/// buckets. The order of buckets is unspecified; callers sort.
pub async fn aggregate_content(
    playbook: &Playbook,
) -> Result<Vec<ComponentVersionBucket>, AggregateError> {
    aggregate_content_with_events(playbook, None).await
}

pub async fn aggregate_content_with_events(
    playbook: &Playbook,
    sink: Option<EventSink>,
) -> Result<Vec<ComponentVersionBucket>, AggregateError> {
    let sources = resolve_sources(playbook)?;

    let credentials = match &playbook.git.credentials {
        Some(config) => CredentialStore::load(config.path.as_ref(), config.contents.as_deref()),
        None => CredentialStore::load(None, None),
    };
    let network = if playbook.network.is_unset() {
        NetworkOptions::from_env()
    } else {
        NetworkOptions {
            http_proxy: playbook.network.http_proxy.clone(),
            https_proxy: playbook.network.https_proxy.clone(),
            no_proxy: playbook.network.no_proxy.clone(),
        }
    };
    let progress: Option<Arc<dyn ProgressReporter>> = match (&sink, playbook.runtime.quiet) {
        (Some(sink), false) => Some(Arc::new(SinkReporter::new(sink.clone()))),
        _ => None,
    };
    let manager = RepositoryManager::new(ManagerOptions {
        cache_dir: cache_dir(playbook),
        fetch: playbook.runtime.fetch,
        fetch_concurrency: playbook.git.fetch_concurrency,
        ensure_git_suffix: playbook.git.ensure_git_suffix,
        plugins: playbook.git.plugins.clone(),
        credentials,
        network,
        progress,
    })?;

    let requests = sources
        .iter()
        .map(|source| RepoRequest {
            url: source.url.clone(),
            remote: source.remote.clone(),
            fetch_tags: !source.tags.is_empty(),
        })
        .collect();
    let repos = manager.load_all(requests).await?;

    let read_limit = Arc::new(Semaphore::new(playbook.git.read_concurrency.max(1)));
    let mut buckets: IndexMap<(String, String), ComponentVersionBucket> = IndexMap::new();

    for source in sources {
        let repo = repos
            .get(&source.url)
            .cloned()
            .ok_or_else(|| AggregateError::TaskJoin(format!("repository not loaded: {}", sanitized(&source.url))))?;
        let selection = RefSelection {
            branches: source.branches.clone(),
            tags: source.tags.clone(),
            worktrees: source.worktrees.clone(),
        };
        let refs = {
            let repo = repo.clone();
            tokio::task::spawn_blocking(move || select_refs(&repo, &selection))
                .await
                .map_err(|e| AggregateError::TaskJoin(e.to_string()))??
        };
        if refs.is_empty() {
            tracing::info!(url = %sanitized(&source.url), "no refs matched");
            emit(
                sink.as_ref(),
                AggregateEvent::NoRefsMatched {
                    url: sanitized(&source.url),
                    branches: source.branches.clone(),
                    tags: source.tags.clone(),
                },
            );
            continue;
        }

        // refs read concurrently under the read budget; awaiting in ref
        // order keeps origin discovery order deterministic
        let source = Arc::new(source);
        let mut handles = Vec::with_capacity(refs.len());
        for r in refs {
            let repo = repo.clone();
            let source = Arc::clone(&source);
            let semaphore = Arc::clone(&read_limit);
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| AggregateError::TaskJoin(e.to_string()))?;
                tokio::task::spawn_blocking(move || process_ref(&repo, &source, &r, sink.as_ref()))
                    .await
                    .map_err(|e| AggregateError::TaskJoin(e.to_string()))?
            }));
        }
        let mut first_error = None;
        for handle in handles {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(AggregateError::TaskJoin(e.to_string())));
            match outcome {
                Ok(batches) => {
                    if first_error.is_none() {
                        for batch in batches {
                            merge_bucket(&mut buckets, batch);
                        }
                    }
                }
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }
    }

    Ok(buckets.into_values().collect())
}

fn cache_dir(playbook: &Playbook) -> PathBuf {
    playbook.runtime.cache_dir.clone().unwrap_or_else(|| {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("antora")
    })
}

struct OriginBatch {
    name: String,
    version: String,
    origin: Arc<Origin>,
    files: Vec<VirtualFile>,
}

fn process_ref(
    repo: &LoadedRepository,
    source: &ResolvedSource,
    r: &Ref,
    sink: Option<&EventSink>,
) -> Result<Vec<OriginBatch>, AggregateError> {
    let url = &repo.url;
    repo.with_repo(|g| {
        let query = match &r.worktree_path {
            Some(worktree) => TreeQuery::for_worktree(worktree.clone()),
            None => TreeQuery::at_commit(g, &r.oid).map_err(|e| {
                AggregateError::Content(format!("{e}{}", context_suffix(url, Some(r), None)))
            })?,
        };
        let start_paths =
            crate::start_path::resolve_start_paths(&query, &source.start_paths).map_err(|e| {
                AggregateError::Config(format!("{e}{}", context_suffix(url, Some(r), None)))
            })?;
        if start_paths.is_empty() {
            if let StartPathsSpec::Patterns(patterns) = &source.start_paths {
                let joined = patterns.join(", ");
                tracing::info!(url = %url, refname = %r.shortname, "no start paths found in {joined}");
                emit(
                    sink,
                    AggregateEvent::NoStartPathsFound {
                        url: url.clone(),
                        refname: r.shortname.clone(),
                        patterns: patterns.clone(),
                    },
                );
            }
            return Ok(Vec::new());
        }

        let mut batches = Vec::with_capacity(start_paths.len());
        for start_path in start_paths {
            let descriptor_path = posix::join(&start_path, DESCRIPTOR_FILENAME);
            let bytes = query.read_file(&descriptor_path).ok_or_else(|| {
                AggregateError::Descriptor(format!(
                    "{DESCRIPTOR_FILENAME} not found{}",
                    context_suffix(url, Some(r), Some(&start_path))
                ))
            })?;
            let descriptor = descriptor::parse(&bytes).map_err(|e| {
                AggregateError::Descriptor(format!(
                    "{e}{}",
                    context_suffix(url, Some(r), Some(&start_path))
                ))
            })?;
            let version =
                effective_version(&descriptor, source.version.as_ref(), &r.shortname).map_err(
                    |message| {
                        AggregateError::Descriptor(format!(
                            "{message}{}",
                            context_suffix(url, Some(r), Some(&start_path))
                        ))
                    },
                )?;
            let name = descriptor.name.clone();
            let origin = Arc::new(compute_origin(repo, r, &start_path, &source.edit_url, descriptor));

            let tree_files = match &r.worktree_path {
                Some(worktree) => {
                    let scan = read_worktree(worktree, &start_path).map_err(|e| {
                        AggregateError::Content(tree_error_message(e, url, r, &start_path))
                    })?;
                    for (path, err) in &scan.dropped {
                        tracing::error!(url = %url, path = %path, "{err}");
                    }
                    scan.files
                }
                None => read_git_tree(g, &r.oid, &start_path).map_err(|e| {
                    AggregateError::Content(tree_error_message(e, url, r, &start_path))
                })?,
            };

            let files = tree_files
                .into_iter()
                .filter(|f| f.path != DESCRIPTOR_FILENAME)
                .map(|f| virtual_file(f, &origin, &start_path, r))
                .collect();
            batches.push(OriginBatch {
                name,
                version,
                origin,
                files,
            });
        }
        Ok(batches)
    })
}

/// Tree problems read as `<cause> in <url> (branch: <ref>)`, matching the
/// shape the per-file logs use.
fn tree_error_message(
    err: impl std::fmt::Display,
    url: &str,
    r: &Ref,
    start_path: &str,
) -> String {
    let mut message = format!("{err} in {url} ({}: {})", r.kind, r.shortname);
    if !start_path.is_empty() {
        message.push_str(&format!(" | start path: {start_path}"));
    }
    message
}

fn virtual_file(file: TreeFile, origin: &Arc<Origin>, start_path: &str, r: &Ref) -> VirtualFile {
    let abspath = r.worktree_path.as_ref().map(|worktree| {
        let base = if start_path.is_empty() {
            worktree.clone()
        } else {
            worktree.join(start_path)
        };
        base.join(&file.path).display().to_string()
    });
    let file_uri = origin
        .file_uri_pattern
        .as_ref()
        .map(|p| p.replace("%s", &file.path));
    let edit_url = origin
        .edit_url_pattern
        .as_ref()
        .map(|p| p.replace("%s", &file.path));
    VirtualFile {
        path: file.path.clone(),
        contents: file.contents,
        stat: FileStat {
            mode: file.mode,
            mtime: file.mtime,
            is_file: true,
        },
        src: FileSrc {
            path: file.path.clone(),
            relative: file.path.clone(),
            dirname: posix::dirname(&file.path).to_string(),
            basename: posix::basename(&file.path).to_string(),
            stem: posix::stem(&file.path).to_string(),
            extname: posix::extname(&file.path).to_string(),
            abspath,
            file_uri,
            edit_url,
            origin: Arc::clone(origin),
        },
    }
}

/// Applies the version derivation rules for one origin.
pub(crate) fn effective_version(
    descriptor: &ComponentDesc,
    source_version: Option<&VersionSpec>,
    shortname: &str,
) -> Result<String, String> {
    match &descriptor.version {
        VersionValue::Literal(version) => Ok(version.clone()),
        VersionValue::Empty => Ok(String::new()),
        VersionValue::Derive => version_from_source(source_version, shortname),
        VersionValue::Unset => match source_version {
            Some(_) => version_from_source(source_version, shortname),
            None => Err(format!(
                "{DESCRIPTOR_FILENAME} is missing a version and the content source defines none"
            )),
        },
    }
}

fn version_from_source(
    source_version: Option<&VersionSpec>,
    shortname: &str,
) -> Result<String, String> {
    let derived = match source_version {
        None | Some(VersionSpec::Derive) => shortname.to_string(),
        Some(VersionSpec::Literal(version)) => version.clone(),
        Some(VersionSpec::Map(entries)) => {
            let mut derived = None;
            for (pattern, replacement) in entries {
                let compiled = Pattern::compile(pattern).map_err(|e| e.to_string())?;
                if let Some(captures) = compiled.captures(shortname) {
                    derived = Some(captures.expand(replacement));
                    break;
                }
            }
            derived.unwrap_or_else(|| shortname.to_string())
        }
    };
    Ok(derived.replace('/', "-"))
}

fn merge_bucket(
    buckets: &mut IndexMap<(String, String), ComponentVersionBucket>,
    batch: OriginBatch,
) {
    let bucket = buckets
        .entry((batch.name.clone(), batch.version.clone()))
        .or_insert_with(|| ComponentVersionBucket {
            name: batch.name,
            version: batch.version,
            title: None,
            display_version: None,
            start_page: None,
            prerelease: None,
            asciidoc: None,
            nav: None,
            origins: Vec::new(),
            files: Vec::new(),
        });
    let descriptor = &batch.origin.descriptor;
    if descriptor.title.is_some() {
        bucket.title = descriptor.title.clone();
    }
    if descriptor.display_version.is_some() {
        bucket.display_version = descriptor.display_version.clone();
    }
    if descriptor.start_page.is_some() {
        bucket.start_page = descriptor.start_page.clone();
    }
    if descriptor.prerelease.is_some() {
        bucket.prerelease = descriptor.prerelease.clone();
    }
    // top-level last-wins; per-origin values stay on each origin's
    // descriptor and are never merged
    if descriptor.asciidoc.is_some() {
        bucket.asciidoc = descriptor.asciidoc.clone();
    }
    if bucket.nav.is_none()
        && let Some(nav) = &descriptor.nav
    {
        bucket.nav = Some(nav.clone());
    }
    bucket.origins.push(Arc::clone(&batch.origin));
    bucket.files.extend(batch.files);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::parse;

    #[test]
    fn version_pattern_map_first_match_wins() {
        let descriptor = parse(b"name: c\nversion: true\n").unwrap();
        let spec = VersionSpec::Map(vec![
            ("v(?<v>+({0..9}).+({0..9})).x".to_string(), "$<v>".to_string()),
            ("*".to_string(), "fallback".to_string()),
        ]);
        assert_eq!(
            effective_version(&descriptor, Some(&spec), "v2.1.x").unwrap(),
            "2.1"
        );
    }

    #[test]
    fn version_falls_back_to_shortname() {
        let descriptor = parse(b"name: c\nversion: true\n").unwrap();
        let spec = VersionSpec::Map(vec![("nope-*".to_string(), "x".to_string())]);
        assert_eq!(
            effective_version(&descriptor, Some(&spec), "v2.1").unwrap(),
            "v2.1"
        );
        assert_eq!(effective_version(&descriptor, None, "v2.1").unwrap(), "v2.1");
    }

    #[test]
    fn derived_slashes_become_dashes() {
        let descriptor = parse(b"name: c\nversion: true\n").unwrap();
        assert_eq!(
            effective_version(&descriptor, None, "feature/one").unwrap(),
            "feature-one"
        );
    }

    #[test]
    fn null_version_is_empty_string() {
        let descriptor = parse(b"name: c\nversion: ~\n").unwrap();
        assert_eq!(effective_version(&descriptor, None, "main").unwrap(), "");
    }

    #[test]
    fn missing_version_without_source_default_is_an_error() {
        let descriptor = parse(b"name: c\n").unwrap();
        let err = effective_version(&descriptor, None, "main").unwrap_err();
        assert!(err.contains("missing a version"));
    }

    #[test]
    fn missing_version_uses_source_value() {
        let descriptor = parse(b"name: c\n").unwrap();
        assert_eq!(
            effective_version(
                &descriptor,
                Some(&VersionSpec::Literal("9.9".into())),
                "main"
            )
            .unwrap(),
            "9.9"
        );
        assert_eq!(
            effective_version(&descriptor, Some(&VersionSpec::Derive), "v3").unwrap(),
            "v3"
        );
    }
}
