//! Ref selection: enumerates a repository's branches and tags, applies the
//! source's include/exclude patterns, resolves `HEAD`/`.` tokens against the
//! current (possibly detached) checkout, and associates linked worktrees
//! with the refs they have checked out.

use std::path::PathBuf;

use git2::{BranchType, Repository};
use serde::Serialize;

use crate::manager::LoadedRepository;
use crate::GitError;
use pattern::{MatchOptions, PatternList};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Branch,
    Tag,
}

impl std::fmt::Display for RefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefKind::Branch => f.write_str("branch"),
            RefKind::Tag => f.write_str("tag"),
        }
    }
}

/// One selected ref, the unit the start-path resolver fans out over.
#[derive(Debug, Clone, PartialEq)]
pub struct Ref {
    pub kind: RefKind,
    pub shortname: String,
    pub fullname: String,
    pub oid: String,
    /// Set when a checked-out working tree (main or linked) provides this
    /// ref's files.
    pub worktree_path: Option<PathBuf>,
    pub remote_name: Option<String>,
}

/// Which linked worktrees a source honors. The main worktree of a local
/// repository is always used for its current branch.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum WorktreeFilter {
    #[default]
    None,
    All,
    Patterns(Vec<String>),
}

impl WorktreeFilter {
    fn allows(&self, basename: &str) -> Result<bool, GitError> {
        match self {
            WorktreeFilter::None => Ok(false),
            WorktreeFilter::All => Ok(true),
            WorktreeFilter::Patterns(patterns) => {
                let list = PatternList::compile(patterns, MatchOptions::default())?;
                Ok(list.matches(basename))
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefSelection {
    pub branches: Vec<String>,
    pub tags: Vec<String>,
    pub worktrees: WorktreeFilter,
}

struct CurrentHead {
    shortname: Option<String>,
    oid: Option<String>,
    detached: bool,
}

fn current_head(repo: &Repository) -> CurrentHead {
    let detached = repo.head_detached().unwrap_or(false);
    match repo.head() {
        Ok(head) => CurrentHead {
            shortname: if detached {
                None
            } else {
                head.shorthand().map(str::to_string)
            },
            oid: head.target().map(|o| o.to_string()),
            detached,
        },
        // unborn HEAD (fresh bare cache): fall back to the symbolic target
        Err(_) => match repo.find_reference("HEAD") {
            Ok(head) => CurrentHead {
                shortname: head
                    .symbolic_target()
                    .map(|t| t.strip_prefix("refs/heads/").unwrap_or(t).to_string()),
                oid: None,
                detached: false,
            },
            Err(_) => CurrentHead {
                shortname: None,
                oid: None,
                detached: false,
            },
        },
    }
}

/// Produces the sequence of refs selected by the source's branch and tag
/// patterns, in discovery order, deduplicated by `(kind, fullname)`.
pub fn select_refs(
    loaded: &LoadedRepository,
    selection: &RefSelection,
) -> Result<Vec<Ref>, GitError> {
    loaded.with_repo(|repo| select_refs_inner(loaded, repo, selection))
}

fn select_refs_inner(
    loaded: &LoadedRepository,
    repo: &Repository,
    selection: &RefSelection,
) -> Result<Vec<Ref>, GitError> {
    let head = current_head(repo);

    // `HEAD` and `.` stand for the current branch; a detached HEAD with a
    // worktree materializes the detached commit instead
    let mut branch_patterns: Vec<String> = Vec::new();
    let mut want_detached = false;
    for pattern in &selection.branches {
        if pattern == "HEAD" || pattern == "." {
            match &head.shortname {
                Some(name) => branch_patterns.push(name.clone()),
                None => want_detached = head.detached,
            }
        } else {
            branch_patterns.push(pattern.clone());
        }
    }

    let mut selected: Vec<Ref> = Vec::new();
    if want_detached
        && loaded.work_tree.is_some()
        && let Some(oid) = &head.oid
    {
        selected.push(Ref {
            kind: RefKind::Branch,
            shortname: "HEAD".to_string(),
            fullname: "HEAD".to_string(),
            oid: oid.clone(),
            worktree_path: loaded.work_tree.clone(),
            remote_name: None,
        });
    }

    if !branch_patterns.is_empty() {
        let matcher = PatternList::compile(&branch_patterns, MatchOptions::default())?;
        for candidate in branch_candidates(loaded, repo)? {
            if matcher.matches(&candidate.shortname)
                && !selected
                    .iter()
                    .any(|r| r.kind == RefKind::Branch && r.fullname == candidate.fullname)
            {
                selected.push(candidate);
            }
        }
    }

    if !selection.tags.is_empty() {
        let matcher = PatternList::compile(&selection.tags, MatchOptions::default())?;
        for name in repo.tag_names(None)?.iter().flatten() {
            if !matcher.matches(name) {
                continue;
            }
            let fullname = format!("refs/tags/{name}");
            if selected
                .iter()
                .any(|r| r.kind == RefKind::Tag && r.fullname == fullname)
            {
                continue;
            }
            if let Ok(reference) = repo.find_reference(&fullname)
                && let Ok(commit) = reference.peel_to_commit()
            {
                selected.push(Ref {
                    kind: RefKind::Tag,
                    shortname: name.to_string(),
                    fullname,
                    oid: commit.id().to_string(),
                    worktree_path: None,
                    remote_name: None,
                });
            }
        }
    }

    if loaded.work_tree.is_some() {
        attach_worktrees(loaded, &head, selection, &mut selected)?;
    }

    Ok(selected)
}

/// Branch candidates in discovery order. A bare repository prefers the
/// remote-tracked branches of its configured remote, falling back to local
/// heads when it has none; a repository with a worktree lists local heads
/// first and remote-tracked branches that don't shadow them.
fn branch_candidates(
    loaded: &LoadedRepository,
    repo: &Repository,
) -> Result<Vec<Ref>, GitError> {
    let mut locals: Vec<Ref> = Vec::new();
    for branch in repo.branches(Some(BranchType::Local))? {
        let (branch, _) = branch?;
        let Some(name) = branch.name()? else { continue };
        let Ok(commit) = branch.get().peel_to_commit() else {
            continue;
        };
        locals.push(Ref {
            kind: RefKind::Branch,
            shortname: name.to_string(),
            fullname: format!("refs/heads/{name}"),
            oid: commit.id().to_string(),
            worktree_path: None,
            remote_name: None,
        });
    }

    let remote_prefix = format!("{}/", loaded.remote_name);
    let mut remotes: Vec<Ref> = Vec::new();
    for branch in repo.branches(Some(BranchType::Remote))? {
        let (branch, _) = branch?;
        let Some(name) = branch.name()? else { continue };
        let Some(shortname) = name.strip_prefix(&remote_prefix) else {
            continue;
        };
        if shortname == "HEAD" {
            continue;
        }
        let Ok(commit) = branch.get().peel_to_commit() else {
            continue;
        };
        remotes.push(Ref {
            kind: RefKind::Branch,
            shortname: shortname.to_string(),
            fullname: format!("refs/remotes/{name}"),
            oid: commit.id().to_string(),
            worktree_path: None,
            remote_name: Some(loaded.remote_name.clone()),
        });
    }

    if loaded.is_bare() {
        if remotes.is_empty() {
            Ok(locals)
        } else {
            Ok(remotes)
        }
    } else {
        let mut candidates = locals;
        for remote in remotes {
            if !candidates.iter().any(|c| c.shortname == remote.shortname) {
                candidates.push(remote);
            }
        }
        Ok(candidates)
    }
}

fn attach_worktrees(
    loaded: &LoadedRepository,
    head: &CurrentHead,
    selection: &RefSelection,
    selected: &mut [Ref],
) -> Result<(), GitError> {
    // the main worktree always backs its current branch
    if let Some(current) = &head.shortname {
        for r in selected.iter_mut() {
            if r.kind == RefKind::Branch
                && &r.shortname == current
                && r.worktree_path.is_none()
            {
                r.worktree_path = loaded.work_tree.clone();
            }
        }
    }

    // linked worktrees: .git/worktrees/<name>/{HEAD,gitdir}
    let worktrees_dir = loaded.gitdir.join("worktrees");
    let entries = match std::fs::read_dir(&worktrees_dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };
    for entry in entries.flatten() {
        let meta_dir = entry.path();
        let Ok(head_contents) = std::fs::read_to_string(meta_dir.join("HEAD")) else {
            continue;
        };
        let Some(branch) = head_contents
            .trim()
            .strip_prefix("ref: ")
            .and_then(|r| r.strip_prefix("refs/heads/"))
        else {
            // detached linked worktrees are not associated with any ref
            continue;
        };
        let Ok(gitdir_contents) = std::fs::read_to_string(meta_dir.join("gitdir")) else {
            continue;
        };
        let Some(worktree_path) = PathBuf::from(gitdir_contents.trim())
            .parent()
            .map(PathBuf::from)
        else {
            continue;
        };
        let basename = worktree_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !selection.worktrees.allows(&basename)? {
            continue;
        }
        for r in selected.iter_mut() {
            if r.kind == RefKind::Branch && r.shortname == branch && r.worktree_path.is_none() {
                r.worktree_path = Some(worktree_path.clone());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PluginSet;
    use crate::manager::{ManagerOptions, NetworkOptions, RepoRequest, RepositoryManager};
    use crate::auth::CredentialStore;
    use std::path::Path;

    async fn load(path: &Path, cache: &Path) -> LoadedRepository {
        let manager = RepositoryManager::new(ManagerOptions {
            cache_dir: cache.to_path_buf(),
            fetch: false,
            fetch_concurrency: 1,
            ensure_git_suffix: true,
            plugins: PluginSet::default(),
            credentials: CredentialStore::default(),
            network: NetworkOptions::default(),
            progress: None,
        })
        .unwrap();
        let mut loaded = manager
            .load_all(vec![RepoRequest {
                url: path.to_string_lossy().into_owned(),
                remote: None,
                fetch_tags: false,
            }])
            .await
            .unwrap();
        loaded.shift_remove_index(0).unwrap().1
    }

    fn fixture_repo(path: &Path) -> Repository {
        let repo = Repository::init_opts(
            path,
            git2::RepositoryInitOptions::new()
                .initial_head("main")
                .mkdir(true),
        )
        .unwrap();
        {
            let sig = git2::Signature::now("Tester", "tester@example.org").unwrap();
            let tree_id = {
                let mut index = repo.index().unwrap();
                index.write_tree().unwrap()
            };
            let tree = repo.find_tree(tree_id).unwrap();
            let commit_id = repo
                .commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
                .unwrap();
            let commit = repo.find_commit(commit_id).unwrap();
            repo.branch("v1.2.3", &commit, false).unwrap();
            repo.branch("v2.0.x", &commit, false).unwrap();
            repo.tag_lightweight("v1.0.0", commit.as_object(), false)
                .unwrap();
            repo.tag_lightweight("rc-1", commit.as_object(), false)
                .unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn filters_branches_by_pattern() {
        let td = tempfile::TempDir::new().unwrap();
        let repo_path = td.path().join("repo");
        fixture_repo(&repo_path);
        let loaded = load(&repo_path, &td.path().join("cache")).await;

        let refs = select_refs(
            &loaded,
            &RefSelection {
                branches: vec!["v*".into()],
                ..Default::default()
            },
        )
        .unwrap();
        let names: Vec<&str> = refs.iter().map(|r| r.shortname.as_str()).collect();
        assert_eq!(names, ["v1.2.3", "v2.0.x"]);
        assert!(refs.iter().all(|r| r.kind == RefKind::Branch));
    }

    #[tokio::test]
    async fn head_token_resolves_current_branch() {
        let td = tempfile::TempDir::new().unwrap();
        let repo_path = td.path().join("repo");
        fixture_repo(&repo_path);
        let loaded = load(&repo_path, &td.path().join("cache")).await;

        let refs = select_refs(
            &loaded,
            &RefSelection {
                branches: vec!["HEAD".into()],
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].shortname, "main");
        // the main worktree backs the current branch
        assert!(refs[0].worktree_path.is_some());
    }

    #[tokio::test]
    async fn selects_tags_with_exclusions() {
        let td = tempfile::TempDir::new().unwrap();
        let repo_path = td.path().join("repo");
        fixture_repo(&repo_path);
        let loaded = load(&repo_path, &td.path().join("cache")).await;

        let refs = select_refs(
            &loaded,
            &RefSelection {
                tags: vec!["*".into(), "!rc-*".into()],
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].shortname, "v1.0.0");
        assert_eq!(refs[0].kind, RefKind::Tag);
        assert!(refs[0].oid.len() == 40);
    }

    #[tokio::test]
    async fn no_refs_selected_is_empty_not_error() {
        let td = tempfile::TempDir::new().unwrap();
        let repo_path = td.path().join("repo");
        fixture_repo(&repo_path);
        let loaded = load(&repo_path, &td.path().join("cache")).await;

        let refs = select_refs(
            &loaded,
            &RefSelection {
                branches: vec!["nomatch*".into()],
                ..Default::default()
            },
        )
        .unwrap();
        assert!(refs.is_empty());
    }

    #[tokio::test]
    async fn linked_worktree_attaches_to_selected_branch() {
        let td = tempfile::TempDir::new().unwrap();
        let repo_path = td.path().join("repo");
        let repo = fixture_repo(&repo_path);

        let wt_path = td.path().join("wt-v1");
        {
            let branch_ref = repo.find_reference("refs/heads/v1.2.3").unwrap();
            let mut opts = git2::WorktreeAddOptions::new();
            opts.reference(Some(&branch_ref));
            repo.worktree("wt-v1", &wt_path, Some(&opts)).unwrap();
        }

        let loaded = load(&repo_path, &td.path().join("cache")).await;
        let refs = select_refs(
            &loaded,
            &RefSelection {
                branches: vec!["v1.2.3".into()],
                worktrees: WorktreeFilter::All,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(
            refs[0].worktree_path.as_deref().and_then(|p| p.file_name()),
            wt_path.file_name()
        );

        // a filter that doesn't cover the worktree basename ignores it
        let refs = select_refs(
            &loaded,
            &RefSelection {
                branches: vec!["v1.2.3".into()],
                worktrees: WorktreeFilter::Patterns(vec!["other-*".into()]),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(refs[0].worktree_path.is_none());
    }
}
