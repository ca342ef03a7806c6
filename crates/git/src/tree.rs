//! Tree reading for a `(ref, start path)` pair. Two modes: a checked-out
//! worktree read from disk, and a git tree walked through the object
//! database. Symlink resolution is owned here in both modes — an explicit
//! readlink/stat hop loop that records every hop, so cycles are detected
//! with the sequence the OS primitives won't give us. Directory symlinks
//! are expanded in place: the walker enters the target but emitted paths
//! keep the symlink location.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::{Oid, Repository, Tree};
use thiserror::Error;

use utils::posix;

const FILEMODE_TREE: i32 = 0o40000;
const FILEMODE_BLOB: i32 = 0o100644;
const FILEMODE_BLOB_GROUP_WRITABLE: i32 = 0o100664;
const FILEMODE_BLOB_EXECUTABLE: i32 = 0o100755;
const FILEMODE_LINK: i32 = 0o120000;

// Applied to the synthetic mode of files read out of a git tree.
const DEFAULT_UMASK: u32 = 0o022;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("ELOOP: symbolic link cycle, {from} -> {to}")]
    SymlinkCycle { from: String, to: String },
    #[error("ENOENT: broken symbolic link, {from} -> {to}")]
    BrokenSymlink { from: String, to: String },
    #[error("path '{0}' contains unsafe character sequences")]
    UnsafeSequence(String),
    #[error("start path '{0}' does not exist")]
    StartPathMissing(String),
    #[error("start path '{0}' is not a directory")]
    StartPathNotDirectory(String),
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One file produced by the tree reader. `path` is POSIX, relative to the
/// start path, and never contains dot or tilde segments.
#[derive(Debug, Clone)]
pub struct TreeFile {
    pub path: String,
    pub contents: Vec<u8>,
    pub mode: u32,
    pub mtime: Option<DateTime<Utc>>,
}

/// Worktree reads tolerate per-file failures: a broken link or unreadable
/// file is dropped and reported, the rest of the tree still loads.
#[derive(Debug, Default)]
pub struct WorktreeScan {
    pub files: Vec<TreeFile>,
    pub dropped: Vec<(String, TreeError)>,
}

fn excluded(name: &str) -> bool {
    name.starts_with('.') || name.ends_with('~')
}

fn git_file_mode(executable: bool) -> u32 {
    if cfg!(windows) || !executable {
        0o100666 & !DEFAULT_UMASK
    } else {
        0o100777 & !DEFAULT_UMASK
    }
}

#[cfg(unix)]
fn os_file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn os_file_mode(_metadata: &std::fs::Metadata) -> u32 {
    git_file_mode(false)
}

/// Lexical normalization of an absolute filesystem path (`.`/`..` folded
/// without touching the disk), used while following symlink hops.
fn normalize_abs(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Reads every file under `start_path` of a checked-out worktree.
pub fn read_worktree(worktree: &Path, start_path: &str) -> Result<WorktreeScan, TreeError> {
    let root = if start_path.is_empty() {
        worktree.to_path_buf()
    } else {
        worktree.join(start_path)
    };
    match std::fs::metadata(&root) {
        Err(_) => return Err(TreeError::StartPathMissing(start_path.to_string())),
        Ok(meta) if !meta.is_dir() => {
            return Err(TreeError::StartPathNotDirectory(start_path.to_string()));
        }
        Ok(_) => {}
    }
    let mut scan = WorktreeScan::default();
    let mut entered = vec![std::fs::canonicalize(&root).unwrap_or_else(|_| root.clone())];
    walk_disk(&root, "", &mut scan, &mut entered);
    scan.files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(scan)
}

fn walk_disk(dir: &Path, rel: &str, scan: &mut WorktreeScan, entered: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            scan.dropped.push((rel.to_string(), TreeError::Io(err)));
            return;
        }
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();

    for name in names {
        if excluded(&name) {
            continue;
        }
        let abs = dir.join(&name);
        let rel_path = posix::join(rel, &name);
        let metadata = match std::fs::symlink_metadata(&abs) {
            Ok(metadata) => metadata,
            Err(err) => {
                scan.dropped.push((rel_path, TreeError::Io(err)));
                continue;
            }
        };
        if metadata.file_type().is_symlink() {
            match resolve_disk_symlink(&abs, &rel_path) {
                Ok((target, target_meta)) => {
                    if target_meta.is_dir() {
                        // a directory link that leads back into the walk is a cycle
                        let identity =
                            std::fs::canonicalize(&target).unwrap_or_else(|_| target.clone());
                        if entered.contains(&identity) {
                            let err = TreeError::SymlinkCycle {
                                from: rel_path.clone(),
                                to: target.to_string_lossy().into_owned(),
                            };
                            tracing::error!(path = %rel_path, %err, "dropping directory link");
                            scan.dropped.push((rel_path, err));
                            continue;
                        }
                        entered.push(identity);
                        walk_disk(&target, &rel_path, scan, entered);
                        entered.pop();
                    } else if target_meta.is_file() {
                        emit_disk_file(&target, rel_path, &target_meta, scan);
                    }
                }
                Err(err) => {
                    tracing::error!(path = %rel_path, %err, "dropping file");
                    scan.dropped.push((rel_path, err));
                }
            }
        } else if metadata.is_dir() {
            walk_disk(&abs, &rel_path, scan, entered);
        } else if metadata.is_file() {
            emit_disk_file(&abs, rel_path, &metadata, scan);
        }
    }
}

fn emit_disk_file(
    abs: &Path,
    rel_path: String,
    metadata: &std::fs::Metadata,
    scan: &mut WorktreeScan,
) {
    match std::fs::read(abs) {
        Ok(contents) => scan.files.push(TreeFile {
            path: rel_path,
            contents,
            mode: os_file_mode(metadata),
            mtime: metadata.modified().ok().map(DateTime::<Utc>::from),
        }),
        Err(err) => {
            tracing::error!(path = %rel_path, %err, "dropping unreadable file");
            scan.dropped.push((rel_path, TreeError::Io(err)));
        }
    }
}

/// Follows a chain of filesystem symlinks to its non-link target, recording
/// each hop. Targets may escape the start path and the worktree; they are
/// resolved against the real filesystem.
fn resolve_disk_symlink(
    link: &Path,
    rel_display: &str,
) -> Result<(PathBuf, std::fs::Metadata), TreeError> {
    let mut hops: Vec<PathBuf> = Vec::new();
    let mut first_target: Option<String> = None;
    let mut current = link.to_path_buf();
    loop {
        if hops.contains(&current) {
            return Err(TreeError::SymlinkCycle {
                from: rel_display.to_string(),
                to: first_target.unwrap_or_default(),
            });
        }
        let target = std::fs::read_link(&current)?;
        if first_target.is_none() {
            first_target = Some(target.to_string_lossy().into_owned());
        }
        hops.push(current.clone());
        let resolved = normalize_abs(
            &current
                .parent()
                .unwrap_or_else(|| Path::new("/"))
                .join(&target),
        );
        match std::fs::symlink_metadata(&resolved) {
            Err(_) => {
                return Err(TreeError::BrokenSymlink {
                    from: rel_display.to_string(),
                    to: target.to_string_lossy().into_owned(),
                });
            }
            Ok(metadata) if metadata.file_type().is_symlink() => current = resolved,
            Ok(metadata) => return Ok((resolved, metadata)),
        }
    }
}

/// Reads every file under `start_path` of the tree at `commit_oid`. Any
/// symlink problem is fatal here; there is no worktree to fall back on.
pub fn read_git_tree(
    repo: &Repository,
    commit_oid: &str,
    start_path: &str,
) -> Result<Vec<TreeFile>, TreeError> {
    let commit = repo.find_commit(Oid::from_str(commit_oid)?)?;
    let root = commit.tree()?;
    let start = tree_at(repo, &root, start_path)?;
    let mut files = Vec::new();
    walk_git(repo, &root, &start, "", start_path, &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn tree_at<'r>(
    repo: &'r Repository,
    root: &Tree<'r>,
    start_path: &str,
) -> Result<Tree<'r>, TreeError> {
    if start_path.is_empty() {
        return Ok(repo.find_tree(root.id())?);
    }
    let entry = root
        .get_path(Path::new(start_path))
        .map_err(|_| TreeError::StartPathMissing(start_path.to_string()))?;
    if entry.filemode() != FILEMODE_TREE {
        return Err(TreeError::StartPathNotDirectory(start_path.to_string()));
    }
    Ok(repo.find_tree(entry.id())?)
}

fn walk_git(
    repo: &Repository,
    root: &Tree<'_>,
    tree: &Tree<'_>,
    rel: &str,
    repo_dir: &str,
    files: &mut Vec<TreeFile>,
) -> Result<(), TreeError> {
    for entry in tree.iter() {
        let Some(name) = entry.name() else { continue };
        if excluded(name) {
            continue;
        }
        let rel_path = posix::join(rel, name);
        let repo_path = posix::join(repo_dir, name);
        match entry.filemode() {
            FILEMODE_TREE => {
                let subtree = repo.find_tree(entry.id())?;
                walk_git(repo, root, &subtree, &rel_path, &repo_path, files)?;
            }
            FILEMODE_LINK => {
                let (oid, filemode) = resolve_git_symlink(repo, root, &repo_path, &rel_path)?;
                if filemode == FILEMODE_TREE {
                    let subtree = repo.find_tree(oid)?;
                    walk_git(repo, root, &subtree, &rel_path, &repo_path, files)?;
                } else {
                    let blob = repo.find_blob(oid)?;
                    files.push(TreeFile {
                        path: rel_path,
                        contents: blob.content().to_vec(),
                        mode: git_file_mode(filemode == FILEMODE_BLOB_EXECUTABLE),
                        mtime: None,
                    });
                }
            }
            FILEMODE_BLOB | FILEMODE_BLOB_GROUP_WRITABLE | FILEMODE_BLOB_EXECUTABLE => {
                let blob = repo.find_blob(entry.id())?;
                files.push(TreeFile {
                    path: rel_path,
                    contents: blob.content().to_vec(),
                    mode: git_file_mode(entry.filemode() == FILEMODE_BLOB_EXECUTABLE),
                    mtime: None,
                });
            }
            // submodules and anything exotic
            _ => {}
        }
    }
    Ok(())
}

/// Follows a chain of in-tree symlinks. Targets resolve against the
/// repository root; escaping the repository makes the link broken.
fn resolve_git_symlink(
    repo: &Repository,
    root: &Tree<'_>,
    link_repo_path: &str,
    rel_display: &str,
) -> Result<(Oid, i32), TreeError> {
    let mut hops: Vec<String> = Vec::new();
    let mut first_target: Option<String> = None;
    let mut last_target: Option<String> = None;
    let mut current = link_repo_path.to_string();
    loop {
        if hops.contains(&current) {
            return Err(TreeError::SymlinkCycle {
                from: rel_display.to_string(),
                to: first_target.unwrap_or_default(),
            });
        }
        let entry = match root.get_path(Path::new(&current)) {
            Ok(entry) => entry,
            Err(_) => {
                return Err(TreeError::BrokenSymlink {
                    from: rel_display.to_string(),
                    to: last_target.unwrap_or_else(|| current.clone()),
                });
            }
        };
        if entry.filemode() != FILEMODE_LINK {
            return Ok((entry.id(), entry.filemode()));
        }
        let blob = repo.find_blob(entry.id())?;
        let target = String::from_utf8_lossy(blob.content()).into_owned();
        if first_target.is_none() {
            first_target = Some(target.clone());
        }
        last_target = Some(target.clone());
        hops.push(current.clone());
        if target.starts_with('/') {
            return Err(TreeError::BrokenSymlink {
                from: rel_display.to_string(),
                to: target,
            });
        }
        let joined = posix::join(posix::dirname(&current), &target);
        match posix::normalize(&joined) {
            Ok(resolved) => current = resolved,
            // the target climbs out of the repository
            Err(_) => return Err(TreeError::UnsafeSequence(joined)),
        }
    }
}

/// Existence and listing queries against the filesystem view at a ref,
/// used by start-path resolution and descriptor loading.
pub enum TreeQuery<'a> {
    Git {
        repo: &'a Repository,
        root: Tree<'a>,
    },
    Dir {
        root: PathBuf,
    },
}

impl<'a> TreeQuery<'a> {
    pub fn at_commit(repo: &'a Repository, commit_oid: &str) -> Result<Self, TreeError> {
        let commit = repo.find_commit(Oid::from_str(commit_oid)?)?;
        Ok(TreeQuery::Git {
            repo,
            root: commit.tree()?,
        })
    }

    pub fn for_worktree(root: PathBuf) -> Self {
        TreeQuery::Dir { root }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        if path.is_empty() {
            return true;
        }
        match self {
            TreeQuery::Git { root, .. } => root
                .get_path(Path::new(path))
                .is_ok_and(|entry| entry.filemode() == FILEMODE_TREE),
            TreeQuery::Dir { root } => root.join(path).is_dir(),
        }
    }

    pub fn is_file(&self, path: &str) -> bool {
        match self {
            TreeQuery::Git { root, .. } => root.get_path(Path::new(path)).is_ok_and(|entry| {
                matches!(
                    entry.filemode(),
                    FILEMODE_BLOB | FILEMODE_BLOB_GROUP_WRITABLE | FILEMODE_BLOB_EXECUTABLE
                )
            }),
            TreeQuery::Dir { root } => root.join(path).is_file(),
        }
    }

    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        match self {
            TreeQuery::Git { repo, root } => {
                let entry = root.get_path(Path::new(path)).ok()?;
                let blob = repo.find_blob(entry.id()).ok()?;
                Some(blob.content().to_vec())
            }
            TreeQuery::Dir { root } => std::fs::read(root.join(path)).ok(),
        }
    }

    /// Every directory path in the tree (POSIX, sorted), for glob-style
    /// start-path expansion. The `.git` directory never appears.
    pub fn list_dirs(&self) -> Vec<String> {
        let mut dirs = Vec::new();
        match self {
            TreeQuery::Git { repo, root } => {
                fn collect(
                    repo: &Repository,
                    tree: &Tree<'_>,
                    prefix: &str,
                    dirs: &mut Vec<String>,
                ) {
                    for entry in tree.iter() {
                        let Some(name) = entry.name() else { continue };
                        if entry.filemode() != FILEMODE_TREE {
                            continue;
                        }
                        let path = posix::join(prefix, name);
                        if let Ok(subtree) = repo.find_tree(entry.id()) {
                            collect(repo, &subtree, &path, dirs);
                        }
                        dirs.push(path);
                    }
                }
                collect(repo, root, "", &mut dirs);
            }
            TreeQuery::Dir { root } => {
                fn collect(dir: &Path, prefix: &str, dirs: &mut Vec<String>) {
                    let Ok(entries) = std::fs::read_dir(dir) else {
                        return;
                    };
                    for entry in entries.flatten() {
                        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                            continue;
                        };
                        if name == ".git" {
                            continue;
                        }
                        let path_abs = entry.path();
                        if !path_abs.is_dir() {
                            continue;
                        }
                        let path = posix::join(prefix, &name);
                        collect(&path_abs, &path, dirs);
                        dirs.push(path);
                    }
                }
                collect(root, "", &mut dirs);
            }
        }
        dirs.sort();
        dirs
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit_tree(repo: &Repository, builder: impl FnOnce(&Repository) -> Oid) -> String {
        let tree_id = builder(repo);
        let sig = git2::Signature::now("Tester", "tester@example.org").unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "fixture", &tree, &[])
            .unwrap()
            .to_string()
    }

    fn blob(repo: &Repository, contents: &str) -> Oid {
        repo.blob(contents.as_bytes()).unwrap()
    }

    #[test]
    fn git_tree_walk_is_sorted_and_filtered() {
        let td = tempfile::TempDir::new().unwrap();
        let repo = Repository::init_opts(
            td.path(),
            git2::RepositoryInitOptions::new().initial_head("main").bare(true),
        )
        .unwrap();
        let oid = commit_tree(&repo, |repo| {
            let page = blob(repo, "= Page One");
            let other = blob(repo, "= Page Two");
            let hidden = blob(repo, "hidden");
            let backup = blob(repo, "backup");

            let mut pages = repo.treebuilder(None).unwrap();
            pages.insert("page-one.adoc", page, FILEMODE_BLOB).unwrap();
            pages.insert("page-two.adoc", other, FILEMODE_BLOB).unwrap();
            pages.insert(".hidden.adoc", hidden, FILEMODE_BLOB).unwrap();
            pages.insert("draft.adoc~", backup, FILEMODE_BLOB).unwrap();
            let pages = pages.write().unwrap();

            let mut docs = repo.treebuilder(None).unwrap();
            docs.insert("pages", pages, FILEMODE_TREE).unwrap();
            let docs = docs.write().unwrap();

            let mut root = repo.treebuilder(None).unwrap();
            root.insert("docs", docs, FILEMODE_TREE).unwrap();
            root.write().unwrap()
        });

        let files = read_git_tree(&repo, &oid, "docs").unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["pages/page-one.adoc", "pages/page-two.adoc"]);
        assert_eq!(files[0].contents, b"= Page One");
        assert_eq!(files[0].mode, 0o100644);
        assert!(files[0].mtime.is_none());
    }

    #[test]
    fn git_tree_executable_mode() {
        let td = tempfile::TempDir::new().unwrap();
        let repo = Repository::init_opts(
            td.path(),
            git2::RepositoryInitOptions::new().initial_head("main").bare(true),
        )
        .unwrap();
        let oid = commit_tree(&repo, |repo| {
            let script = blob(repo, "#!/bin/sh\n");
            let mut root = repo.treebuilder(None).unwrap();
            root.insert("run.sh", script, FILEMODE_BLOB_EXECUTABLE).unwrap();
            root.write().unwrap()
        });
        let files = read_git_tree(&repo, &oid, "").unwrap();
        assert_eq!(files[0].mode, 0o100755);
    }

    #[test]
    fn git_tree_symlink_resolves_to_target_contents() {
        let td = tempfile::TempDir::new().unwrap();
        let repo = Repository::init_opts(
            td.path(),
            git2::RepositoryInitOptions::new().initial_head("main").bare(true),
        )
        .unwrap();
        let oid = commit_tree(&repo, |repo| {
            let target = blob(repo, "= Target");
            let link = blob(repo, "target.adoc");
            let mut pages = repo.treebuilder(None).unwrap();
            pages.insert("target.adoc", target, FILEMODE_BLOB).unwrap();
            pages.insert("alias.adoc", link, FILEMODE_LINK).unwrap();
            let pages = pages.write().unwrap();
            let mut root = repo.treebuilder(None).unwrap();
            root.insert("pages", pages, FILEMODE_TREE).unwrap();
            root.write().unwrap()
        });
        let files = read_git_tree(&repo, &oid, "").unwrap();
        let alias = files.iter().find(|f| f.path == "pages/alias.adoc").unwrap();
        assert_eq!(alias.contents, b"= Target");
    }

    #[test]
    fn git_tree_broken_symlink_is_fatal() {
        let td = tempfile::TempDir::new().unwrap();
        let repo = Repository::init_opts(
            td.path(),
            git2::RepositoryInitOptions::new().initial_head("main").bare(true),
        )
        .unwrap();
        let oid = commit_tree(&repo, |repo| {
            let link = blob(repo, "target.adoc");
            let mut pages = repo.treebuilder(None).unwrap();
            pages.insert("symlink.adoc", link, FILEMODE_LINK).unwrap();
            let pages = pages.write().unwrap();
            let mut root = repo.treebuilder(None).unwrap();
            root.insert("pages", pages, FILEMODE_TREE).unwrap();
            root.write().unwrap()
        });
        let err = read_git_tree(&repo, &oid, "").unwrap_err();
        assert_eq!(
            err.to_string(),
            "ENOENT: broken symbolic link, pages/symlink.adoc -> target.adoc"
        );
    }

    #[test]
    fn git_tree_symlink_escaping_repository_is_unsafe() {
        let td = tempfile::TempDir::new().unwrap();
        let repo = Repository::init_opts(
            td.path(),
            git2::RepositoryInitOptions::new().initial_head("main").bare(true),
        )
        .unwrap();
        let oid = commit_tree(&repo, |repo| {
            let link = blob(repo, "../../outside.adoc");
            let mut pages = repo.treebuilder(None).unwrap();
            pages.insert("escape.adoc", link, FILEMODE_LINK).unwrap();
            let pages = pages.write().unwrap();
            let mut root = repo.treebuilder(None).unwrap();
            root.insert("pages", pages, FILEMODE_TREE).unwrap();
            root.write().unwrap()
        });
        let err = read_git_tree(&repo, &oid, "").unwrap_err();
        assert!(matches!(err, TreeError::UnsafeSequence(_)));
        assert!(err.to_string().contains("contains unsafe character sequences"));
    }

    #[test]
    fn git_tree_symlink_cycle_is_fatal() {
        let td = tempfile::TempDir::new().unwrap();
        let repo = Repository::init_opts(
            td.path(),
            git2::RepositoryInitOptions::new().initial_head("main").bare(true),
        )
        .unwrap();
        let oid = commit_tree(&repo, |repo| {
            let a = blob(repo, "b.adoc");
            let b = blob(repo, "a.adoc");
            let mut root = repo.treebuilder(None).unwrap();
            root.insert("a.adoc", a, FILEMODE_LINK).unwrap();
            root.insert("b.adoc", b, FILEMODE_LINK).unwrap();
            root.write().unwrap()
        });
        let err = read_git_tree(&repo, &oid, "").unwrap_err();
        assert!(matches!(err, TreeError::SymlinkCycle { .. }));
        assert!(err.to_string().starts_with("ELOOP: symbolic link cycle"));
    }

    #[test]
    fn git_tree_missing_start_path() {
        let td = tempfile::TempDir::new().unwrap();
        let repo = Repository::init_opts(
            td.path(),
            git2::RepositoryInitOptions::new().initial_head("main").bare(true),
        )
        .unwrap();
        let oid = commit_tree(&repo, |repo| {
            let mut root = repo.treebuilder(None).unwrap();
            let page = blob(repo, "x");
            root.insert("readme.adoc", page, FILEMODE_BLOB).unwrap();
            root.write().unwrap()
        });
        let err = read_git_tree(&repo, &oid, "docs").unwrap_err();
        assert_eq!(err.to_string(), "start path 'docs' does not exist");
    }

    #[cfg(unix)]
    mod disk {
        use super::super::*;
        use std::os::unix::fs::symlink;

        fn fixture(td: &Path) {
            std::fs::create_dir_all(td.join("docs/pages")).unwrap();
            std::fs::write(td.join("docs/pages/page-one.adoc"), "= Page One").unwrap();
            std::fs::write(td.join("docs/pages/draft.adoc~"), "backup").unwrap();
            std::fs::write(td.join("docs/.hidden"), "hidden").unwrap();
        }

        #[test]
        fn worktree_walk_reads_files_with_stat() {
            let td = tempfile::TempDir::new().unwrap();
            fixture(td.path());
            let scan = read_worktree(td.path(), "docs").unwrap();
            let paths: Vec<&str> = scan.files.iter().map(|f| f.path.as_str()).collect();
            assert_eq!(paths, ["pages/page-one.adoc"]);
            assert!(scan.files[0].mtime.is_some());
            assert_eq!(scan.files[0].mode & 0o170000, 0o100000);
            assert!(scan.dropped.is_empty());
        }

        #[test]
        fn worktree_symlink_chain_resolves() {
            let td = tempfile::TempDir::new().unwrap();
            fixture(td.path());
            symlink("page-one.adoc", td.path().join("docs/pages/alias.adoc")).unwrap();
            symlink("alias.adoc", td.path().join("docs/pages/alias2.adoc")).unwrap();
            let scan = read_worktree(td.path(), "docs").unwrap();
            let alias = scan
                .files
                .iter()
                .find(|f| f.path == "pages/alias2.adoc")
                .unwrap();
            assert_eq!(alias.contents, b"= Page One");
        }

        #[test]
        fn worktree_directory_symlink_expands_at_link_location() {
            let td = tempfile::TempDir::new().unwrap();
            fixture(td.path());
            symlink(td.path().join("docs/pages"), td.path().join("docs/linked")).unwrap();
            let scan = read_worktree(td.path(), "docs").unwrap();
            let paths: Vec<&str> = scan.files.iter().map(|f| f.path.as_str()).collect();
            assert_eq!(paths, ["linked/page-one.adoc", "pages/page-one.adoc"]);
        }

        #[test]
        fn worktree_broken_symlink_is_dropped_not_fatal() {
            let td = tempfile::TempDir::new().unwrap();
            fixture(td.path());
            symlink("missing.adoc", td.path().join("docs/pages/dead.adoc")).unwrap();
            let scan = read_worktree(td.path(), "docs").unwrap();
            assert_eq!(scan.files.len(), 1);
            assert_eq!(scan.dropped.len(), 1);
            let (path, err) = &scan.dropped[0];
            assert_eq!(path, "pages/dead.adoc");
            assert_eq!(
                err.to_string(),
                "ENOENT: broken symbolic link, pages/dead.adoc -> missing.adoc"
            );
        }

        #[test]
        fn worktree_symlink_cycle_is_dropped_with_eloop() {
            let td = tempfile::TempDir::new().unwrap();
            fixture(td.path());
            symlink("loop-b.adoc", td.path().join("docs/pages/loop-a.adoc")).unwrap();
            symlink("loop-a.adoc", td.path().join("docs/pages/loop-b.adoc")).unwrap();
            let scan = read_worktree(td.path(), "docs").unwrap();
            assert_eq!(scan.dropped.len(), 2);
            assert!(scan.dropped[0].1.to_string().starts_with("ELOOP"));
        }

        #[test]
        fn worktree_symlink_may_escape_start_path() {
            let td = tempfile::TempDir::new().unwrap();
            fixture(td.path());
            std::fs::write(td.path().join("outside.adoc"), "= Outside").unwrap();
            symlink(
                "../../outside.adoc",
                td.path().join("docs/pages/inside.adoc"),
            )
            .unwrap();
            let scan = read_worktree(td.path(), "docs").unwrap();
            let inside = scan
                .files
                .iter()
                .find(|f| f.path == "pages/inside.adoc")
                .unwrap();
            assert_eq!(inside.contents, b"= Outside");
        }
    }

    #[test]
    fn tree_query_lists_dirs_and_files() {
        let td = tempfile::TempDir::new().unwrap();
        let repo = Repository::init_opts(
            td.path(),
            git2::RepositoryInitOptions::new().initial_head("main").bare(true),
        )
        .unwrap();
        let oid = commit_tree(&repo, |repo| {
            let yml = blob(repo, "name: c");
            let mut docs = repo.treebuilder(None).unwrap();
            docs.insert("antora.yml", yml, FILEMODE_BLOB).unwrap();
            let docs = docs.write().unwrap();
            let mut more = repo.treebuilder(None).unwrap();
            more.insert("antora.yml", yml, FILEMODE_BLOB).unwrap();
            let more = more.write().unwrap();
            let mut root = repo.treebuilder(None).unwrap();
            root.insert("docs", docs, FILEMODE_TREE).unwrap();
            root.insert("moredocs", more, FILEMODE_TREE).unwrap();
            root.write().unwrap()
        });
        let query = TreeQuery::at_commit(&repo, &oid).unwrap();
        assert_eq!(query.list_dirs(), ["docs", "moredocs"]);
        assert!(query.is_dir("docs"));
        assert!(!query.is_dir("docs/antora.yml"));
        assert!(query.is_file("docs/antora.yml"));
        assert_eq!(query.read_file("moredocs/antora.yml").unwrap(), b"name: c");
    }
}
