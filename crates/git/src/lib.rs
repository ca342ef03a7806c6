//! Git plumbing for the content aggregator: per-run repository management
//! (clone, fetch, cache), ref selection, and tree reading with full
//! symbolic-link semantics. Everything here is synchronous git2 work; the
//! async orchestration above runs it inside `spawn_blocking`.

use std::path::PathBuf;

use thiserror::Error;

pub mod auth;
pub mod manager;
pub mod refs;
pub mod tree;

pub use auth::{CredentialManager, CredentialStore, Credentials, PluginSet, PrivateMarker};
pub use manager::{
    GitOp, LoadedRepository, ManagerOptions, NetworkOptions, ProgressReporter, RepoKind,
    RepoRequest, RepositoryManager,
};
pub use refs::{Ref, RefKind, RefSelection, WorktreeFilter, select_refs};
pub use tree::{TreeError, TreeFile, TreeQuery, WorktreeScan, read_git_tree, read_worktree};

#[derive(Debug, Error)]
pub enum GitError {
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    TaskJoin(String),
    #[error("could not create content cache directory: {}", path.display())]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("local content source does not exist: {}", path.display())]
    LocalNotFound { path: PathBuf },
    #[error("content repository not found (url: {url})")]
    NotFound { url: String },
    #[error("content repository requires credentials (url: {url})")]
    CredentialsRequired { url: String },
    #[error("content repository credentials were rejected (url: {url})")]
    CredentialsRejected { url: String },
    #[error("{message} (url: {url})")]
    Transport {
        message: String,
        url: String,
        recoverable: bool,
    },
    #[error(transparent)]
    Pattern(#[from] pattern::PatternError),
    #[error(transparent)]
    Tree(#[from] tree::TreeError),
}

impl GitError {
    /// Whether the one-shot serial retry may be attempted for this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GitError::Transport { recoverable: true, .. })
    }
}
