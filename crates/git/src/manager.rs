//! Per-run repository management. Each unique content-source URL maps to
//! exactly one usable repository on disk: a local worktree, a local bare
//! repository, or a bare cache entry under `<cacheDir>/content` that is
//! cloned on first sight and fetched on demand. Network work runs in
//! parallel under the fetch-concurrency budget, with a one-shot serial
//! fallback when a batch trips over an unexpected transport error.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use git2::{
    AutotagOption, Cred, CredentialType, Direction, ErrorCode, FetchOptions, FetchPrune,
    ProxyOptions, RemoteCallbacks, Repository,
};
use indexmap::IndexMap;
use tokio::sync::Semaphore;

use crate::GitError;
use crate::auth::{self, CredentialStore, PluginSet, PrivateMarker, ResolvedAuth};
use utils::giturl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitOp {
    Clone,
    Fetch,
}

impl std::fmt::Display for GitOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitOp::Clone => f.write_str("clone"),
            GitOp::Fetch => f.write_str("fetch"),
        }
    }
}

/// Coarse progress stream for network operations; the CLI renders this as
/// per-repository progress bars, the aggregator forwards it untouched.
pub trait ProgressReporter: Send + Sync {
    fn started(&self, url: &str, op: GitOp);
    fn progress(&self, _url: &str, _op: GitOp, _percent: u8) {}
    fn completed(&self, url: &str, op: GitOp, success: bool);
}

#[derive(Debug, Clone, Default)]
pub struct NetworkOptions {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl NetworkOptions {
    /// Environment fallback used when the playbook leaves network settings
    /// unset.
    pub fn from_env() -> Self {
        Self {
            http_proxy: std::env::var("http_proxy").ok(),
            https_proxy: std::env::var("https_proxy").ok(),
            no_proxy: std::env::var("no_proxy").ok(),
        }
    }

    pub fn proxy_for(&self, url: &str) -> Option<String> {
        let host = url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(url)
            .split(['/', ':'])
            .next()
            .unwrap_or_default();
        if let Some(no_proxy) = &self.no_proxy {
            for entry in no_proxy.split(',').map(str::trim) {
                if entry == "*" || (!entry.is_empty() && host.ends_with(entry)) {
                    return None;
                }
            }
        }
        if url.starts_with("https://") {
            self.https_proxy.clone()
        } else {
            self.http_proxy.clone()
        }
    }
}

pub struct ManagerOptions {
    pub cache_dir: PathBuf,
    pub fetch: bool,
    pub fetch_concurrency: usize,
    pub ensure_git_suffix: bool,
    pub plugins: PluginSet,
    pub credentials: CredentialStore,
    pub network: NetworkOptions,
    pub progress: Option<Arc<dyn ProgressReporter>>,
}

#[derive(Debug, Clone)]
pub struct RepoRequest {
    /// Source URL after source-level normalization (local URLs are already
    /// absolute filesystem paths).
    pub url: String,
    pub remote: Option<String>,
    /// Whether the owning sources ask for tags, which widens the fetch.
    pub fetch_tags: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoKind {
    /// Local repository with a main worktree.
    Local,
    /// Local bare repository (or a `/.git` URL).
    LocalBare,
    /// Managed bare cache entry for a remote URL.
    Cache,
}

/// One usable repository for the duration of a run. The open git2 handle is
/// shared so that every ref/tree/blob read in the run reuses the same
/// object and pack caches.
#[derive(Clone)]
pub struct LoadedRepository {
    pub url: String,
    pub gitdir: PathBuf,
    pub work_tree: Option<PathBuf>,
    pub remote_name: String,
    pub kind: RepoKind,
    pub private: Option<PrivateMarker>,
    repo: Arc<Mutex<Repository>>,
}

impl std::fmt::Debug for LoadedRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedRepository")
            .field("url", &self.url)
            .field("gitdir", &self.gitdir)
            .field("work_tree", &self.work_tree)
            .field("remote_name", &self.remote_name)
            .field("kind", &self.kind)
            .field("private", &self.private)
            .finish_non_exhaustive()
    }
}

impl LoadedRepository {
    pub fn with_repo<T>(&self, f: impl FnOnce(&Repository) -> T) -> T {
        let guard = self.repo.lock().unwrap();
        f(&guard)
    }

    pub fn is_bare(&self) -> bool {
        !matches!(self.kind, RepoKind::Local)
    }

    pub fn is_managed_cache(&self) -> bool {
        matches!(self.kind, RepoKind::Cache)
    }
}

#[derive(Clone)]
pub struct RepositoryManager {
    inner: Arc<Inner>,
}

struct Inner {
    options: ManagerOptions,
    content_dir: PathBuf,
}

impl RepositoryManager {
    /// Prepares the content cache directory; failing to create it is fatal
    /// for the whole run.
    pub fn new(options: ManagerOptions) -> Result<Self, GitError> {
        let content_dir = options.cache_dir.join("content");
        let created = match &options.plugins.fs {
            Some(fs) => fs.create_dir_all(&content_dir),
            None => std::fs::create_dir_all(&content_dir),
        };
        created.map_err(|source| GitError::CacheDir {
            path: content_dir.clone(),
            source,
        })?;
        Ok(Self {
            inner: Arc::new(Inner {
                options,
                content_dir,
            }),
        })
    }

    pub fn content_dir(&self) -> &Path {
        &self.inner.content_dir
    }

    /// Resolves every request to a usable repository, cloning or fetching
    /// remotes in parallel under the fetch-concurrency budget. A repository
    /// referenced by several sources is processed once. When the parallel
    /// batch hits an unexpected transport error and more than one remote is
    /// involved, the failed requests are retried once serially before the
    /// first error (in request order) is surfaced.
    pub async fn load_all(
        &self,
        requests: Vec<RepoRequest>,
    ) -> Result<IndexMap<String, LoadedRepository>, GitError> {
        let mut unique: IndexMap<String, RepoRequest> = IndexMap::new();
        for request in requests {
            match unique.get_mut(&request.url) {
                Some(existing) => existing.fetch_tags |= request.fetch_tags,
                None => {
                    unique.insert(request.url.clone(), request);
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.inner.options.fetch_concurrency.max(1)));
        let mut handles = Vec::with_capacity(unique.len());
        for request in unique.values() {
            let manager = self.clone();
            let request = request.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.push((
                request.url.clone(),
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| GitError::TaskJoin(e.to_string()))?;
                    tokio::task::spawn_blocking(move || manager.open_or_load(&request))
                        .await
                        .map_err(|e| GitError::TaskJoin(e.to_string()))?
                }),
            ));
        }

        let mut results: IndexMap<String, Result<LoadedRepository, GitError>> = IndexMap::new();
        for (url, handle) in handles {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(GitError::TaskJoin(e.to_string())));
            results.insert(url, outcome);
        }

        let remote_count = unique
            .values()
            .filter(|r| giturl::is_remote_url(&r.url))
            .count();
        let retriable: Vec<String> = results
            .iter()
            .filter(|(_, outcome)| outcome.as_ref().is_err_and(|e| e.is_recoverable()))
            .map(|(url, _)| url.clone())
            .collect();
        if !retriable.is_empty() && remote_count > 1 {
            tracing::warn!(
                failed = retriable.len(),
                "parallel fetch failed unexpectedly; retrying serially"
            );
            for url in retriable {
                let Some(request) = unique.get(&url).cloned() else {
                    continue;
                };
                let manager = self.clone();
                let outcome =
                    tokio::task::spawn_blocking(move || manager.open_or_load(&request))
                        .await
                        .unwrap_or_else(|e| Err(GitError::TaskJoin(e.to_string())));
                results.insert(url, outcome);
            }
        }

        let mut loaded = IndexMap::with_capacity(results.len());
        for (url, outcome) in results {
            loaded.insert(url, outcome?);
        }
        Ok(loaded)
    }

    fn open_or_load(&self, request: &RepoRequest) -> Result<LoadedRepository, GitError> {
        if giturl::is_remote_url(&request.url) {
            self.load_remote(request)
        } else {
            self.open_local(request)
        }
    }

    fn open_local(&self, request: &RepoRequest) -> Result<LoadedRepository, GitError> {
        let path = PathBuf::from(&request.url);
        if !path.exists() {
            return Err(GitError::LocalNotFound { path });
        }
        let repo = Repository::open(&path)?;
        let bare = repo.is_bare() || request.url.ends_with("/.git");
        let kind = if bare { RepoKind::LocalBare } else { RepoKind::Local };
        let work_tree = if bare {
            None
        } else {
            repo.workdir().map(Path::to_path_buf)
        };
        let gitdir = repo.path().to_path_buf();
        Ok(LoadedRepository {
            url: giturl::file_url(&path),
            gitdir,
            work_tree,
            remote_name: request.remote.clone().unwrap_or_else(|| "origin".into()),
            kind,
            private: None,
            repo: Arc::new(Mutex::new(repo)),
        })
    }

    fn load_remote(&self, request: &RepoRequest) -> Result<LoadedRepository, GitError> {
        let coerced = giturl::coerce_scp_to_https(&request.url)
            .unwrap_or_else(|| request.url.clone());
        let (sanitized, embedded) = giturl::split_credentials(&coerced);
        let url = if self.inner.options.ensure_git_suffix {
            giturl::ensure_git_suffix(&sanitized)
        } else {
            sanitized
        };
        let resolved = auth::resolve(
            &url,
            embedded,
            &self.inner.options.credentials,
            &self.inner.options.plugins,
        );
        let remote_name = request.remote.clone().unwrap_or_else(|| "origin".into());
        let entry = self.inner.content_dir.join(giturl::cache_entry_name(&url));
        let sentinel = entry.join("valid");
        let auth_used = Arc::new(AtomicBool::new(false));

        if entry.is_dir() && sentinel.is_file() {
            if self.inner.options.fetch {
                self.with_progress(&url, GitOp::Fetch, || {
                    self.fetch_into(&entry, &url, &remote_name, request.fetch_tags, &resolved, &auth_used)
                })?;
                self.write_sentinel(&entry)?;
            }
        } else {
            if entry.exists() {
                // stale partial clone with no sentinel
                self.remove_entry(&entry)?;
            }
            let cloned = self.with_progress(&url, GitOp::Clone, || {
                self.clone_into(&entry, &url, &remote_name, request.fetch_tags, &resolved, &auth_used)
            });
            if let Err(err) = cloned {
                // never leave a partial clone behind
                if let Err(cleanup) = self.remove_entry(&entry) {
                    tracing::warn!(?cleanup, "failed to remove partial clone");
                }
                return Err(err);
            }
            self.write_sentinel(&entry)?;
        }

        let private = match resolved.marker {
            Some(PrivateMarker::AuthEmbedded) => Some(PrivateMarker::AuthEmbedded),
            Some(PrivateMarker::AuthRequired) if auth_used.load(Ordering::SeqCst) => {
                Some(PrivateMarker::AuthRequired)
            }
            _ => None,
        };
        let repo = Repository::open(&entry)?;
        Ok(LoadedRepository {
            url,
            gitdir: entry,
            work_tree: None,
            remote_name,
            kind: RepoKind::Cache,
            private,
            repo: Arc::new(Mutex::new(repo)),
        })
    }

    fn clone_into(
        &self,
        entry: &Path,
        url: &str,
        remote_name: &str,
        fetch_tags: bool,
        resolved: &ResolvedAuth,
        auth_used: &Arc<AtomicBool>,
    ) -> Result<(), GitError> {
        let repo = Repository::init_bare(entry)?;
        let mut remote = repo.remote(remote_name, url)?;

        // read the remote's default branch first so a bare cache still has
        // a symbolic HEAD to resolve `HEAD`/`.` tokens against
        let default_branch = {
            let callbacks =
                self.callbacks(url, GitOp::Clone, resolved, Arc::clone(auth_used));
            let connection = remote
                .connect_auth(Direction::Fetch, Some(callbacks), Some(self.proxy(url)))
                .map_err(|e| self.classify(e, url, resolved))?;
            connection.default_branch().ok()
        };

        self.fetch_refs(&repo, &mut remote, url, remote_name, fetch_tags, resolved, auth_used)?;

        if let Some(default_branch) = default_branch
            && let Some(name) = default_branch.as_str()
        {
            repo.set_head(name)?;
        }
        Ok(())
    }

    fn fetch_into(
        &self,
        entry: &Path,
        url: &str,
        remote_name: &str,
        fetch_tags: bool,
        resolved: &ResolvedAuth,
        auth_used: &Arc<AtomicBool>,
    ) -> Result<(), GitError> {
        let repo = Repository::open(entry)?;
        let mut remote = match repo.find_remote(remote_name) {
            Ok(remote) => {
                if remote.url() != Some(url) {
                    repo.remote_set_url(remote_name, url)?;
                    repo.find_remote(remote_name)?
                } else {
                    remote
                }
            }
            Err(_) => repo.remote(remote_name, url)?,
        };
        self.fetch_refs(&repo, &mut remote, url, remote_name, fetch_tags, resolved, auth_used)
    }

    #[allow(clippy::too_many_arguments)]
    fn fetch_refs(
        &self,
        _repo: &Repository,
        remote: &mut git2::Remote<'_>,
        url: &str,
        remote_name: &str,
        fetch_tags: bool,
        resolved: &ResolvedAuth,
        auth_used: &Arc<AtomicBool>,
    ) -> Result<(), GitError> {
        let callbacks = self.callbacks(url, GitOp::Fetch, resolved, Arc::clone(auth_used));
        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);
        options.proxy_options(self.proxy(url));
        options.prune(FetchPrune::On);
        options.download_tags(if fetch_tags {
            AutotagOption::All
        } else {
            AutotagOption::None
        });
        let refspec = format!("+refs/heads/*:refs/remotes/{remote_name}/*");
        remote
            .fetch(&[refspec.as_str()], Some(&mut options), None)
            .map_err(|e| self.classify(e, url, resolved))
    }

    fn callbacks<'cb>(
        &self,
        url: &str,
        op: GitOp,
        resolved: &ResolvedAuth,
        auth_used: Arc<AtomicBool>,
    ) -> RemoteCallbacks<'cb> {
        let mut callbacks = RemoteCallbacks::new();
        let credentials = resolved.credentials.clone();
        let single_attempt = resolved.single_attempt;
        let credential_manager = self.inner.options.plugins.credential_manager.clone();
        let challenge_url = url.to_string();
        let attempts = AtomicUsize::new(0);
        callbacks.credentials(move |_url, username_from_url, allowed| {
            if allowed.contains(CredentialType::SSH_KEY) {
                if let Some(username) = username_from_url
                    && let Ok(cred) = Cred::ssh_key_from_agent(username)
                {
                    return Ok(cred);
                }
                if let Some(home) = dirs::home_dir() {
                    let key = home.join(".ssh").join("id_rsa");
                    if key.exists() {
                        return Cred::ssh_key(username_from_url.unwrap_or("git"), None, &key, None);
                    }
                }
            }
            if allowed.contains(CredentialType::USER_PASS_PLAINTEXT)
                && let Some(credentials) = &credentials
            {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                if attempt == 0 {
                    auth_used.store(true, Ordering::SeqCst);
                    return Cred::userpass_plaintext(&credentials.username, &credentials.password);
                }
                // the server rejected the offer; an empty or username-only
                // URL credential is never offered again, anything else
                // gives the credential-manager plugin one chance to answer
                if attempt == 1
                    && !single_attempt
                    && let Some(manager) = &credential_manager
                    && let Some(fresh) = manager.fill(&challenge_url)
                {
                    auth_used.store(true, Ordering::SeqCst);
                    return Cred::userpass_plaintext(&fresh.username, &fresh.password);
                }
                return Err(git2::Error::from_str("credentials rejected"));
            }
            if allowed.contains(CredentialType::USERNAME) {
                return Cred::username(username_from_url.unwrap_or("git"));
            }
            Err(git2::Error::from_str("no credentials available"))
        });
        if let Some(reporter) = &self.inner.options.progress {
            let reporter = Arc::clone(reporter);
            let url = url.to_string();
            callbacks.transfer_progress(move |progress| {
                let total = progress.total_objects();
                if total > 0 {
                    let percent = (progress.received_objects() * 100 / total).min(100) as u8;
                    reporter.progress(&url, op, percent);
                }
                true
            });
        }
        callbacks
    }

    fn proxy<'po>(&self, url: &str) -> ProxyOptions<'po> {
        let mut options = ProxyOptions::new();
        let configured = self
            .inner
            .options
            .plugins
            .http
            .as_ref()
            .and_then(|http| http.proxy_for(url))
            .or_else(|| self.inner.options.network.proxy_for(url));
        match configured {
            Some(proxy) => {
                options.url(&proxy);
            }
            None => {
                options.auto();
            }
        }
        options
    }

    fn classify(&self, err: git2::Error, url: &str, resolved: &ResolvedAuth) -> GitError {
        let message = err.message().to_string();
        let lowered = message.to_lowercase();
        let auth_failure = err.code() == ErrorCode::Auth
            || lowered.contains("authentication")
            || message.contains("401")
            || message.contains("403");
        if auth_failure {
            if let Some(manager) = &self.inner.options.plugins.credential_manager {
                manager.rejected(url);
            }
            return if resolved.credentials.is_some() {
                GitError::CredentialsRejected {
                    url: url.to_string(),
                }
            } else {
                GitError::CredentialsRequired {
                    url: url.to_string(),
                }
            };
        }
        if message.contains("404") || lowered.contains("not found") {
            return GitError::NotFound {
                url: url.to_string(),
            };
        }
        // 5xx and everything unrecognized is eligible for the serial retry
        GitError::Transport {
            message,
            url: url.to_string(),
            recoverable: true,
        }
    }

    fn with_progress<T>(
        &self,
        url: &str,
        op: GitOp,
        f: impl FnOnce() -> Result<T, GitError>,
    ) -> Result<T, GitError> {
        if let Some(reporter) = &self.inner.options.progress {
            reporter.started(url, op);
        }
        let outcome = f();
        if let Some(reporter) = &self.inner.options.progress {
            reporter.completed(url, op, outcome.is_ok());
        }
        if outcome.is_ok()
            && let Some(manager) = &self.inner.options.plugins.credential_manager
        {
            manager.approved(url);
        }
        outcome
    }

    /// Writes the zero-byte `valid` sentinel atomically (create + rename).
    fn write_sentinel(&self, entry: &Path) -> Result<(), GitError> {
        let tmp = tempfile::NamedTempFile::new_in(entry)?;
        tmp.persist(entry.join("valid"))
            .map_err(|e| GitError::Io(e.error))?;
        Ok(())
    }

    fn remove_entry(&self, entry: &Path) -> Result<(), GitError> {
        let removed = match &self.inner.options.plugins.fs {
            Some(fs) => fs.remove_dir_all(entry),
            None => std::fs::remove_dir_all(entry),
        };
        removed.map_err(GitError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(cache_dir: &Path) -> RepositoryManager {
        RepositoryManager::new(ManagerOptions {
            cache_dir: cache_dir.to_path_buf(),
            fetch: false,
            fetch_concurrency: 2,
            ensure_git_suffix: true,
            plugins: PluginSet::default(),
            credentials: CredentialStore::default(),
            network: NetworkOptions::default(),
            progress: None,
        })
        .unwrap()
    }

    fn init_repo_with_commit(path: &Path) -> Repository {
        let repo = Repository::init_opts(
            path,
            git2::RepositoryInitOptions::new().initial_head("main").mkdir(true),
        )
        .unwrap();
        {
            let sig = git2::Signature::now("Tester", "tester@example.org").unwrap();
            let tree_id = {
                let mut index = repo.index().unwrap();
                index.write_tree().unwrap()
            };
            let tree = repo.find_tree(tree_id).unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
                .unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn opens_local_worktree_repository() {
        let td = tempfile::TempDir::new().unwrap();
        let repo_path = td.path().join("repo");
        init_repo_with_commit(&repo_path);

        let manager = manager(&td.path().join("cache"));
        let loaded = manager
            .load_all(vec![RepoRequest {
                url: repo_path.to_string_lossy().into_owned(),
                remote: None,
                fetch_tags: false,
            }])
            .await
            .unwrap();
        let repo = &loaded[0];
        assert_eq!(repo.kind, RepoKind::Local);
        assert!(repo.work_tree.is_some());
        assert!(repo.url.starts_with("file://"));
        assert!(repo.private.is_none());
    }

    #[tokio::test]
    async fn local_repository_is_loaded_once_per_run() {
        let td = tempfile::TempDir::new().unwrap();
        let repo_path = td.path().join("repo");
        init_repo_with_commit(&repo_path);
        let url = repo_path.to_string_lossy().into_owned();

        let manager = manager(&td.path().join("cache"));
        let loaded = manager
            .load_all(vec![
                RepoRequest {
                    url: url.clone(),
                    remote: None,
                    fetch_tags: false,
                },
                RepoRequest {
                    url: url.clone(),
                    remote: None,
                    fetch_tags: true,
                },
            ])
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn missing_local_repository_is_an_error() {
        let td = tempfile::TempDir::new().unwrap();
        let manager = manager(&td.path().join("cache"));
        let err = manager
            .load_all(vec![RepoRequest {
                url: td.path().join("nope").to_string_lossy().into_owned(),
                remote: None,
                fetch_tags: false,
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::LocalNotFound { .. }));
    }

    #[test]
    fn creates_content_cache_directory() {
        let td = tempfile::TempDir::new().unwrap();
        let manager = manager(&td.path().join("the-cache"));
        assert!(manager.content_dir().is_dir());
        assert!(manager.content_dir().ends_with("content"));
    }

    #[test]
    fn proxy_selection_honors_no_proxy() {
        let network = NetworkOptions {
            http_proxy: Some("http://proxy:3128".into()),
            https_proxy: Some("http://sproxy:3128".into()),
            no_proxy: Some("internal.example.org, example.net".into()),
        };
        assert_eq!(
            network.proxy_for("https://example.org/repo.git").as_deref(),
            Some("http://sproxy:3128")
        );
        assert_eq!(
            network.proxy_for("http://example.org/repo.git").as_deref(),
            Some("http://proxy:3128")
        );
        assert!(network.proxy_for("https://git.internal.example.org/r").is_none());
    }
}
