//! The repository facade consumed by tool-calling front ends.

use crate::cache::{ContentCache, Invalidate};
use crate::config::{Config, RefreshPolicy};
use crate::error::{FsError, GroveError};
use crate::files;
use crate::generation::{CheckoutStatus, Generation};
use crate::git::Acquirer;
use crate::protocol::MatchRecord;
use crate::search::{SearchEngine, SearchQuery, SearchStream};
use crate::session::{Checkout, Session};
use serde::Serialize;
use std::sync::Arc;

/// Content of the distinguished context file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub path: String,
    pub content: Arc<str>,
}

/// Snapshot of the mirror for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub url: String,
    pub status: CheckoutStatus,
    pub generation: Generation,
    pub head: Option<String>,
}

/// Builder-style options for [`RepositoryService::start`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub url: String,
    pub context_file: String,
    pub acquirer: Acquirer,
    pub engine: SearchEngine,
    pub policy: RefreshPolicy,
}

impl ServiceOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            context_file: "README.md".to_string(),
            acquirer: Acquirer::default(),
            engine: SearchEngine::default(),
            policy: RefreshPolicy::default(),
        }
    }

    /// Options from a loaded config; the URL comes from `repository.url`.
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        if config.repository.url.trim().is_empty() {
            return Err(GroveError::Config(
                "repository.url is required".to_string(),
            ));
        }
        Ok(Self {
            url: config.repository.url.clone(),
            context_file: config.repository.context_file.clone(),
            acquirer: Acquirer::new(&config.git.binary).with_depth(config.clone_depth()),
            engine: SearchEngine::new(&config.search.binary, config.search.context_lines),
            policy: config.refresh_policy()?,
        })
    }

    pub fn context_file(mut self, name: impl Into<String>) -> Self {
        self.context_file = name.into();
        self
    }

    pub fn acquirer(mut self, acquirer: Acquirer) -> Self {
        self.acquirer = acquirer;
        self
    }

    pub fn engine(mut self, engine: SearchEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Search, read, glob and cached-file access to one mirrored repository.
///
/// Every operation waits for the initial clone and fails with the clone's
/// error if it failed.
pub struct RepositoryService {
    session: Session,
    engine: SearchEngine,
    context: Arc<ContentCache>,
    context_file: String,
}

impl RepositoryService {
    /// Start cloning in the background. Returns immediately.
    pub fn start(options: ServiceOptions) -> Self {
        let context = Arc::new(ContentCache::new());
        let targets = vec![Arc::clone(&context) as Arc<dyn Invalidate>];
        let session = Session::start(options.acquirer, options.url, options.policy, targets);
        Self {
            session,
            engine: options.engine,
            context,
            context_file: options.context_file,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Wait for the initial clone. A failure here is fatal for the service.
    pub async fn wait_ready(&self) -> crate::Result<()> {
        self.checkout().await.map(|_| ())
    }

    async fn checkout(&self) -> crate::Result<Arc<Checkout>> {
        Ok(self.session.checkout().await?)
    }

    /// Lazily stream matches for `pattern`.
    ///
    /// The stream keeps the checkout alive until it is dropped or closed.
    pub async fn search_stream(
        &self,
        pattern: &str,
        glob: Option<&str>,
        max_per_file: Option<usize>,
    ) -> crate::Result<SearchStream> {
        let checkout = self.checkout().await?;
        let query = SearchQuery::new(pattern, checkout.root())
            .with_glob(glob.map(String::from))
            .with_max_per_file(max_per_file);
        Ok(self.engine.search(&query)?.hold(checkout))
    }

    /// At most `max_results` matches for `pattern`; the search process is
    /// stopped as soon as enough have been read.
    pub async fn search(
        &self,
        pattern: &str,
        glob: Option<&str>,
        max_results: usize,
    ) -> crate::Result<Vec<MatchRecord>> {
        let stream = self.search_stream(pattern, glob, None).await?;
        Ok(stream.take(max_results).await?)
    }

    /// Lines `[start, end)` of a file, 1-based, see [`files::slice_lines`].
    pub async fn read_file_range(
        &self,
        path: &str,
        start: Option<i64>,
        end: Option<i64>,
    ) -> crate::Result<String> {
        let checkout = self.checkout().await?;
        Ok(files::read_file_range(checkout.root(), path, start, end).await?)
    }

    /// Relative paths matching `pattern`.
    pub async fn glob(&self, pattern: &str) -> crate::Result<Vec<String>> {
        let checkout = self.checkout().await?;
        let pattern = pattern.to_string();
        let paths =
            tokio::task::spawn_blocking(move || files::glob_files(checkout.root(), &pattern))
                .await
                .map_err(|err| FsError::Task(err.to_string()))??;
        Ok(paths)
    }

    /// The context file, served from cache until the next successful refresh.
    pub async fn cached_file(&self) -> crate::Result<CachedFile> {
        let checkout = self.checkout().await?;
        let name = self.context_file.as_str();
        let content = self
            .context
            .get_or_load(move || async move {
                tracing::debug!(file = name, "loading context file");
                files::read_file(checkout.root(), name).await
            })
            .await?;
        Ok(CachedFile {
            path: self.context_file.clone(),
            content,
        })
    }

    pub async fn status(&self) -> ServiceStatus {
        ServiceStatus {
            url: self.session.url().to_string(),
            status: self.session.status(),
            generation: self.session.generation(),
            head: self.session.head().await,
        }
    }
}
