//! Lifecycle of the single mirrored checkout.
//!
//! `Session::start` spawns two tasks. The first clones the repository once
//! and publishes the outcome on a watch channel; every caller of
//! [`Session::checkout`] waits on that same published result. The second
//! waits for the checkout and then pulls on a fixed interval forever,
//! backing off after failed pulls and invalidating registered caches after
//! each successful one.

use crate::cache::Invalidate;
use crate::config::RefreshPolicy;
use crate::error::AcquireError;
use crate::generation::{CheckoutStatus, Generation, GenerationCounter};
use crate::git::Acquirer;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// The local copy of the mirrored repository.
///
/// The directory is removed when the last reference is dropped.
#[derive(Debug)]
pub struct Checkout {
    dir: TempDir,
}

impl Checkout {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

#[derive(Debug, Clone)]
enum CloneState {
    Cloning,
    Ready(Arc<Checkout>),
    Failed(Arc<AcquireError>),
}

/// Pull-and-invalidate step shared by the refresh loop and manual refreshes.
struct Refresher {
    acquirer: Acquirer,
    generation: GenerationCounter,
    targets: Vec<Arc<dyn Invalidate>>,
    /// One pull at a time in the checkout; git holds `index.lock` while pulling
    pulling: Mutex<()>,
}

impl Refresher {
    async fn refresh(&self, checkout: &Checkout) -> Result<Generation, AcquireError> {
        let _pulling = self.pulling.lock().await;
        self.acquirer.pull(checkout.root()).await?;
        for target in &self.targets {
            target.invalidate();
        }
        let generation = self.generation.advance();
        let head = self.acquirer.head_commit_sha(checkout.root()).await;
        tracing::info!(
            %generation,
            head = head.as_deref().unwrap_or("unknown"),
            "checkout refreshed"
        );
        Ok(generation)
    }
}

/// Owns the checkout and the background tasks that create and refresh it.
pub struct Session {
    url: String,
    state: watch::Receiver<CloneState>,
    refresher: Arc<Refresher>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Begin cloning `url` in the background and schedule the refresh loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        acquirer: Acquirer,
        url: impl Into<String>,
        policy: RefreshPolicy,
        targets: Vec<Arc<dyn Invalidate>>,
    ) -> Self {
        let url = url.into();
        let (tx, state) = watch::channel(CloneState::Cloning);
        let refresher = Arc::new(Refresher {
            acquirer,
            generation: GenerationCounter::default(),
            targets,
            pulling: Mutex::new(()),
        });

        let clone_task = {
            let refresher = Arc::clone(&refresher);
            let url = url.clone();
            tokio::spawn(async move {
                tracing::info!(%url, "cloning repository");
                let next = match refresher.acquirer.clone_repo(&url).await {
                    Ok(dir) => CloneState::Ready(Arc::new(Checkout { dir })),
                    Err(err) => {
                        tracing::error!(%url, error = %err, "clone failed");
                        CloneState::Failed(Arc::new(err))
                    }
                };
                // Receivers may all be gone if the session was dropped mid-clone.
                let _ = tx.send(next);
            })
        };

        let refresh_task = {
            let refresher = Arc::clone(&refresher);
            let state = state.clone();
            tokio::spawn(async move {
                if let Ok(checkout) = wait_for_checkout(state).await {
                    refresh_loop(&refresher, &checkout, policy).await;
                }
            })
        };

        Self {
            url,
            state,
            refresher,
            tasks: vec![clone_task, refresh_task],
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Wait for the one clone attempt and return its outcome.
    ///
    /// Every caller, before or after the clone completes, receives the same
    /// checkout or the same error.
    pub async fn checkout(&self) -> Result<Arc<Checkout>, Arc<AcquireError>> {
        wait_for_checkout(self.state.clone()).await
    }

    pub fn status(&self) -> CheckoutStatus {
        match &*self.state.borrow() {
            CloneState::Cloning => CheckoutStatus::Cloning,
            CloneState::Ready(_) => CheckoutStatus::Ready,
            CloneState::Failed(_) => CheckoutStatus::Failed,
        }
    }

    /// HEAD commit of the checkout, once it exists.
    pub async fn head(&self) -> Option<String> {
        let checkout = self.checkout().await.ok()?;
        self.refresher.acquirer.head_commit_sha(checkout.root()).await
    }

    /// Number of successful refreshes so far.
    pub fn generation(&self) -> Generation {
        self.refresher.generation.current()
    }

    /// Pull once now and invalidate caches on success.
    ///
    /// The checkout is left as it was when the pull fails.
    pub async fn refresh_once(&self) -> Result<Generation, Arc<AcquireError>> {
        let checkout = self.checkout().await?;
        self.refresher
            .refresh(&checkout)
            .await
            .map_err(Arc::new)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn wait_for_checkout(
    mut state: watch::Receiver<CloneState>,
) -> Result<Arc<Checkout>, Arc<AcquireError>> {
    let settled = state
        .wait_for(|s| !matches!(s, CloneState::Cloning))
        .await
        .map(|s| (*s).clone());
    match settled {
        Ok(CloneState::Ready(checkout)) => Ok(checkout),
        Ok(CloneState::Failed(err)) => Err(err),
        Ok(CloneState::Cloning) | Err(_) => Err(Arc::new(AcquireError::Abandoned)),
    }
}

/// Sleep, pull, invalidate, forever. Failed pulls back off and retry.
async fn refresh_loop(refresher: &Refresher, checkout: &Checkout, policy: RefreshPolicy) {
    let mut failures: u32 = 0;
    loop {
        let delay = if failures == 0 {
            policy.interval
        } else {
            policy.retry_delay(failures)
        };
        tokio::time::sleep(delay).await;

        match refresher.refresh(checkout).await {
            Ok(_) => failures = 0,
            Err(err) => {
                failures = failures.saturating_add(1);
                tracing::warn!(
                    error = %err,
                    failures,
                    retry_in = ?policy.retry_delay(failures),
                    "pull failed, serving previous checkout"
                );
            }
        }
    }
}
