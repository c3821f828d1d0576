//! Manually invalidated cache cell for derived file content.

use crate::generation::{Generation, GenerationCounter};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Something that holds content derived from the checkout and must drop it
/// when the checkout changes.
pub trait Invalidate: Send + Sync {
    fn invalidate(&self);
}

struct Entry {
    generation: Generation,
    content: Arc<str>,
}

/// Lazily computed, shared content with an explicit `invalidate()`.
///
/// There is no time-based expiry. The slot lock is held across a load, so at
/// most one recomputation runs at a time and concurrent readers wait for it.
#[derive(Default)]
pub struct ContentCache {
    generation: GenerationCounter,
    slot: Mutex<Option<Entry>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached content, running `load` if the cell is empty or stale.
    ///
    /// A failed load leaves the cell empty and is retried on the next call.
    pub async fn get_or_load<F, Fut, E>(&self, load: F) -> Result<Arc<str>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let mut slot = self.slot.lock().await;
        let current = self.generation.current();
        if let Some(entry) = slot.as_ref() {
            if entry.generation == current {
                return Ok(Arc::clone(&entry.content));
            }
        }

        // An invalidation racing the load bumps the generation past `current`,
        // so the stored entry is already stale and the next call reloads.
        let content: Arc<str> = load().await?.into();
        *slot = Some(Entry {
            generation: current,
            content: Arc::clone(&content),
        });
        Ok(content)
    }

    /// Whether the next `get_or_load` will be served without loading.
    pub async fn is_fresh(&self) -> bool {
        let slot = self.slot.lock().await;
        slot.as_ref()
            .is_some_and(|entry| entry.generation == self.generation.current())
    }
}

impl Invalidate for ContentCache {
    fn invalidate(&self) {
        let generation = self.generation.advance();
        tracing::debug!(%generation, "content cache invalidated");
    }
}
